// ---------------------------------------------------------------------------
// ResearchConfig — file-based config loader (deep-research.json) with env-var
// fallback, in the same three-tier (JSON field -> env var -> default) idiom
// the teacher's `ShadowConfig` / `ShadowDeepResearchConfig` use.
// ---------------------------------------------------------------------------

/// `searchProvider` sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SearchProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl SearchProviderConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        std::env::var("SEARCH_PROVIDER_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.base_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("SEARCH_PROVIDER_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.search-provider.example/v1".to_string())
    }

    pub fn resolve_timeout_ms(&self) -> u64 {
        if let Some(t) = self.timeout_ms {
            return t;
        }
        std::env::var("SEARCH_PROVIDER_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(45_000)
    }
}

/// `llmProvider` sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct LlmProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl LlmProviderConfig {
    /// API key: JSON field -> `LLM_PROVIDER_API_KEY` env var -> `None`.
    ///
    /// An explicit empty string in the config file means "no key required"
    /// (e.g. a local Ollama / LM Studio endpoint) and is returned as-is.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        std::env::var("LLM_PROVIDER_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.base_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("LLM_PROVIDER_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    pub fn resolve_timeout_ms(&self) -> u64 {
        if let Some(t) = self.timeout_ms {
            return t;
        }
        std::env::var("LLM_PROVIDER_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60_000)
    }
}

/// `rateLimit` sub-config.
#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct RateLimitConfig {
    pub rpm: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub multiplier: Option<u32>,
}

impl RateLimitConfig {
    pub fn resolve_rpm(&self) -> u32 {
        self.rpm
            .or_else(|| std::env::var("RATE_LIMIT_RPM").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(5)
    }

    pub fn resolve_initial_backoff_ms(&self) -> u64 {
        self.initial_backoff_ms
            .or_else(|| {
                std::env::var("RATE_LIMIT_INITIAL_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(1_000)
    }

    pub fn resolve_max_backoff_ms(&self) -> u64 {
        self.max_backoff_ms
            .or_else(|| {
                std::env::var("RATE_LIMIT_MAX_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(60_000)
    }

    pub fn resolve_multiplier(&self) -> u32 {
        self.multiplier
            .or_else(|| std::env::var("RATE_LIMIT_MULTIPLIER").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(2)
    }
}

/// `engine` sub-config.
#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    pub max_concurrency: Option<usize>,
    pub max_depth: Option<u8>,
    pub max_breadth: Option<u8>,
    pub event_buffer_size: Option<usize>,
}

impl EngineConfig {
    pub fn resolve_max_concurrency(&self) -> usize {
        self.max_concurrency
            .or_else(|| {
                std::env::var("ENGINE_MAX_CONCURRENCY")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(2)
    }

    pub fn resolve_max_depth(&self) -> u8 {
        self.max_depth
            .or_else(|| std::env::var("ENGINE_MAX_DEPTH").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(5)
    }

    pub fn resolve_max_breadth(&self) -> u8 {
        self.max_breadth
            .or_else(|| {
                std::env::var("ENGINE_MAX_BREADTH")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(5)
    }

    pub fn resolve_event_buffer_size(&self) -> usize {
        self.event_buffer_size
            .or_else(|| {
                std::env::var("ENGINE_EVENT_BUFFER_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(64)
    }
}

/// Top-level config loaded from `deep-research.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ResearchConfig {
    #[serde(default)]
    pub search_provider: SearchProviderConfig,
    #[serde(default)]
    pub llm_provider: LlmProviderConfig,
    pub default_model_id: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ResearchConfig {
    pub fn resolve_default_model_id(&self) -> String {
        if let Some(m) = &self.default_model_id {
            if !m.trim().is_empty() {
                return m.clone();
            }
        }
        std::env::var("DEFAULT_MODEL_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }
}

/// Load `deep-research.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `./deep-research.json`
/// 2. `../deep-research.json`
/// 3. `DEEP_RESEARCH_CONFIG` env var path
///
/// Missing file -> `ResearchConfig::default()` (silent, all env-var fallbacks
/// apply). Parse error -> log a warning, return `ResearchConfig::default()`.
pub fn load_research_config() -> ResearchConfig {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("deep-research.json"),
            std::path::PathBuf::from("../deep-research.json"),
        ];
        if let Ok(env_path) = std::env::var("DEEP_RESEARCH_CONFIG") {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ResearchConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("deep-research.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "deep-research.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return ResearchConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    ResearchConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_absent() {
        let cfg = ResearchConfig::default();
        assert_eq!(cfg.rate_limit.resolve_rpm(), 5);
        assert_eq!(cfg.engine.resolve_max_concurrency(), 2);
        assert_eq!(cfg.engine.resolve_max_depth(), 5);
        assert_eq!(cfg.engine.resolve_max_breadth(), 5);
        assert_eq!(cfg.engine.resolve_event_buffer_size(), 64);
        assert_eq!(cfg.rate_limit.resolve_initial_backoff_ms(), 1_000);
        assert_eq!(cfg.rate_limit.resolve_max_backoff_ms(), 60_000);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let json = r#"{"rate_limit": {"rpm": 11}, "engine": {"max_depth": 3}}"#;
        let cfg: ResearchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.rate_limit.resolve_rpm(), 11);
        assert_eq!(cfg.engine.resolve_max_depth(), 3);
        assert_eq!(cfg.engine.resolve_max_breadth(), 5);
    }
}
