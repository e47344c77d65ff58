use thiserror::Error;

/// Error taxonomy shared by `SearchClient`, `LLMClient`, and the orchestration
/// layer (spec §7). Each downstream call collapses its failure into one of
/// these kinds so `ResearchEngine` can apply a uniform recovery policy.
#[derive(Debug, Error, Clone)]
pub enum ResearchError {
    /// Session/context was cancelled; never retried.
    #[error("cancelled")]
    Cancelled,

    /// Provider signalled backpressure. Callers that see this after internal
    /// retries are exhausted should treat it like `Transient`.
    #[error("rate limited{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Timeout, 5xx, or a single parse failure. Safe to retry.
    #[error("transient: {0}")]
    Transient(String),

    /// 401 from a provider, credential-reload retry already attempted.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Depth/breadth out of range, empty query, or similar — rejected before
    /// any `start` event is emitted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 4xx (other than 429) surfaced verbatim from a provider.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// Unrecoverable during orchestration (e.g. ReportWriter failed and the
    /// deterministic fallback also failed).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ResearchError {
    pub fn kind_label(&self) -> &'static str {
        match self {
            ResearchError::Cancelled => "cancelled",
            ResearchError::RateLimited { .. } => "rate_limited",
            ResearchError::Transient(_) => "transient",
            ResearchError::Unauthenticated(_) => "unauthenticated",
            ResearchError::InvalidInput(_) => "invalid_input",
            ResearchError::ProviderError(_) => "provider_error",
            ResearchError::Fatal(_) => "fatal",
        }
    }

    /// Whether a per-sub-query failure of this kind is recoverable (logged,
    /// sub-query skipped, session continues) per spec §7's propagation policy.
    ///
    /// `Unauthenticated` and `Fatal` are deliberately excluded: spec §7 says
    /// a 401 that survives the single credential-reload retry "surface[s] as
    /// fatal", not a per-sub-query skip.
    pub fn is_recoverable_per_query(&self) -> bool {
        matches!(
            self,
            ResearchError::RateLimited { .. } | ResearchError::Transient(_) | ResearchError::ProviderError(_)
        )
    }
}

pub type ResearchResult<T> = Result<T, ResearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_transient_and_provider_error_are_recoverable_per_query() {
        assert!(ResearchError::RateLimited { retry_after_secs: None }.is_recoverable_per_query());
        assert!(ResearchError::Transient("boom".into()).is_recoverable_per_query());
        assert!(ResearchError::ProviderError("blocked".into()).is_recoverable_per_query());
    }

    #[test]
    fn unauthenticated_and_fatal_are_not_recoverable_per_query() {
        assert!(!ResearchError::Unauthenticated("bad creds".into()).is_recoverable_per_query());
        assert!(!ResearchError::Fatal("unrecoverable".into()).is_recoverable_per_query());
    }

    #[test]
    fn cancelled_and_invalid_input_are_not_recoverable_per_query() {
        assert!(!ResearchError::Cancelled.is_recoverable_per_query());
        assert!(!ResearchError::InvalidInput("bad depth".into()).is_recoverable_per_query());
    }
}
