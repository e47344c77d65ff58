//! Adapter over a chat-completion backend keyed by a model identifier (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{ResearchError, ResearchResult};

use super::rate_limiter::{AcquireOutcome, RateLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4000,
            response_format: ResponseFormat::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
}

/// Pluggable hook invoked once on an HTTP 401 before a single retry.
#[async_trait]
pub trait CredentialsReloadHook: Send + Sync {
    async fn reload(&self);
}

/// A no-op hook for deployments with a single static API key.
pub struct NoopCredentialsReload;

#[async_trait]
impl CredentialsReloadHook for NoopCredentialsReload {
    async fn reload(&self) {}
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn chat(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
        cancel: &CancellationToken,
    ) -> ResearchResult<ChatCompletion>;
}

/// Production `LLMClient` over an OpenAI-compatible chat-completions endpoint
/// (spec §6.2).
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Arc<tokio::sync::RwLock<Option<String>>>,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
    credentials_hook: Arc<dyn CredentialsReloadHook>,
    max_transient_retries: u32,
}

impl HttpLlmClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
        credentials_hook: Arc<dyn CredentialsReloadHook>,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key: Arc::new(tokio::sync::RwLock::new(api_key)),
            timeout,
            limiter,
            credentials_hook,
            max_transient_retries: 2,
        }
    }
}

#[derive(Serialize)]
struct ProviderRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ProviderResponseFormat>,
}

#[derive(Serialize)]
struct ProviderResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    choices: Vec<ProviderChoice>,
}

#[derive(Deserialize)]
struct ProviderChoice {
    message: ProviderMessage,
}

#[derive(Deserialize)]
struct ProviderMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LLMClient for HttpLlmClient {
    async fn chat(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
        cancel: &CancellationToken,
    ) -> ResearchResult<ChatCompletion> {
        let mut transient_attempts = 0u32;
        let mut reauthenticated = false;

        loop {
            if self.limiter.acquire(cancel).await == AcquireOutcome::Cancelled {
                return Err(ResearchError::Cancelled);
            }

            let body = ProviderRequest {
                model: model_id,
                messages,
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                response_format: matches!(params.response_format, ResponseFormat::Json)
                    .then_some(ProviderResponseFormat { format_type: "json_object" }),
            };

            let mut req = self
                .http
                .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
                .timeout(self.timeout)
                .json(&body);
            if let Some(key) = self.api_key.read().await.as_ref().filter(|k| !k.is_empty()) {
                req = req.bearer_auth(key);
            }

            let sent = tokio::select! {
                r = req.send() => r,
                _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            };

            match sent {
                Ok(resp) => {
                    let status = resp.status();

                    if status.as_u16() == 401 {
                        if reauthenticated {
                            return Err(ResearchError::Unauthenticated(
                                "provider rejected credentials after reload".into(),
                            ));
                        }
                        reauthenticated = true;
                        self.credentials_hook.reload().await;
                        continue;
                    }

                    if status.as_u16() == 429 {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs);
                        self.limiter.signal_rate_limit_error(retry_after, cancel).await;
                        continue;
                    }

                    if status.is_server_error() {
                        transient_attempts += 1;
                        if transient_attempts > self.max_transient_retries {
                            return Err(ResearchError::Transient(format!(
                                "llm provider returned {status} after retries"
                            )));
                        }
                        continue;
                    }

                    if status.is_client_error() {
                        return Err(ResearchError::ProviderError(format!("llm provider returned {status}")));
                    }

                    let parsed: ProviderResponse = match resp.json().await {
                        Ok(p) => p,
                        Err(e) => {
                            transient_attempts += 1;
                            if transient_attempts > self.max_transient_retries {
                                return Err(ResearchError::Transient(format!(
                                    "llm response parse failure: {e}"
                                )));
                            }
                            continue;
                        }
                    };

                    let text = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default();

                    if text.trim().is_empty() {
                        return Err(ResearchError::Transient("llm returned empty content".into()));
                    }

                    return Ok(ChatCompletion { text });
                }
                Err(e) if e.is_timeout() => {
                    return Err(ResearchError::Transient(format!("llm request timed out: {e}")));
                }
                Err(e) => {
                    transient_attempts += 1;
                    if transient_attempts > self.max_transient_retries {
                        return Err(ResearchError::Transient(format!("llm request failed: {e}")));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingReload(AtomicUsize);

    #[async_trait]
    impl CredentialsReloadHook for CountingReload {
        async fn reload(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn build_client(base_url: String, hook: Arc<dyn CredentialsReloadHook>) -> HttpLlmClient {
        let limiter = Arc::new(RateLimiter::new(100, 10, 100, 2));
        HttpLlmClient::new(
            reqwest::Client::new(),
            base_url,
            Some("stale-key".into()),
            Duration::from_secs(5),
            limiter,
            hook,
        )
    }

    #[tokio::test]
    async fn unauthenticated_reloads_credentials_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reload_count = Arc::new(CountingReload(AtomicUsize::new(0)));
        let client = build_client(server.uri(), reload_count.clone());
        let messages = [ChatMessage::user("hi")];
        let result = client
            .chat("model", &messages, &ChatParams::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.text, "hello");
        assert_eq!(reload_count.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_401_surfaces_as_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let reload_count = Arc::new(CountingReload(AtomicUsize::new(0)));
        let client = build_client(server.uri(), reload_count);
        let messages = [ChatMessage::user("hi")];
        let err = client
            .chat("model", &messages, &ChatParams::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn empty_content_is_treated_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": ""}}]
            })))
            .mount(&server)
            .await;

        let client = build_client(server.uri(), Arc::new(NoopCredentialsReload));
        let messages = [ChatMessage::user("hi")];
        let err = client
            .chat("model", &messages, &ChatParams::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::Transient(_)));
    }
}
