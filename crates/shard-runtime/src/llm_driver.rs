//! [`OllamaLlmClient`] – OpenAI-compatible [`LlmClient`] implementation.
//!
//! Talks to a locally-running model server exposing an OpenAI-compatible
//! `/v1/chat/completions` endpoint, such as [Ollama](https://ollama.com)
//! (`http://localhost:11434`). Every caller reaches it through
//! [`BaseShard::guarded_llm_call`], which already owns its own
//! session-level [`CostGuard`](shard_base::CostGuard); this client adds a
//! second, request-level layer of cost control since it is the thing that
//! actually spends money against a real provider.
//!
//! # Cost control
//!
//! * **Token counter** – every call estimates tokens consumed (prompt +
//!   reply) via a word-count heuristic and accumulates the running total,
//!   exposed via [`OllamaLlmClient::total_tokens`].
//! * **Rate limiter** – a [`governor`]-backed token-bucket limits requests
//!   per minute; an exhausted bucket fails the call immediately rather than
//!   blocking the shard's tick loop.
//! * **Budget circuit breaker** – once the cumulative token count exceeds
//!   the configured budget, every subsequent call fails until
//!   [`OllamaLlmClient::reset_token_counter`] is called.
//! * **TLS enforcement** – plaintext `http://` is only accepted for
//!   loopback hosts; any other host must use `https://`.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use kernel_api::{KernelApiError, LlmClient};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Anti-loop rules appended to every system-role message, instructing the
/// model to vary its strategy rather than issuing the same action
/// repeatedly. Mirrors the stall-detection Executive already does on the
/// fact-store side, but nudges the model itself before that ever fires.
pub const STABILITY_GUIDELINES: &str = "\
## Stability Guidelines (anti-loop rules)
- Do not propose the same action more than 3 times in a row.
- If an action fails, try a different approach rather than retrying immediately.
- Vary your strategy when previous actions have not produced progress.
- When stuck, ask for human guidance rather than repeating yourself.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
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

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// An async [`LlmClient`] for an OpenAI-compatible chat-completions
/// endpoint. Construct once per shard fleet and share via `Arc`.
pub struct OllamaLlmClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    total_tokens: Arc<AtomicU64>,
    token_budget: u64,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl OllamaLlmClient {
    pub const DEFAULT_RPM: u32 = 20;
    pub const DEFAULT_TOKEN_BUDGET: u64 = 100_000;

    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_limits(base_url, model, Self::DEFAULT_RPM, Self::DEFAULT_TOKEN_BUDGET)
    }

    pub fn with_budget(base_url: impl Into<String>, model: impl Into<String>, token_budget: u64) -> Self {
        Self::with_limits(base_url, model, Self::DEFAULT_RPM, token_budget)
    }

    pub fn with_rpm(base_url: impl Into<String>, model: impl Into<String>, rpm: u32) -> Self {
        Self::with_limits(base_url, model, rpm, Self::DEFAULT_TOKEN_BUDGET)
    }

    pub fn with_limits(base_url: impl Into<String>, model: impl Into<String>, rpm: u32, token_budget: u64) -> Self {
        let rpm = rpm.max(1);
        let quota = Quota::per_minute(NonZeroU32::new(rpm).expect("rpm is >= 1 after max(1) clamp above"));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));
        let client = reqwest::ClientBuilder::new()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .expect("failed to build reqwest client with TLS 1.2 minimum");
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client,
            total_tokens: Arc::new(AtomicU64::new(0)),
            token_budget,
            rate_limiter,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    pub fn reset_token_counter(&self) {
        self.total_tokens.store(0, Ordering::Relaxed);
    }

    pub fn token_budget(&self) -> u64 {
        self.token_budget
    }

    #[instrument(
        name = "llm_driver.complete",
        skip(self, messages, schema),
        fields(
            model = %self.model,
            tokens_used_before = %self.total_tokens.load(Ordering::Relaxed),
            prompt_tokens = tracing::field::Empty,
            reply_tokens = tracing::field::Empty,
            tokens_used_after = tracing::field::Empty,
            inference_latency_ms = tracing::field::Empty,
        )
    )]
    async fn complete(&self, messages: &[ChatMessage], schema: Option<serde_json::Value>) -> Result<String, KernelApiError> {
        if !Self::is_secure_url(&self.base_url) {
            return Err(KernelApiError::Unavailable(format!("insecure endpoint: {}", self.base_url)));
        }

        let used = self.total_tokens.load(Ordering::Relaxed);
        if used >= self.token_budget {
            return Err(KernelApiError::BudgetExhausted);
        }

        if self.rate_limiter.check().is_err() {
            return Err(KernelApiError::Unavailable("LLM rate limit exceeded".to_string()));
        }

        let mut augmented: Vec<ChatMessage> = messages
            .iter()
            .map(|m| {
                if m.role == Role::System {
                    ChatMessage { role: Role::System, content: format!("{}\n\n{}", m.content, STABILITY_GUIDELINES) }
                } else {
                    m.clone()
                }
            })
            .collect();
        if !augmented.iter().any(|m| m.role == Role::System) {
            augmented.insert(0, ChatMessage { role: Role::System, content: STABILITY_GUIDELINES.to_string() });
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: &augmented,
            stream: false,
            response_format: schema.map(|json_schema| ResponseFormat { kind: "json_schema", json_schema }),
        };

        let inference_start = Instant::now();
        let response: ChatResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| KernelApiError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| KernelApiError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| KernelApiError::Serialization(e.to_string()))?;
        let inference_latency_ms = inference_start.elapsed().as_millis() as u64;

        let reply = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| KernelApiError::Serialization("empty choices array".to_string()))?;

        let prompt_tokens: u64 = augmented.iter().map(|m| Self::estimate_tokens(&m.content)).sum();
        let reply_tokens = Self::estimate_tokens(&reply);
        let new_total = self.total_tokens.fetch_add(prompt_tokens + reply_tokens, Ordering::Relaxed) + prompt_tokens + reply_tokens;

        let span = tracing::Span::current();
        span.record("prompt_tokens", prompt_tokens);
        span.record("reply_tokens", reply_tokens);
        span.record("tokens_used_after", new_total);
        span.record("inference_latency_ms", inference_latency_ms);
        debug!(model = %self.model, prompt_tokens, reply_tokens, tokens_used_after = new_total, inference_latency_ms, "LLM inference complete");
        if new_total >= self.token_budget {
            warn!(tokens_used = new_total, budget = self.token_budget, "token budget reached or exceeded");
        }

        Ok(reply)
    }

    /// `true` when `url` is safe to connect to without further TLS
    /// enforcement: `https://`, or `http://` to a loopback host.
    pub(crate) fn is_secure_url(url: &str) -> bool {
        if url.starts_with("https://") {
            return true;
        }
        if let Some(without_scheme) = url.strip_prefix("http://") {
            let host_port = without_scheme.split('/').next().unwrap_or("");
            let host = if host_port.starts_with('[') {
                match host_port.find(']') {
                    Some(close) => &host_port[1..close],
                    None => return false,
                }
            } else if let Some(idx) = host_port.rfind(':') {
                &host_port[..idx]
            } else {
                host_port
            };
            return matches!(host, "localhost" | "127.0.0.1" | "::1");
        }
        false
    }

    /// `ceil(words × 1.3)`, computed as `(words * 13 + 9) / 10` to avoid
    /// floating-point conversion. Over-counts on purpose so the budget
    /// breaker errs toward tripping early.
    fn estimate_tokens(text: &str) -> u64 {
        let words = text.split_whitespace().count() as u64;
        (words * 13).div_ceil(10)
    }
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn complete_with_system(&self, system_prompt: &str, user_prompt: &str) -> Result<String, KernelApiError> {
        let messages = [
            ChatMessage { role: Role::System, content: system_prompt.to_string() },
            ChatMessage { role: Role::User, content: user_prompt.to_string() },
        ];
        self.complete(&messages, None).await
    }

    async fn complete_with_schema(&self, system_prompt: &str, user_prompt: &str, schema: &str) -> Result<String, KernelApiError> {
        let schema_value: serde_json::Value =
            serde_json::from_str(schema).map_err(|e| KernelApiError::Serialization(e.to_string()))?;
        let messages = [
            ChatMessage { role: Role::System, content: system_prompt.to_string() },
            ChatMessage { role: Role::User, content: user_prompt.to_string() },
        ];
        self.complete(&messages, Some(schema_value)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_role() {
        let msg = ChatMessage { role: Role::System, content: "hello".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"system\""));
    }

    #[test]
    fn chat_message_roundtrip() {
        let msg = ChatMessage { role: Role::User, content: "What is next?".into() };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.content, "What is next?");
    }

    #[test]
    fn default_token_counter_starts_at_zero() {
        let client = OllamaLlmClient::new("http://localhost:11434", "llama3");
        assert_eq!(client.total_tokens(), 0);
    }

    #[test]
    fn reset_token_counter_clears_accumulated_tokens() {
        let client = OllamaLlmClient::new("http://localhost:11434", "llama3");
        client.total_tokens.store(9_999, Ordering::Relaxed);
        client.reset_token_counter();
        assert_eq!(client.total_tokens(), 0);
    }

    #[test]
    fn token_budget_accessor_returns_configured_value() {
        let client = OllamaLlmClient::with_budget("http://localhost:11434", "llama3", 50_000);
        assert_eq!(client.token_budget(), 50_000);
    }

    #[tokio::test]
    async fn budget_circuit_breaker_trips_when_budget_exhausted() {
        let client = OllamaLlmClient::with_budget("http://localhost:11434", "llama3", 1);
        client.total_tokens.store(1, Ordering::Relaxed);
        let result = client.complete_with_system("sys", "What next?").await;
        assert!(matches!(result, Err(KernelApiError::BudgetExhausted)));
    }

    #[tokio::test]
    async fn rate_limiter_trips_when_quota_exhausted() {
        let client = OllamaLlmClient::with_rpm("http://localhost:11434", "llama3", 1);
        let _ = client.rate_limiter.check();
        let result = client.complete_with_system("sys", "What next?").await;
        assert!(matches!(result, Err(KernelApiError::Unavailable(_))));
    }

    #[test]
    fn estimate_tokens_empty_string_returns_zero() {
        assert_eq!(OllamaLlmClient::estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_tokens_ten_words() {
        assert_eq!(OllamaLlmClient::estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }

    #[test]
    fn is_secure_url_accepts_https() {
        assert!(OllamaLlmClient::is_secure_url("https://api.openai.com"));
    }

    #[test]
    fn is_secure_url_accepts_localhost_http() {
        assert!(OllamaLlmClient::is_secure_url("http://localhost:11434"));
        assert!(OllamaLlmClient::is_secure_url("http://127.0.0.1:11434"));
        assert!(OllamaLlmClient::is_secure_url("http://[::1]:11434"));
    }

    #[test]
    fn is_secure_url_rejects_external_http() {
        assert!(!OllamaLlmClient::is_secure_url("http://llm-provider.example.com"));
        assert!(!OllamaLlmClient::is_secure_url("http://192.168.1.1:11434"));
    }

    #[test]
    fn is_secure_url_rejects_malformed_ipv6() {
        assert!(!OllamaLlmClient::is_secure_url("http://[::1:11434"));
    }

    #[tokio::test]
    async fn complete_returns_unavailable_for_insecure_endpoint() {
        let client = OllamaLlmClient::new("http://external-server:11434", "llama3");
        let result = client.complete_with_system("sys", "Hello").await;
        assert!(matches!(result, Err(KernelApiError::Unavailable(_))));
    }

    #[test]
    fn with_limits_clamps_zero_rpm_to_one() {
        let client = OllamaLlmClient::with_limits("http://localhost:11434", "llama3", 0, 100_000);
        assert!(client.rate_limiter.check().is_ok());
    }
}
