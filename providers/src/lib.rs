//! LLM provider client.
//!
//! This crate handles HTTP communication with an OpenAI-compatible
//! chat-completions API: plain-text completions, schema-constrained
//! structured completions, and the retry policy shared by both.

pub mod retry;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};

/// Connection timeout for API requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum bytes kept from an error response body (32 KiB).
/// Prevents memory spikes from large error responses.
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// LLM call failure, reported after the retry policy has run its course.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// The provider could not be reached or kept failing: network errors,
    /// 5xx, 429, timeouts, and terminal 4xx responses.
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    /// The provider answered but the content was unusable: empty
    /// completions, non-JSON where JSON was required, or values that fail
    /// schema validation.
    #[error("LLM returned unusable output: {0}")]
    BadOutput(String),
}

/// Settings for constructing an [`LlmClient`].
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL of the chat-completions API, without the trailing
    /// `/chat/completions` segment.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    /// Total per-call timeout, spanning all retry attempts' individual
    /// requests.
    pub timeout: Duration,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
///
/// Both completion methods are cancellation-safe: dropping the returned
/// future aborts the in-flight request and releases the connection.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    settings: LlmSettings,
    retry: RetryConfig,
}

impl LlmClient {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(settings.timeout)
            .build()
            .expect("build LLM HTTP client");

        Self {
            http,
            settings,
            retry: RetryConfig::default(),
        }
    }

    /// Replace the retry policy (tests use a fast one).
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Free-form text completion.
    pub async fn complete_text(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let body = self.request_body(system, user, max_tokens, false);
        let content = self.request_completion(&body).await?;
        if content.trim().is_empty() {
            return Err(LlmError::BadOutput("empty completion".to_string()));
        }
        Ok(content)
    }

    /// Completion constrained to a JSON value matching `T`.
    ///
    /// `schema_hint` is a short prose description of the expected shape,
    /// appended to the system message. The returned JSON is validated by
    /// deserializing into `T`; validation failures are retried with fresh
    /// samples before surfacing as [`LlmError::BadOutput`].
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        schema_hint: &str,
        max_tokens: u32,
    ) -> Result<T, LlmError> {
        let system = format!("{system}\n\nRespond only with a JSON object: {schema_hint}");
        let body = self.request_body(&system, user, max_tokens, true);

        let mut last_error = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = retry::calculate_retry_delay(attempt - 1, &self.retry, None);
                tokio::time::sleep(delay).await;
            }

            let content = self.request_completion(&body).await?;
            match parse_structured(&content) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "structured completion failed validation");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::BadOutput("no attempts made".to_string())))
    }

    fn request_body(&self, system: &str, user: &str, max_tokens: u32, json_mode: bool) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    /// Issue one completion request (with transport-level retries) and
    /// return the first choice's message content.
    async fn request_completion(&self, body: &Value) -> Result<String, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let outcome = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .bearer_auth(&self.settings.api_key)
                    .json(body)
            },
            &self.retry,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status();
                let body = read_capped_error_body(response).await;
                return Err(LlmError::Unavailable(format!("HTTP {status}: {body}")));
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                return Err(LlmError::Unavailable(format!(
                    "connection error after {attempts} attempts: {source}"
                )));
            }
        };

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::BadOutput(format!("response is not JSON: {e}")))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::BadOutput("response has no message content".to_string()))
    }
}

/// Parse a structured completion: strip optional code fences, parse JSON,
/// deserialize into the target type. Any failure is `BadOutput`.
fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, LlmError> {
    let stripped = strip_code_fences(content);
    serde_json::from_str(stripped).map_err(|e| LlmError::BadOutput(e.to_string()))
}

/// Remove a surrounding Markdown code fence, if present. Models in JSON mode
/// still occasionally wrap their output.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Read an HTTP error response body with a size cap.
async fn read_capped_error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(mut text) => {
            if text.len() > MAX_ERROR_BODY_BYTES {
                let mut end = MAX_ERROR_BODY_BYTES;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
                text.push_str("...(truncated)");
            }
            text
        }
        Err(_) => String::new(),
    }
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlmClient {
        LlmClient::new(LlmSettings {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(5),
        })
        .with_retry(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
        })
    }

    fn completion_json(content: &str) -> serde_json::Value {
        json!({
            "choices": [
                { "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    #[tokio::test]
    async fn complete_text_returns_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_json("an answer")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client.complete_text("system", "user", 128).await.unwrap();
        assert_eq!(text, "an answer");
    }

    #[tokio::test]
    async fn complete_text_retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        let attempt = AtomicU32::new(0);

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(move |_: &wiremock::Request| {
                let n = attempt.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    ResponseTemplate::new(429)
                } else {
                    ResponseTemplate::new(200).set_body_json(completion_json("recovered"))
                }
            })
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client.complete_text("system", "user", 128).await.unwrap();
        assert_eq!(text, "recovered");
    }

    #[tokio::test]
    async fn complete_text_terminal_4xx_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.complete_text("system", "user", 128).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)), "got {err:?}");
    }

    #[derive(Debug, Deserialize)]
    struct Queries {
        queries: Vec<String>,
    }

    #[tokio::test]
    async fn complete_structured_parses_json_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_json(r#"{"queries": ["a", "b"]}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let parsed: Queries = client
            .complete_structured("system", "user", r#"{"queries": [string]}"#, 128)
            .await
            .unwrap();
        assert_eq!(parsed.queries, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn complete_structured_retries_bad_json_then_fails() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_json("not json at all")),
            )
            .expect(3) // Initial + 2 validation retries
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .complete_structured::<Queries>("system", "user", "schema", 128)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::BadOutput(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn complete_structured_accepts_fenced_json() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_json("```json\n{\"queries\": [\"x\"]}\n```")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let parsed: Queries = client
            .complete_structured("system", "user", "schema", 128)
            .await
            .unwrap();
        assert_eq!(parsed.queries, vec!["x"]);
    }

    #[tokio::test]
    async fn exhausted_5xx_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.complete_text("system", "user", 128).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)), "got {err:?}");
    }
}
