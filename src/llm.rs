use crate::config::GenerationOptions;
use crate::http::build_client;
use crate::image::EncodedImage;
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl BackendConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
        }
    }

    #[allow(dead_code)]
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: base_url.into(),
        }
    }
}

/// The error kinds the orchestrator treats differently: quota rejections get
/// the pacing advice, timeouts and transport failures are plain per-item
/// failures, and a missing key aborts the whole run before it starts.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("api key is not configured")]
    MissingApiKey,
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by backend (HTTP 429)")]
    Quota,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The backend's reply, verbatim. Token usage comes from the backend's own
/// accounting, never a local tokenizer.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub text: String,
    pub tokens_used: u32,
    pub model: String,
}

pub struct ListingClient {
    http: Client,
    config: BackendConfig,
}

impl ListingClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    /// Fatal-misconfiguration check, run once before a batch starts.
    pub fn preflight(&self) -> Result<(), BackendError> {
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(BackendError::MissingApiKey),
        }
    }

    /// Sends one normalized image plus prompt to the generation backend and
    /// returns its raw reply. Extraction is the extractor's job, not ours.
    pub async fn generate(
        &self,
        image: &EncodedImage,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<RawResponse, BackendError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(BackendError::MissingApiKey)?;

        let body = ChatRequest {
            model: &options.model,
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrlPart {
                            url: image.as_data_url(),
                            detail: "high",
                        },
                    },
                ],
            }],
            max_tokens: options.max_output_tokens,
            temperature: options.temperature,
        };

        let endpoint = format!(
            "{base}/chat/completions",
            base = self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Http(err.to_string())
                }
            })?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(BackendError::Quota),
            status if !status.is_success() => {
                return Err(BackendError::Http(format!("HTTP {status}")));
            }
            _ => {}
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| BackendError::InvalidResponse(err.to_string()))?;

        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::InvalidResponse("missing message content".into()))?;
        let tokens_used = payload
            .usage
            .and_then(|usage| usage.total_tokens)
            .unwrap_or(0);

        debug!(
            target = "listforge.llm",
            tokens = tokens_used,
            reply_chars = text.len(),
            "generation complete"
        );

        Ok(RawResponse {
            text,
            tokens_used,
            model: payload.model.unwrap_or_else(|| options.model.clone()),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<VisionMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct VisionMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Debug, Serialize)]
struct ImageUrlPart {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: Option<u32>,
}

// USD per token, from the backend's published rates. Unknown models price as
// None rather than a made-up rate.
static MODEL_PRICING: Lazy<Vec<(&'static str, f64)>> = Lazy::new(|| {
    vec![
        ("gpt-4o-mini", 0.000_000_15),
        ("gpt-4o", 0.000_002_5),
        ("gpt-4", 0.000_03),
    ]
});

pub fn estimate_cost(tokens: u64, model: &str) -> Option<f64> {
    MODEL_PRICING
        .iter()
        .find(|(name, _)| model.starts_with(name))
        .map(|(_, rate)| tokens as f64 * rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};

    fn tiny_image() -> EncodedImage {
        EncodedImage {
            data: "aGVsbG8=".to_string(),
            width: 1,
            height: 1,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    #[test]
    fn preflight_rejects_missing_api_key() {
        let client = ListingClient::new(BackendConfig {
            api_key: None,
            base_url: "http://localhost".into(),
        });
        assert!(matches!(
            client.preflight(),
            Err(BackendError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn generate_returns_text_and_backend_token_count() {
        let router = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                // Vision payload shape: one user message with text + image_url parts.
                assert_eq!(body["messages"][0]["content"][0]["type"], "text");
                assert_eq!(body["messages"][0]["content"][1]["type"], "image_url");
                assert!(
                    body["messages"][0]["content"][1]["image_url"]["url"]
                        .as_str()
                        .expect("data url")
                        .starts_with("data:image/jpeg;base64,")
                );
                Json(json!({
                    "model": "gpt-4o-mini-2024-07-18",
                    "choices": [{"message": {"content": "{\"title\":\"T\"}"}}],
                    "usage": {"total_tokens": 123},
                }))
            }),
        );
        let base_url = serve(router).await;

        let client = ListingClient::new(BackendConfig::new("test-key", base_url));
        let response = client
            .generate(&tiny_image(), "prompt", &GenerationOptions::default())
            .await
            .expect("generate");
        assert_eq!(response.text, "{\"title\":\"T\"}");
        assert_eq!(response.tokens_used, 123);
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
    }

    #[tokio::test]
    async fn http_429_maps_to_quota_error() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base_url = serve(router).await;

        let client = ListingClient::new(BackendConfig::new("test-key", base_url));
        let err = client
            .generate(&tiny_image(), "prompt", &GenerationOptions::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, BackendError::Quota));
    }

    #[tokio::test]
    async fn http_500_maps_to_http_error() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base_url = serve(router).await;

        let client = ListingClient::new(BackendConfig::new("test-key", base_url));
        let err = client
            .generate(&tiny_image(), "prompt", &GenerationOptions::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, BackendError::Http(_)));
    }

    #[tokio::test]
    async fn garbled_envelope_is_an_invalid_response() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { "not json" }),
        );
        let base_url = serve(router).await;

        let client = ListingClient::new(BackendConfig::new("test-key", base_url));
        let err = client
            .generate(&tiny_image(), "prompt", &GenerationOptions::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[test]
    fn cost_estimates_prefer_longest_known_prefix() {
        let mini = estimate_cost(1_000_000, "gpt-4o-mini").expect("priced");
        let full = estimate_cost(1_000_000, "gpt-4o").expect("priced");
        assert!(mini < full);
        assert_eq!(estimate_cost(1000, "some-other-model"), None);
    }
}
