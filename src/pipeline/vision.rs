//! Vision describer: natural-language descriptions for image regions.
//!
//! The [`VisionModel`] capability trait hides the concrete provider; the
//! default implementation speaks the OpenAI-compatible chat-completions
//! protocol with the image attached as a base64 data URI.
//!
//! ## Retry strategy
//!
//! Vision calls are the pipeline's most failure-prone suspension point:
//! quota errors (429) and 5xx responses are routine under concurrent load.
//! [`describe_with_retry`] applies bounded exponential backoff
//! (`backoff_ms * 2^attempt`) and then gives up, returning `None` so the
//! region renders without a description. A vision failure never fails the
//! document and never blocks other regions.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::ModelError;
use crate::prompts::vision_prompt;

/// Capability interface for image understanding.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Produce a natural-language description of the image. `context` is
    /// nearby document text used for grounding and may be empty.
    async fn describe(
        &self,
        image: &[u8],
        mime: &str,
        context: &str,
    ) -> Result<String, ModelError>;
}

/// Vision via an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiVision {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    request_timeout_secs: u64,
}

impl OpenAiVision {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            max_tokens: 500,
            request_timeout_secs: 60,
        }
    }

    /// Point at a different OpenAI-compatible server (trailing slash
    /// stripped).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs.max(1);
        self
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn describe(
        &self,
        image: &[u8],
        mime: &str,
        context: &str,
    ) -> Result<String, ModelError> {
        let data_uri = format!("data:{};base64,{}", mime, STANDARD.encode(image));
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": vision_prompt(context) },
                    { "type": "image_url", "image_url": { "url": data_uri } },
                ],
            }],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ModelError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                detail: truncate(&detail, 300),
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ModelError::Malformed("no message content in response".into()))
    }
}

/// Drive a describe call through the retry schedule.
///
/// Returns `None` once retries are exhausted or on the first non-retryable
/// error; the caller renders the region without a description.
pub async fn describe_with_retry(
    model: &dyn VisionModel,
    image: &[u8],
    mime: &str,
    context: &str,
    max_retries: u32,
    backoff_ms: u64,
) -> Option<String> {
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_ms * 2u64.pow(attempt - 1);
            warn!(attempt, max_retries, backoff_ms = backoff, "vision retry");
            sleep(Duration::from_millis(backoff)).await;
        }
        match model.describe(image, mime, context).await {
            Ok(description) => {
                debug!(len = description.len(), "image described");
                return Some(description);
            }
            Err(e) if e.is_retryable() => {
                warn!(attempt, error = %e, "vision call failed");
            }
            Err(e) => {
                warn!(error = %e, "vision call failed permanently");
                return None;
            }
        }
    }
    None
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyVision {
        calls: AtomicUsize,
        fail_first: usize,
        retryable: bool,
    }

    #[async_trait]
    impl VisionModel for FlakyVision {
        async fn describe(&self, _: &[u8], _: &str, _: &str) -> Result<String, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.retryable {
                    Err(ModelError::RateLimited)
                } else {
                    Err(ModelError::Status {
                        status: 401,
                        detail: "bad key".into(),
                    })
                }
            } else {
                Ok("a diagram of a pump".to_string())
            }
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let model = FlakyVision {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            retryable: true,
        };
        let result = describe_with_retry(&model, b"png", "image/png", "", 3, 1).await;
        assert_eq!(result.as_deref(), Some("a diagram of a pump"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retries() {
        let model = FlakyVision {
            calls: AtomicUsize::new(0),
            fail_first: 10,
            retryable: true,
        };
        let result = describe_with_retry(&model, b"png", "image/png", "", 2, 1).await;
        assert!(result.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let model = FlakyVision {
            calls: AtomicUsize::new(0),
            fail_first: 10,
            retryable: false,
        };
        let result = describe_with_retry(&model, b"png", "image/png", "", 3, 1).await;
        assert!(result.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }
}
