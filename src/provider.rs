//! HTTP plumbing shared by the embedding and LLM clients.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} not configured in environment")]
    MissingApiKey(&'static str),

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid {provider} response: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },
}

impl ProviderError {
    /// True when the failure is a deployment problem (missing key,
    /// disabled provider) rather than a failed call.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::MissingApiKey(_) | ProviderError::Disabled)
    }

    pub(crate) fn invalid(provider: &'static str, reason: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            provider,
            reason: reason.into(),
        }
    }
}

pub(crate) fn build_client(
    provider: &'static str,
    timeout_secs: u64,
) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|source| ProviderError::Transport { provider, source })
}

/// Send a request built by `build` and decode the JSON body, retrying
/// transient failures up to `max_retries` times.
///
/// `build` is called once per attempt because a sent `RequestBuilder`
/// is consumed.
pub(crate) async fn send_json_with_retry<F>(
    provider: &'static str,
    max_retries: u32,
    build: F,
) -> Result<serde_json::Value, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider, attempt, ?delay, "retrying provider request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| ProviderError::invalid(provider, e.to_string()));
                }

                let body = response.text().await.unwrap_or_default();
                let err = ProviderError::Api {
                    provider,
                    status: status.as_u16(),
                    body,
                };

                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(provider, status = status.as_u16(), "transient provider error");
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(source) => {
                tracing::warn!(provider, error = %source, "provider request failed");
                last_err = Some(ProviderError::Transport { provider, source });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::invalid(provider, "no attempts made")))
}
