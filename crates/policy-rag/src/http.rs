//! HTTP plumbing shared by the provider adapters.
//!
//! Retry policy for [`post_json_with_retry`]:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::warn;

pub(crate) fn build_client(timeout_secs: u64) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// POST `body` as JSON, retrying transient failures. Returns the first
/// successful response, or the last failure.
pub(crate) async fn post_json_with_retry(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
    max_retries: u32,
) -> Result<Response> {
    let mut last_err = anyhow!("request was not attempted");

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            warn!(url, attempt, delay_secs = delay.as_secs(), error = %last_err, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = anyhow!("HTTP {} from {}: {}", status, url, body_text);
                    continue;
                }
                bail!("HTTP {} from {}: {}", status, url, body_text);
            }
            Err(e) => {
                last_err = anyhow!(e).context(format!("request to {} failed", url));
            }
        }
    }

    Err(last_err)
}

/// The OpenAI API key from the environment.
pub(crate) fn openai_api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(20), Duration::from_secs(32));
    }
}
