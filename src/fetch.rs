use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::FetchSettings;
use crate::error::PipelineError;

/// HTTP page fetcher with an explicit timeout and bounded retries.
pub struct Fetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
}

enum Attempt {
    Done(String),
    Retry(String),
    Fail(String),
}

impl Fetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| PipelineError::Fetch {
                url: String::new(),
                reason: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            max_retries: settings.max_retries,
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
        })
    }

    /// GET `url` and return the body. Retries transport errors, 429 and 5xx.
    pub async fn get_text(&self, url: &str) -> Result<String, PipelineError> {
        let mut attempt = 0;
        loop {
            let reason = match self.attempt(url).await {
                Attempt::Done(body) => return Ok(body),
                Attempt::Fail(reason) => {
                    return Err(PipelineError::Fetch {
                        url: url.to_string(),
                        reason,
                    })
                }
                Attempt::Retry(reason) => reason,
            };

            if attempt >= self.max_retries {
                return Err(PipelineError::Fetch {
                    url: url.to_string(),
                    reason: format!("{} (gave up after {} attempts)", reason, attempt + 1),
                });
            }

            let wait = backoff(self.base_backoff, attempt);
            warn!(
                "Fetch of {} failed: {} (attempt {}/{}), backing off {:.1}s",
                url,
                reason,
                attempt + 1,
                self.max_retries,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(e.to_string()),
        };
        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if !status.is_success() {
            let reason = format!("HTTP {}", status);
            return if should_retry(status) {
                Attempt::Retry(reason)
            } else {
                Attempt::Fail(reason)
            };
        }
        match response.text().await {
            Ok(body) => Attempt::Done(body),
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_rate_limits_and_server_errors_only() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry(StatusCode::NOT_FOUND));
        assert!(!should_retry(StatusCode::FORBIDDEN));
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(2000);
        assert_eq!(backoff(base, 0), Duration::from_millis(2000));
        assert_eq!(backoff(base, 1), Duration::from_millis(4000));
        assert_eq!(backoff(base, 3), Duration::from_millis(16000));
    }

    #[tokio::test]
    async fn unreachable_host_fails_after_retries() {
        let fetcher = Fetcher::new(&FetchSettings {
            timeout_secs: 1,
            max_retries: 1,
            base_backoff_ms: 1,
            user_agent: "test".into(),
        })
        .unwrap();
        // port 9 (discard) on localhost is closed in test environments
        let err = fetcher.get_text("http://127.0.0.1:9/notes").await.unwrap_err();
        match err {
            PipelineError::Fetch { url, reason } => {
                assert_eq!(url, "http://127.0.0.1:9/notes");
                assert!(reason.contains("gave up after 2 attempts"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
