use crate::config::ScraperConfig;
use crate::error::{CollectError, Result};
use rand::RngExt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Thin reqwest wrapper: one timeout budget for every call (scrape pages and
/// the CSV API alike), polite inter-request delay with jitter, and a small
/// retry loop for transient upstream trouble.
pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .map_err(|e| CollectError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.get_checked(url).await?;
        resp.text().await.map_err(|source| CollectError::Fetch {
            url: url.to_string(),
            source,
        })
    }

    /// Fetch a URL as raw bytes (CSV endpoint).
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.get_checked(url).await?;
        let bytes = resp.bytes().await.map_err(|source| CollectError::Fetch {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }

    async fn get_checked(&self, url: &str) -> Result<reqwest::Response> {
        self.polite_delay().await;

        let mut last_err = CollectError::Status {
            status: 0,
            url: url.to_string(),
        };

        for attempt in 1..=(self.config.max_retries + 1) {
            debug!("GET {} (attempt {})", url, attempt);

            match self.inner.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    last_err = CollectError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    };
                    if status.as_u16() != 429 && status.as_u16() != 503 {
                        break; // Don't retry 4xx/5xx other than 429/503
                    }
                    if attempt <= self.config.max_retries {
                        // Rate limited — back off harder
                        let backoff = Duration::from_millis(
                            self.config.request_delay_ms * (2u64.pow(attempt)),
                        );
                        warn!(
                            "Rate limited ({}) on attempt {}, sleeping {:?}",
                            status, attempt, backoff
                        );
                        sleep(backoff).await;
                    }
                }
                Err(source) => {
                    warn!("Request failed on attempt {}: {}", attempt, source);
                    last_err = CollectError::Fetch {
                        url: url.to_string(),
                        source,
                    };
                    // No point backing off after the last attempt
                    if attempt <= self.config.max_retries {
                        let backoff =
                            Duration::from_millis(self.config.request_delay_ms * (attempt as u64));
                        sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        sleep(Duration::from_millis(self.config.request_delay_ms + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn exhausted_retries_return_without_a_trailing_backoff() {
        let config = ScraperConfig {
            request_delay_ms: 200,
            jitter_ms: 0,
            max_retries: 1,
            timeout_secs: 1,
            ..ScraperConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();

        // Port 1 refuses instantly, so the elapsed time is all sleeps:
        // polite delay (200ms) + one inter-attempt backoff (200ms). A
        // backoff after the final attempt would push this past 600ms.
        let start = Instant::now();
        let err = client.get_text("http://127.0.0.1:1/").await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, CollectError::Fetch { .. }), "got {err:?}");
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    }
}
