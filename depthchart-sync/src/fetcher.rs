use crate::traits::PageSource;
use crate::types::{FetchConfig, Result, SyncError};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// HTTP page fetcher with retries.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    pub async fn fetch_html(&self, url: &str) -> Result<String> {
        let start_time = Instant::now();
        debug!("Fetching page: {}", url);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            let failure = match self.send(url).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.text().await {
                            Ok(body) => {
                                info!(
                                    "Fetched {} ({} bytes in {}ms)",
                                    url,
                                    body.len(),
                                    start_time.elapsed().as_millis()
                                );
                                return Ok(body);
                            }
                            Err(e) => SyncError::Http(e),
                        }
                    } else {
                        let failure = SyncError::Fetch {
                            url: url.to_string(),
                            message: format!("HTTP {}: {}", status.as_u16(), status.canonical_reason().unwrap_or("Unknown")),
                        };
                        // Client errors will not improve on retry.
                        if status.is_client_error() {
                            return Err(failure);
                        }
                        failure
                    }
                }
                Err(e) => e,
            };

            last_error = Some(failure);

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break;
        }

        error!("Failed to fetch page after {} attempts: {}", self.config.max_retries + 1, url);
        Err(last_error.unwrap_or_else(|| SyncError::Fetch {
            url: url.to_string(),
            message: "Unknown error".to_string(),
        }))
    }

    async fn send(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl PageSource for Fetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.fetch_html(url).await
    }
}

/// Pages served from memory, keyed by absolute URL. Unknown URLs fail the
/// way an unreachable host would.
#[derive(Debug, Clone, Default)]
pub struct StaticPages {
    pages: HashMap<String, String>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, html: impl Into<String>) {
        self.pages.insert(url.into(), html.into());
    }
}

#[async_trait]
impl PageSource for StaticPages {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.pages.get(url).cloned().ok_or_else(|| SyncError::Fetch {
            url: url.to_string(),
            message: "HTTP 404: Not Found".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_pages_serve_known_urls() {
        let pages = StaticPages::new().with_page("https://example.com/a", "<html>a</html>");

        assert_eq!(pages.fetch_page("https://example.com/a").await.unwrap(), "<html>a</html>");
        assert!(matches!(
            pages.fetch_page("https://example.com/b").await,
            Err(SyncError::Fetch { .. })
        ));
    }

    #[test]
    fn fetcher_builds_with_default_config() {
        assert!(Fetcher::new(FetchConfig::default()).is_ok());
    }
}
