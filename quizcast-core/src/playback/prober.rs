//! Stream availability prober
//!
//! A stream manifest may be announced before the encoder has published
//! the first segment; attaching against a 404 turns a short spinner into
//! a user-visible failure. The prober issues lightweight HEAD checks
//! until the manifest answers or the attempts run out.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::StreamConfig;

/// Shared probe client: HEAD only, no redirects followed past the CDN
static PROBE_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build probe HTTP client")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The manifest answered with a success status
    Available,
    /// No attempt succeeded
    Exhausted,
    /// The caller lost interest before an attempt succeeded
    Cancelled,
}

/// Bounded fixed-interval availability prober.
#[derive(Debug, Clone)]
pub struct StreamProber {
    max_attempts: u32,
    interval: Duration,
}

impl StreamProber {
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.probe_max_attempts, config.probe_interval())
    }

    /// Probe `url` until it answers, attempts run out, or `cancel` fires.
    ///
    /// A cancelled probe must never be acted on: the caller's session may
    /// already have moved elsewhere.
    pub async fn probe(&self, url: &Url, cancel: &CancellationToken) -> ProbeOutcome {
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return ProbeOutcome::Cancelled;
            }

            let request = PROBE_CLIENT.head(url.clone()).send();
            let response = tokio::select! {
                () = cancel.cancelled() => return ProbeOutcome::Cancelled,
                response = request => response,
            };

            match response {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url = %url, attempt = attempt, "Stream available");
                    return ProbeOutcome::Available;
                }
                Ok(resp) => {
                    debug!(
                        url = %url,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        status = %resp.status(),
                        "Stream not available yet"
                    );
                }
                Err(e) => {
                    debug!(
                        url = %url,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        "Probe request failed: {e}"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::select! {
                    () = cancel.cancelled() => return ProbeOutcome::Cancelled,
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        warn!(url = %url, attempts = self.max_attempts, "Stream probe exhausted");
        ProbeOutcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober(attempts: u32) -> StreamProber {
        StreamProber::new(attempts, Duration::from_millis(10))
    }

    fn manifest_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/live/k1.m3u8", server.uri())).expect("url")
    }

    #[tokio::test]
    async fn test_available_returns_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/k1.m3u8"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = prober(3)
            .probe(&manifest_url(&server), &CancellationToken::new())
            .await;
        assert_eq!(outcome, ProbeOutcome::Available);
    }

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/k1.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/live/k1.m3u8"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = prober(5)
            .probe(&manifest_url(&server), &CancellationToken::new())
            .await;
        assert_eq!(outcome, ProbeOutcome::Available);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/k1.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = prober(3)
            .probe(&manifest_url(&server), &CancellationToken::new())
            .await;
        assert_eq!(outcome, ProbeOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_cancel_token_returns_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/k1.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let url = manifest_url(&server);
        let prober = StreamProber::new(1000, Duration::from_millis(20));
        let handle = tokio::spawn(async move { prober.probe(&url, &token).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        assert_eq!(handle.await.expect("join"), ProbeOutcome::Cancelled);
    }
}
