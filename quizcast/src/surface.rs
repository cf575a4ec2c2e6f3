//! Headless presentation surface
//!
//! Stands in for a real media element when the client runs from a
//! terminal: it accepts fed media bytes and keeps playback counters for
//! the logs. Useful for soak-testing session switching and recovery
//! without a decoder attached.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use quizcast_core::playback::{MediaSurface, StrategyEvent};
use quizcast_core::Result;

/// Bytes between "still receiving media" log lines
const LOG_EVERY_BYTES: u64 = 4 * 1024 * 1024;

pub struct HeadlessSurface {
    name: &'static str,
    bytes_fed: AtomicU64,
    last_logged: AtomicU64,
}

impl HeadlessSurface {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            bytes_fed: AtomicU64::new(0),
            last_logged: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MediaSurface for HeadlessSurface {
    fn supports_native_hls(&self) -> bool {
        // No decoder here; always take the library-mediated path
        false
    }

    async fn load_native(&self, url: &Url, _errors: mpsc::Sender<StrategyEvent>) -> Result<()> {
        info!(surface = self.name, url = %url, "Native source set");
        Ok(())
    }

    async fn feed(&self, data: Bytes) -> Result<()> {
        let total = self
            .bytes_fed
            .fetch_add(data.len() as u64, Ordering::Relaxed)
            + data.len() as u64;
        let last = self.last_logged.load(Ordering::Relaxed);
        if total - last >= LOG_EVERY_BYTES
            && self
                .last_logged
                .compare_exchange(last, total, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            info!(surface = self.name, total_bytes = total, "Receiving media");
        }
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        info!(surface = self.name, "Playback running");
        Ok(())
    }

    async fn pause(&self) {
        debug!(surface = self.name, "Playback paused");
    }

    async fn clear(&self) {
        self.bytes_fed.store(0, Ordering::Relaxed);
        self.last_logged.store(0, Ordering::Relaxed);
        debug!(surface = self.name, "Source cleared");
    }
}
