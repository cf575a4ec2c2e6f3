//! Library-mediated HLS engine
//!
//! A small demux-and-feed engine for surfaces without native HLS
//! support: it resolves the manifest (following a master playlist to its
//! first variant), then tails the media playlist from the live edge,
//! fetching new segments in order and appending their bytes to the
//! surface. Decoding the fed bytes remains the surface's problem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bytes::Bytes;
use m3u8_rs::{MediaPlaylist, Playlist};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::strategy::{EngineFactory, HlsEngine, MediaSurface, StrategyEvent};
use crate::config::EngineConfig;
use crate::error::{check_response, Error, Result};

/// Consecutive manifest/segment failures before the engine gives up and
/// reports a fatal error
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Playlist refresh cadence when the manifest reports no target duration
const DEFAULT_REFRESH: Duration = Duration::from_secs(2);

static FEED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .pool_max_idle_per_host(4)
        .build()
        .expect("Failed to build segment HTTP client")
});

/// One single-use engine instance. Recovery destroys it and builds a
/// fresh one from [`SegmentFeedFactory`] with identical configuration.
pub struct SegmentFeedEngine {
    config: EngineConfig,
    surface: Option<Arc<dyn MediaSurface>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    live_seek: Arc<AtomicBool>,
    destroyed: bool,
}

impl SegmentFeedEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            surface: None,
            cancel: CancellationToken::new(),
            task: None,
            live_seek: Arc::new(AtomicBool::new(false)),
            destroyed: false,
        }
    }

    async fn halt_feed(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Segment feed task ended abnormally: {e}");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl HlsEngine for SegmentFeedEngine {
    async fn attach(&mut self, surface: Arc<dyn MediaSurface>) {
        self.surface = Some(surface);
    }

    async fn load(&mut self, url: &Url, events: mpsc::Sender<StrategyEvent>) -> Result<()> {
        if self.destroyed {
            return Err(Error::Playback(
                "engine instance already destroyed".to_string(),
            ));
        }
        let surface = self
            .surface
            .clone()
            .ok_or_else(|| Error::Playback("load before attach".to_string()))?;

        let (playlist_url, playlist) = resolve_media_playlist(url).await?;
        info!(
            url = %playlist_url,
            segments = playlist.segments.len(),
            media_sequence = playlist.media_sequence,
            "Manifest accepted"
        );

        surface.play().await?;

        let feed = FeedLoop {
            playlist_url,
            surface,
            config: self.config.clone(),
            events,
            cancel: self.cancel.child_token(),
            live_seek: Arc::clone(&self.live_seek),
        };
        self.task = Some(tokio::spawn(feed.run(playlist)));
        Ok(())
    }

    async fn stop_load(&mut self) {
        self.halt_feed().await;
    }

    async fn detach(&mut self) {
        self.surface = None;
    }

    async fn destroy(&mut self) {
        self.halt_feed().await;
        self.surface = None;
        self.destroyed = true;
    }

    async fn seek_to_live(&mut self) {
        self.live_seek.store(true, Ordering::SeqCst);
    }
}

/// Builds [`SegmentFeedEngine`] instances.
pub struct SegmentFeedFactory;

impl EngineFactory for SegmentFeedFactory {
    fn create(&self, config: &EngineConfig) -> Box<dyn HlsEngine> {
        Box::new(SegmentFeedEngine::new(config.clone()))
    }
}

/// Fetch `url`; if it is a master playlist, follow the first variant.
async fn resolve_media_playlist(url: &Url) -> Result<(Url, MediaPlaylist)> {
    let body = fetch_bytes(url).await?;
    match m3u8_rs::parse_playlist_res(&body)
        .map_err(|e| Error::Parse(format!("invalid manifest at {url}: {e:?}")))?
    {
        Playlist::MediaPlaylist(playlist) => Ok((url.clone(), playlist)),
        Playlist::MasterPlaylist(master) => {
            let variant = master.variants.first().ok_or_else(|| {
                Error::Parse(format!("master playlist at {url} has no variants"))
            })?;
            let variant_url = url.join(&variant.uri)?;
            debug!(variant = %variant_url, "Following master playlist variant");
            let body = fetch_bytes(&variant_url).await?;
            let playlist = m3u8_rs::parse_media_playlist_res(&body).map_err(|e| {
                Error::Parse(format!("invalid media playlist at {variant_url}: {e:?}"))
            })?;
            Ok((variant_url, playlist))
        }
    }
}

async fn fetch_bytes(url: &Url) -> Result<Bytes> {
    let response = FEED_CLIENT.get(url.clone()).send().await?;
    let response = check_response(response)?;
    Ok(response.bytes().await?)
}

struct FeedLoop {
    playlist_url: Url,
    surface: Arc<dyn MediaSurface>,
    config: EngineConfig,
    events: mpsc::Sender<StrategyEvent>,
    cancel: CancellationToken,
    live_seek: Arc<AtomicBool>,
}

impl FeedLoop {
    async fn run(self, initial: MediaPlaylist) {
        let mut playlist = initial;
        let mut failures: u32 = 0;
        // Cursor over media sequence numbers; starts near the live edge
        let mut cursor = live_edge(&playlist)
            .saturating_sub(self.config.live_sync_segment_count as u64)
            .max(playlist.media_sequence);

        loop {
            if self.live_seek.swap(false, Ordering::SeqCst) {
                let target = live_edge(&playlist)
                    .saturating_sub(self.config.live_sync_segment_count as u64);
                debug!(from = cursor, to = target, "Seeking to live edge");
                cursor = cursor.max(target);
            }

            // Latency control: never trail the edge by more than allowed
            let edge = live_edge(&playlist);
            let max_latency = self.config.live_max_latency_segment_count as u64;
            if edge.saturating_sub(cursor) > max_latency {
                debug!(from = cursor, to = edge - max_latency, "Jumping forward to bound latency");
                cursor = edge - max_latency;
            }

            match self.feed_new_segments(&playlist, &mut cursor).await {
                Ok(()) => {}
                Err(FeedError::Cancelled) => return,
                Err(FeedError::Fatal(detail)) => {
                    let _ = self.events.send(StrategyEvent::Fatal { detail }).await;
                    return;
                }
                Err(FeedError::Transient(detail)) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        let _ = self.events.send(StrategyEvent::Fatal { detail }).await;
                        return;
                    }
                    let _ = self
                        .events
                        .send(StrategyEvent::NonFatal { detail })
                        .await;
                }
            }

            if playlist.end_list {
                let _ = self
                    .events
                    .send(StrategyEvent::Fatal {
                        detail: "stream ended (ENDLIST)".to_string(),
                    })
                    .await;
                return;
            }

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(refresh_interval(&playlist)) => {}
            }

            match self.refresh_playlist().await {
                Ok(fresh) => {
                    failures = 0;
                    playlist = fresh;
                }
                Err(FeedError::Cancelled) => return,
                Err(FeedError::Fatal(detail) | FeedError::Transient(detail)) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        let _ = self
                            .events
                            .send(StrategyEvent::Fatal {
                                detail: format!("manifest unavailable: {detail}"),
                            })
                            .await;
                        return;
                    }
                    let _ = self
                        .events
                        .send(StrategyEvent::NonFatal { detail })
                        .await;
                }
            }
        }
    }

    /// Fetch and feed every segment between the cursor and the edge.
    async fn feed_new_segments(
        &self,
        playlist: &MediaPlaylist,
        cursor: &mut u64,
    ) -> std::result::Result<(), FeedError> {
        let first = playlist.media_sequence;
        let edge = live_edge(playlist);

        while *cursor < edge {
            if self.cancel.is_cancelled() {
                return Err(FeedError::Cancelled);
            }
            // A sliding window may have dropped segments we never fed
            if *cursor < first {
                debug!(from = *cursor, to = first, "Segments expired from playlist window");
                *cursor = first;
                continue;
            }

            let segment = &playlist.segments[(*cursor - first) as usize];
            let segment_url = self
                .playlist_url
                .join(&segment.uri)
                .map_err(|e| FeedError::Fatal(format!("bad segment uri {}: {e}", segment.uri)))?;

            let data = tokio::select! {
                () = self.cancel.cancelled() => return Err(FeedError::Cancelled),
                data = fetch_bytes(&segment_url) => data,
            };

            match data {
                Ok(data) => {
                    debug!(sequence = *cursor, bytes = data.len(), "Segment fed");
                    if let Err(e) = self.surface.feed(data).await {
                        // The surface rejecting media is a decode-class failure
                        return Err(FeedError::Fatal(format!("surface rejected media: {e}")));
                    }
                    *cursor += 1;
                }
                Err(e) => {
                    return Err(FeedError::Transient(format!(
                        "segment {} failed: {e}",
                        segment_url
                    )));
                }
            }
        }
        Ok(())
    }

    async fn refresh_playlist(&self) -> std::result::Result<MediaPlaylist, FeedError> {
        let body = tokio::select! {
            () = self.cancel.cancelled() => return Err(FeedError::Cancelled),
            body = fetch_bytes(&self.playlist_url) => body,
        }
        .map_err(|e| FeedError::Transient(e.to_string()))?;

        m3u8_rs::parse_media_playlist_res(&body)
            .map_err(|e| FeedError::Transient(format!("manifest parse failed: {e:?}")))
    }
}

enum FeedError {
    Cancelled,
    Transient(String),
    Fatal(String),
}

/// One past the last available media sequence number
fn live_edge(playlist: &MediaPlaylist) -> u64 {
    playlist.media_sequence + playlist.segments.len() as u64
}

fn refresh_interval(playlist: &MediaPlaylist) -> Duration {
    if playlist.target_duration > 0 {
        // Half the target duration keeps a live tail responsive without
        // hammering the origin
        Duration::from_secs_f64((playlist.target_duration as f64 / 2.0).max(0.5))
    } else {
        DEFAULT_REFRESH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::strategy::MockMediaSurface;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MEDIA_PLAYLIST: &str = "#EXTM3U\n\
        #EXT-X-VERSION:3\n\
        #EXT-X-TARGETDURATION:2\n\
        #EXT-X-MEDIA-SEQUENCE:10\n\
        #EXTINF:2.0,\nseg10.ts\n\
        #EXTINF:2.0,\nseg11.ts\n\
        #EXTINF:2.0,\nseg12.ts\n";

    const MASTER_PLAYLIST: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=800000\n\
        variant/index.m3u8\n";

    async fn mount_playlist(server: &MockServer, p: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_segments(server: &MockServer) {
        for seg in ["seg10.ts", "seg11.ts", "seg12.ts"] {
            Mock::given(method("GET"))
                .and(path(format!("/live/{seg}")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
                .mount(server)
                .await;
        }
    }

    fn feeding_surface() -> MockMediaSurface {
        let mut surface = MockMediaSurface::new();
        surface.expect_play().returning(|| Ok(()));
        surface.expect_feed().returning(|_| Ok(()));
        surface
    }

    #[tokio::test]
    async fn test_load_resolves_media_playlist_and_feeds() {
        let server = MockServer::start().await;
        mount_playlist(&server, "/live/k1.m3u8", MEDIA_PLAYLIST).await;
        mount_segments(&server).await;

        let mut engine = SegmentFeedEngine::new(EngineConfig::default());
        engine.attach(Arc::new(feeding_surface())).await;

        let url = Url::parse(&format!("{}/live/k1.m3u8", server.uri())).expect("url");
        let (tx, mut rx) = mpsc::channel(8);
        engine.load(&url, tx).await.expect("load");

        // Give the feed loop a moment, then tear down; no fatal error
        // may have been reported for a healthy playlist
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.destroy().await;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, StrategyEvent::NonFatal { .. }));
        }
    }

    #[tokio::test]
    async fn test_load_follows_master_playlist() {
        let server = MockServer::start().await;
        mount_playlist(&server, "/live/k1.m3u8", MASTER_PLAYLIST).await;
        mount_playlist(&server, "/live/variant/index.m3u8", MEDIA_PLAYLIST).await;

        let url = Url::parse(&format!("{}/live/k1.m3u8", server.uri())).expect("url");
        let (resolved, playlist) = resolve_media_playlist(&url).await.expect("resolve");
        assert!(resolved.as_str().ends_with("/live/variant/index.m3u8"));
        assert_eq!(playlist.media_sequence, 10);
        assert_eq!(playlist.segments.len(), 3);
    }

    #[tokio::test]
    async fn test_load_fails_on_missing_manifest() {
        let server = MockServer::start().await;
        let mut engine = SegmentFeedEngine::new(EngineConfig::default());
        engine.attach(Arc::new(feeding_surface())).await;

        let url = Url::parse(&format!("{}/live/gone.m3u8", server.uri())).expect("url");
        let (tx, _rx) = mpsc::channel(8);
        assert!(engine.load(&url, tx).await.is_err());
    }

    #[tokio::test]
    async fn test_destroyed_engine_refuses_load() {
        let server = MockServer::start().await;
        mount_playlist(&server, "/live/k1.m3u8", MEDIA_PLAYLIST).await;

        let mut engine = SegmentFeedEngine::new(EngineConfig::default());
        engine.attach(Arc::new(feeding_surface())).await;
        engine.destroy().await;

        let url = Url::parse(&format!("{}/live/k1.m3u8", server.uri())).expect("url");
        let (tx, _rx) = mpsc::channel(8);
        assert!(engine.load(&url, tx).await.is_err());
    }

    #[test]
    fn test_live_edge_and_refresh_interval() {
        let playlist =
            m3u8_rs::parse_media_playlist_res(MEDIA_PLAYLIST.as_bytes()).expect("parse");
        assert_eq!(live_edge(&playlist), 13);
        assert_eq!(refresh_interval(&playlist), Duration::from_secs(1));
    }
}
