//! Playback strategies
//!
//! Two ways to get an HLS stream onto a presentation surface, selected
//! once at engine construction: hand the URL to a surface that speaks
//! HLS natively, or run a demux/buffer engine that feeds the surface
//! segment bytes. Both expose the same contract; the reconciler never
//! sees which one is in use.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::Result;

/// Errors reported asynchronously by a running strategy.
///
/// `Fatal` means the stream cannot continue without a full reattachment;
/// `NonFatal` is logged and otherwise ignored.
#[derive(Debug, Clone)]
pub enum StrategyEvent {
    Fatal { detail: String },
    NonFatal { detail: String },
}

/// The host presentation element, at its interface boundary.
///
/// Decode and render of whatever is loaded or fed here is the host
/// platform's problem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSurface: Send + Sync {
    /// Whether the host element can play an HLS locator directly
    fn supports_native_hls(&self) -> bool;

    /// Native path: hand the locator to the element. Host-side fatal
    /// errors are reported through `errors`.
    async fn load_native(
        &self,
        url: &Url,
        errors: mpsc::Sender<StrategyEvent>,
    ) -> Result<()>;

    /// Library path: append demuxed media bytes
    async fn feed(&self, data: Bytes) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self);

    /// Drop the current source and release decode resources
    async fn clear(&self);
}

/// A demux/buffering engine instance bound to one surface.
///
/// Instances are single-use: after `destroy` the engine is gone, and
/// recovery builds a fresh one from the factory with identical
/// configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HlsEngine: Send {
    /// Bind to the surface that receives fed media data
    async fn attach(&mut self, surface: Arc<dyn MediaSurface>);

    /// Fetch and parse the manifest, begin loading, start playback.
    /// Returns once playback has started; later failures arrive on
    /// `events`.
    async fn load(
        &mut self,
        url: &Url,
        events: mpsc::Sender<StrategyEvent>,
    ) -> Result<()>;

    /// Stop fetching segments, keep the attachment
    async fn stop_load(&mut self);

    /// Unbind from the surface
    async fn detach(&mut self);

    /// Release every engine resource; the instance is dead afterwards
    async fn destroy(&mut self);

    /// Resume segment loading at the live edge
    async fn seek_to_live(&mut self);
}

/// Builds engine instances with a fixed configuration, so recovery can
/// replace a dead instance with an identical one.
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> Box<dyn HlsEngine>;
}

/// The strategy contract the playback engine drives.
///
/// `start` returns once the manifest is accepted and playback has
/// started; fatal errors after that point arrive on the per-start event
/// channel, which also scopes stale events out when a start is
/// superseded.
#[async_trait]
pub trait PlaybackStrategy: Send {
    async fn start(&mut self, url: &Url, events: mpsc::Sender<StrategyEvent>) -> Result<()>;

    /// Full teardown. Idempotent; valid in any state.
    async fn stop(&mut self);

    /// Resume playback at the live edge (library path only; a no-op on
    /// the native path, where the host element owns the live position)
    async fn seek_to_live(&mut self);
}

/// Delegate entirely to the host media element.
pub struct NativeStrategy {
    surface: Arc<dyn MediaSurface>,
}

impl NativeStrategy {
    #[must_use]
    pub fn new(surface: Arc<dyn MediaSurface>) -> Self {
        Self { surface }
    }
}

#[async_trait]
impl PlaybackStrategy for NativeStrategy {
    async fn start(&mut self, url: &Url, events: mpsc::Sender<StrategyEvent>) -> Result<()> {
        self.surface.load_native(url, events).await?;
        self.surface.play().await
    }

    async fn stop(&mut self) {
        self.surface.pause().await;
        self.surface.clear().await;
    }

    async fn seek_to_live(&mut self) {
        debug!("seek-to-live is a no-op on the native path");
    }
}

/// Explicit demux/buffer management through an [`HlsEngine`].
pub struct EngineStrategy {
    surface: Arc<dyn MediaSurface>,
    factory: Arc<dyn EngineFactory>,
    config: EngineConfig,
    engine: Option<Box<dyn HlsEngine>>,
}

impl EngineStrategy {
    #[must_use]
    pub fn new(
        surface: Arc<dyn MediaSurface>,
        factory: Arc<dyn EngineFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            surface,
            factory,
            config,
            engine: None,
        }
    }

    /// Release the attached instance completely. At most one
    /// non-destroyed instance may exist per surface, so this must finish
    /// before a new instance attaches.
    async fn release_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.stop_load().await;
            engine.detach().await;
            engine.destroy().await;
        }
    }
}

#[async_trait]
impl PlaybackStrategy for EngineStrategy {
    async fn start(&mut self, url: &Url, events: mpsc::Sender<StrategyEvent>) -> Result<()> {
        if self.engine.is_some() {
            warn!("Engine instance still attached at start; releasing it first");
            self.release_engine().await;
        }

        let mut engine = self.factory.create(&self.config);
        engine.attach(Arc::clone(&self.surface)).await;
        match engine.load(url, events).await {
            Ok(()) => {
                self.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                // The half-attached instance must not outlive the failure
                engine.stop_load().await;
                engine.detach().await;
                engine.destroy().await;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) {
        self.release_engine().await;
        self.surface.pause().await;
        self.surface.clear().await;
    }

    async fn seek_to_live(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.seek_to_live().await;
            if let Err(e) = self.surface.play().await {
                warn!("Resume after seek-to-live failed: {e}");
            }
        }
    }
}

/// Pick the strategy for a surface, once, at engine construction.
#[must_use]
pub fn select_strategy(
    surface: Arc<dyn MediaSurface>,
    factory: Arc<dyn EngineFactory>,
    config: &EngineConfig,
) -> Box<dyn PlaybackStrategy> {
    if surface.supports_native_hls() {
        debug!("Native HLS support detected");
        Box::new(NativeStrategy::new(surface))
    } else {
        debug!("Using library-mediated playback engine");
        Box::new(EngineStrategy::new(surface, factory, config.clone()))
    }
}
