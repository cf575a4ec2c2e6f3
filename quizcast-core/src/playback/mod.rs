pub mod engine;
pub mod hls;
pub mod prober;
pub mod strategy;

pub use engine::{PlaybackEngine, PlaybackState, RestartPolicy};
pub use hls::{SegmentFeedEngine, SegmentFeedFactory};
pub use prober::{ProbeOutcome, StreamProber};
pub use strategy::{
    EngineFactory, HlsEngine, MediaSurface, PlaybackStrategy, StrategyEvent,
};
