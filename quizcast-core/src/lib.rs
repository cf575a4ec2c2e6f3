pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod notice;
pub mod playback;
pub mod quiz;
pub mod reconciler;
pub mod transport;

pub use client::{ViewerClient, ViewerCommand, ViewerHandle};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::AnswerLedger;
pub use notice::Notice;
