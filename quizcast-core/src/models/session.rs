use serde::{Deserialize, Serialize};
use url::Url;

use super::id::SessionId;
use crate::config::StreamConfig;
use crate::error::{Error, Result};

/// One live broadcast session, as reported by the server.
///
/// Exactly one session is current at a time, or none. The stream locator
/// is either an explicit `hls_url` or a `stream_key` that resolves under
/// the configured stream base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Session {
    /// Resolve this session's HLS locator.
    ///
    /// An explicit `hls_url` wins over the `stream_key`. Plain-HTTP
    /// locators are upgraded to HTTPS when the config asks for it.
    pub fn stream_url(&self, stream: &StreamConfig) -> Result<Url> {
        if let Some(url) = &self.hls_url {
            parse_locator(url.clone(), stream)
        } else if let Some(key) = &self.stream_key {
            stream_key_url(stream, key)
        } else {
            Err(Error::InvalidStream(format!(
                "session {} has neither hls_url nor stream_key",
                self.id
            )))
        }
    }
}

/// Resolve a bare stream key to its manifest locator:
/// `{base}/{key}.m3u8`, tolerating a trailing slash on the base.
pub fn stream_key_url(stream: &StreamConfig, key: &str) -> Result<Url> {
    let raw = format!("{}/{key}.m3u8", stream.base_url.trim_end_matches('/'));
    parse_locator(raw, stream)
}

fn parse_locator(raw: String, stream: &StreamConfig) -> Result<Url> {
    let raw = if stream.force_https && raw.starts_with("http://") {
        raw.replacen("http://", "https://", 1)
    } else {
        raw
    };
    Ok(Url::parse(&raw)?)
}

/// Current-session snapshot payload: `{id, ...}` when a session is live,
/// empty or id-less otherwise.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentSessionResp {
    #[serde(default)]
    pub id: Option<SessionId>,
    #[serde(default)]
    pub stream_key: Option<String>,
    #[serde(default)]
    pub hls_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl CurrentSessionResp {
    /// Collapse the snapshot into `Some(Session)` iff it carries an id
    #[must_use]
    pub fn into_session(self) -> Option<Session> {
        self.id.map(|id| Session {
            id,
            stream_key: self.stream_key,
            hls_url: self.hls_url,
            title: self.title,
        })
    }
}
