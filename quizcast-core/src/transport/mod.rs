//! Push-channel boundary
//!
//! Event types for the persistent push channel, the emit-side contract,
//! and the in-process channel transport. The concrete wire transport
//! lives in [`tcp`]; anything beyond event framing is the transport
//! layer's own business (including its reconnection policy).

pub mod tcp;

pub use tcp::TcpPushChannel;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::{Quiz, QuizId, SessionId};

/// Session status carried by `session_status_changed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Live,
    Ended,
    #[serde(other)]
    Other,
}

/// Events delivered by the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new quiz is open for answers
    NewQuiz {
        #[serde(flatten)]
        quiz: Quiz,
    },

    /// Broadcast whenever any viewer answers; carries the reveal payload
    NewQuizResponse {
        quiz_id: QuizId,
        correct_option: usize,
        selected_option: usize,
    },

    /// Direct reply to `request_quiz_result`
    QuizResult {
        quiz_id: QuizId,
        correct_option: usize,
        selected_option: usize,
    },

    /// Quiz removed server-side; it may be re-issued later
    QuizDeleted { quiz_id: QuizId },

    /// A session went live or ended
    SessionStatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },

    /// A spectator's secondary stream was approved
    SpectatorApproved { stream_key: String },

    /// The secondary stream stopped
    SpectatorStreamStopped,

    /// Viewer question posted (render collaborator)
    NewQuestion {
        question_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Host answered a question (render collaborator)
    NewAnswer {
        question_text: String,
        answer_text: String,
    },

    /// Show or hide the join QR code (render collaborator)
    ToggleQrCode { session_id: SessionId, show: bool },
}

impl ServerEvent {
    /// Short description of the event type, for logging
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::NewQuiz { .. } => "new_quiz",
            Self::NewQuizResponse { .. } => "new_quiz_response",
            Self::QuizResult { .. } => "quiz_result",
            Self::QuizDeleted { .. } => "quiz_deleted",
            Self::SessionStatusChanged { .. } => "session_status_changed",
            Self::SpectatorApproved { .. } => "spectator_approved",
            Self::SpectatorStreamStopped => "spectator_stream_stopped",
            Self::NewQuestion { .. } => "new_question",
            Self::NewAnswer { .. } => "new_answer",
            Self::ToggleQrCode { .. } => "toggle_qr_code",
        }
    }
}

/// Events this client emits on the push channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinSession {
        session_id: SessionId,
    },
    Question {
        session_id: SessionId,
        question_text: String,
    },
    QuizResponse {
        session_id: SessionId,
        quiz_id: QuizId,
        selected_option: usize,
    },
    RequestQuizResult {
        quiz_id: QuizId,
    },
}

impl ClientEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::JoinSession { .. } => "join_session",
            Self::Question { .. } => "question",
            Self::QuizResponse { .. } => "quiz_response",
            Self::RequestQuizResult { .. } => "request_quiz_result",
        }
    }
}

/// What the transport hands to the client loop
#[derive(Debug, Clone)]
pub enum TransportSignal {
    /// Push channel established (or re-established)
    Connected,
    /// Push channel lost; polling keeps state eventually consistent
    Disconnected,
    Event(ServerEvent),
}

/// Emit-side contract of the push channel.
///
/// Incoming events arrive separately as a [`TransportSignal`] stream;
/// the two halves are split so state machines can emit without owning
/// the receive loop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit(&self, event: ClientEvent) -> Result<()>;
}

/// In-process transport backed by a channel.
///
/// Used by tests and by embedders that bridge the push channel
/// themselves (e.g. through an existing connection pool).
pub struct ChannelTransport {
    tx: mpsc::Sender<ClientEvent>,
}

impl ChannelTransport {
    /// Returns the transport plus the receiver the embedder drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn emit(&self, event: ClientEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| Error::Transport(format!("push channel closed: {e}")))
    }
}
