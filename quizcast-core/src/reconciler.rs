//! Session reconciler
//!
//! Single source of truth for the current session id. Two independent
//! sources report session identity: the periodic poll snapshot and push
//! events. Acceptance is keyed purely on id difference, never on which
//! source reported it, so the fast path (push) and the backstop
//! (polling) cannot diverge.

use tracing::{debug, info};
use url::Url;

use crate::config::StreamConfig;
use crate::models::{Session, SessionId};
use crate::notice::Notice;
use crate::transport::{ClientEvent, SessionStatus};

/// Side effects a session transition asks the caller to perform, in
/// order. Join precedes playback start so no push event is missed during
/// the playback handshake window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Emit(ClientEvent),
    StartPlayback(Url),
    StopPlayback,
    /// Drop the tracked quiz (its ledger entry stays)
    ClearQuiz,
    FetchQuizzes(SessionId),
    /// Push reported an id we don't track; only the poll snapshot
    /// carries the stream locator, so refresh it now
    PollNow,
    Notify(Notice),
}

/// Owns the tracked current session.
#[derive(Debug, Default)]
pub struct SessionReconciler {
    current: Option<Session>,
}

impl SessionReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current_id(&self) -> Option<&SessionId> {
        self.current.as_ref().map(|s| &s.id)
    }

    /// Reconcile against an authoritative snapshot (from the poll, or a
    /// poll forced by a push report).
    ///
    /// A snapshot id equal to the tracked id changes nothing; a
    /// differing id adopts the new session; an empty snapshot while
    /// tracking leaves the session.
    pub fn apply_snapshot(
        &mut self,
        snapshot: Option<Session>,
        stream: &StreamConfig,
    ) -> Vec<SessionAction> {
        match snapshot {
            Some(session) => {
                if self.current_id() == Some(&session.id) {
                    debug!(session_id = %session.id, "Snapshot confirms tracked session");
                    return Vec::new();
                }
                self.adopt(session, stream)
            }
            None => {
                if self.current.is_none() {
                    return Vec::new();
                }
                self.leave()
            }
        }
    }

    /// Reconcile against a push report of session identity.
    ///
    /// `live` for an untracked id forces a snapshot refresh (the event
    /// carries no stream locator); `ended` for the tracked id leaves the
    /// session immediately.
    pub fn apply_status_change(
        &mut self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Vec<SessionAction> {
        match status {
            SessionStatus::Live => {
                if self.current_id() == Some(session_id) {
                    Vec::new()
                } else {
                    info!(session_id = %session_id, "Push reports a new live session");
                    vec![SessionAction::PollNow]
                }
            }
            SessionStatus::Ended => {
                if self.current_id() == Some(session_id) {
                    info!(session_id = %session_id, "Push reports tracked session ended");
                    self.leave()
                } else {
                    Vec::new()
                }
            }
            SessionStatus::Other => Vec::new(),
        }
    }

    fn adopt(&mut self, session: Session, stream: &StreamConfig) -> Vec<SessionAction> {
        info!(
            session_id = %session.id,
            replaces = ?self.current_id().map(SessionId::as_str),
            "Adopting session"
        );

        let mut actions = vec![SessionAction::Emit(ClientEvent::JoinSession {
            session_id: session.id.clone(),
        })];
        match session.stream_url(stream) {
            Ok(url) => actions.push(SessionAction::StartPlayback(url)),
            // A session without a usable locator still joins and serves
            // quizzes; playback just stays down
            Err(e) => {
                debug!(session_id = %session.id, "No playable stream locator: {e}");
                actions.push(SessionAction::StopPlayback);
            }
        }
        actions.push(SessionAction::ClearQuiz);
        actions.push(SessionAction::FetchQuizzes(session.id.clone()));

        self.current = Some(session);
        actions
    }

    fn leave(&mut self) -> Vec<SessionAction> {
        let left = self.current.take();
        info!(session_id = ?left.map(|s| s.id.as_str().to_string()), "Leaving session");
        vec![
            SessionAction::StopPlayback,
            SessionAction::ClearQuiz,
            SessionAction::Notify(Notice::NoLiveSession),
        ]
    }
}
