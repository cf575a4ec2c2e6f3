//! Quiz state machine
//!
//! Tracks the lifecycle of the current quiz (none → open → answered →
//! revealed → closed) against the answered-quiz ledger. Handlers are
//! pure transitions from (state, event) to (next state, side-effect
//! list); the caller performs the emissions, which keeps every guard
//! unit-testable without a live transport.

use tracing::{debug, info, warn};

use crate::ledger::AnswerLedger;
use crate::models::{Quiz, QuizId, QuizViewState, SessionId};
use crate::notice::Notice;
use crate::transport::ClientEvent;

/// Side effects a quiz transition asks the caller to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizAction {
    Emit(ClientEvent),
    Notify(Notice),
}

/// The viewer's quiz widget state.
pub struct QuizMachine {
    ledger: AnswerLedger,
    current: Option<Quiz>,
}

impl QuizMachine {
    #[must_use]
    pub const fn new(ledger: AnswerLedger) -> Self {
        Self {
            ledger,
            current: None,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&Quiz> {
        self.current.as_ref()
    }

    /// Derived from the quiz plus the ledger; never stored on its own.
    #[must_use]
    pub fn view_state(&self) -> Option<QuizViewState> {
        self.current
            .as_ref()
            .map(|quiz| quiz.view_state(self.ledger.contains(&quiz.id)))
    }

    /// Track a newly delivered quiz.
    ///
    /// An id already in the ledger goes straight to pending-result and
    /// asks the server for the reveal: the ledger only remembers *that*
    /// an answer was given, the server remains the source of truth for
    /// *what* the correct answer is.
    pub fn present(&mut self, quiz: Quiz) -> Vec<QuizAction> {
        let answered = self.ledger.contains(&quiz.id);
        info!(quiz_id = %quiz.id, answered = answered, "Quiz presented");

        let mut actions = Vec::new();
        if answered {
            actions.push(QuizAction::Emit(ClientEvent::RequestQuizResult {
                quiz_id: quiz.id.clone(),
            }));
        }
        self.current = Some(quiz);
        actions
    }

    /// Submit the viewer's choice.
    ///
    /// Valid only while a session is current, for the tracked quiz id,
    /// in the `Open` state, with an option that exists. Anything else is
    /// a silent no-op: stale controls right after a session ends and
    /// double-activation (click plus key-press) are normal races, not
    /// errors.
    pub fn submit(
        &mut self,
        session: Option<&SessionId>,
        quiz_id: &QuizId,
        selected_option: usize,
    ) -> Vec<QuizAction> {
        let Some(session_id) = session else {
            debug!(quiz_id = %quiz_id, "Submission ignored: no current session");
            return Vec::new();
        };
        let Some(quiz) = self.current.as_mut() else {
            debug!(quiz_id = %quiz_id, "Submission ignored: no quiz tracked");
            return Vec::new();
        };
        if quiz.id != *quiz_id {
            debug!(quiz_id = %quiz_id, tracked = %quiz.id, "Submission ignored: stale quiz id");
            return Vec::new();
        }
        if selected_option >= quiz.options.len() {
            warn!(
                quiz_id = %quiz_id,
                selected_option = selected_option,
                options = quiz.options.len(),
                "Submission ignored: option out of range"
            );
            return Vec::new();
        }
        if self.ledger.contains(quiz_id) {
            debug!(quiz_id = %quiz_id, "Submission ignored: already answered");
            return vec![QuizAction::Notify(Notice::AlreadyAnswered)];
        }

        // Record before emitting: a crash between the two forfeits the
        // answer rather than risking a double submission
        if let Err(e) = self.ledger.record(quiz_id.clone()) {
            warn!(quiz_id = %quiz_id, "Ledger write failed: {e}");
        }
        quiz.selected_option = Some(selected_option);
        info!(quiz_id = %quiz_id, selected_option = selected_option, "Answer submitted");

        vec![
            QuizAction::Emit(ClientEvent::QuizResponse {
                session_id: session_id.clone(),
                quiz_id: quiz_id.clone(),
                selected_option,
            }),
            QuizAction::Notify(Notice::AnswerSent),
        ]
    }

    /// Apply a reveal carried by `quiz_result` or the `new_quiz_response`
    /// broadcast. Only applies to the tracked quiz while the viewer's
    /// own answer is pending; the broadcast fires for every viewer's
    /// answer, so an open quiz must stay answerable.
    pub fn apply_result(
        &mut self,
        quiz_id: &QuizId,
        correct_option: usize,
        selected_option: usize,
    ) -> Vec<QuizAction> {
        let answered = self
            .current
            .as_ref()
            .is_some_and(|q| q.id == *quiz_id && self.ledger.contains(&q.id));
        let Some(quiz) = self.current.as_mut() else {
            return Vec::new();
        };
        if !answered {
            debug!(quiz_id = %quiz_id, "Result ignored: not the pending quiz");
            return Vec::new();
        }
        if quiz.correct_option.is_some() {
            debug!(quiz_id = %quiz_id, "Result ignored: already revealed");
            return Vec::new();
        }

        quiz.correct_option = Some(correct_option);
        quiz.selected_option = Some(selected_option);
        info!(
            quiz_id = %quiz_id,
            correct_option = correct_option,
            selected_option = selected_option,
            "Quiz revealed"
        );
        vec![QuizAction::Notify(Notice::ResultAvailable)]
    }

    /// A quiz was deleted server-side. Clearing its ledger entry lets a
    /// re-issued quiz with the same id be answered again.
    pub fn apply_deleted(&mut self, quiz_id: &QuizId) -> Vec<QuizAction> {
        if let Err(e) = self.ledger.remove(quiz_id) {
            warn!(quiz_id = %quiz_id, "Ledger removal failed: {e}");
        }
        let tracked = self.current.as_ref().is_some_and(|q| q.id == *quiz_id);
        if !tracked {
            return Vec::new();
        }

        info!(quiz_id = %quiz_id, "Tracked quiz deleted");
        self.current = None;
        vec![QuizAction::Notify(Notice::QuizDeleted)]
    }

    /// Drop the tracked quiz without touching the ledger (session left).
    pub fn clear(&mut self) {
        if self.current.take().is_some() {
            debug!("Quiz cleared with the session");
        }
    }
}
