use serde::{Deserialize, Serialize};

use super::id::QuizId;

/// One quiz as delivered by a push event or the quiz-list fetch.
///
/// `correct_option` is absent until the reveal; `selected_option` is the
/// viewer's own choice and only known locally (or from a result event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub question: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<usize>,
}

/// Derived view of the current quiz; never stored independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizViewState {
    /// Accepting input
    Open,
    /// Submitted locally, correct answer not yet known
    AnsweredPendingResult,
    /// Correct and selected options both known, input disabled
    Revealed,
}

impl Quiz {
    /// Derive the view state from this quiz plus the answered flag from
    /// the ledger.
    #[must_use]
    pub const fn view_state(&self, answered: bool) -> QuizViewState {
        if !answered {
            return QuizViewState::Open;
        }
        if self.correct_option.is_some() && self.selected_option.is_some() {
            QuizViewState::Revealed
        } else {
            QuizViewState::AnsweredPendingResult
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiz() -> Quiz {
        Quiz {
            id: QuizId::from("q1"),
            question: "Which crop?".to_string(),
            options: vec!["Wheat".to_string(), "Barley".to_string()],
            correct_option: None,
            selected_option: None,
        }
    }

    #[test]
    fn test_view_state_derivation() {
        let mut q = quiz();
        assert_eq!(q.view_state(false), QuizViewState::Open);
        assert_eq!(q.view_state(true), QuizViewState::AnsweredPendingResult);

        q.correct_option = Some(0);
        assert_eq!(q.view_state(true), QuizViewState::AnsweredPendingResult);

        q.selected_option = Some(1);
        assert_eq!(q.view_state(true), QuizViewState::Revealed);
        // An unanswered quiz stays open even if the payload leaked a result
        assert_eq!(q.view_state(false), QuizViewState::Open);
    }

    #[test]
    fn test_quiz_deserialize_without_result_fields() {
        let q: Quiz = serde_json::from_str(
            r#"{"id": "q1", "question": "Which crop?", "options": ["Wheat", "Barley"]}"#,
        )
        .expect("parse");
        assert_eq!(q.options.len(), 2);
        assert!(q.correct_option.is_none());
        assert!(q.selected_option.is_none());
    }
}
