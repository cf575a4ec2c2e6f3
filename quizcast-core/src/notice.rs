use tokio::sync::mpsc;
use tracing::debug;

/// Short viewer-visible status text.
///
/// Failures surface as notices, never as a halt of the client loop; the
/// render collaborator decides how (and whether) to display them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connected,
    Disconnected,
    NoLiveSession,
    StreamUnavailable { stream: &'static str },
    RecoveringPlayback { stream: &'static str },
    AnswerSent,
    AlreadyAnswered,
    ResultAvailable,
    QuizDeleted,
    NoQuizAvailable,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected to server"),
            Self::Disconnected => write!(f, "Push channel disconnected"),
            Self::NoLiveSession => write!(f, "No live session"),
            Self::StreamUnavailable { stream } => {
                write!(f, "The {stream} stream is not available, please retry later")
            }
            Self::RecoveringPlayback { stream } => {
                write!(f, "Reconnecting to the {stream} stream")
            }
            Self::AnswerSent => write!(f, "Answer sent!"),
            Self::AlreadyAnswered => write!(f, "You have already answered this quiz"),
            Self::ResultAvailable => write!(f, "Result available"),
            Self::QuizDeleted => write!(f, "Quiz removed"),
            Self::NoQuizAvailable => write!(f, "No quiz available"),
        }
    }
}

/// Bounded notice fan-out. A slow or absent consumer drops notices
/// rather than stalling the client loop.
#[derive(Debug, Clone)]
pub struct NoticeSender {
    tx: mpsc::Sender<Notice>,
}

impl NoticeSender {
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn send(&self, notice: Notice) {
        if let Err(e) = self.tx.try_send(notice) {
            debug!("Notice dropped: {e}");
        }
    }
}
