pub mod id;
pub mod quiz;
pub mod session;

pub use id::{QuizId, SessionId};
pub use quiz::{Quiz, QuizViewState};
pub use session::{stream_key_url, CurrentSessionResp, Session};
