//! Answered-Quiz Ledger
//!
//! Durable local record of quiz ids the viewer has already answered,
//! surviving restarts. Append-only except for explicit removal when a
//! quiz is deleted server-side. An id present here must never again
//! accept a new answer submission from this client.

use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::QuizId;

/// File-backed ordered set of answered quiz ids.
///
/// The on-disk format is a flat JSON array of ids. Mutations rewrite the
/// whole file through a temp-file rename, so a crash mid-write leaves the
/// previous ledger intact. Scope is per device: a second device for the
/// same viewer keeps its own ledger.
#[derive(Debug)]
pub struct AnswerLedger {
    path: PathBuf,
    answered: IndexSet<QuizId>,
}

impl AnswerLedger {
    /// Open the ledger at `path`, loading any prior entries.
    ///
    /// A missing file is an empty ledger; a corrupt file is treated as
    /// empty with a warning, because refusing to start over a damaged
    /// ledger would take the whole client down.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let answered = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<IndexSet<QuizId>>(&raw) {
                Ok(set) => set,
                Err(e) => {
                    warn!(path = %path.display(), "Ledger file corrupt, starting empty: {e}");
                    IndexSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexSet::new(),
            Err(e) => return Err(Error::Io(e)),
        };
        debug!(path = %path.display(), entries = answered.len(), "Answer ledger opened");
        Ok(Self { path, answered })
    }

    /// In-memory ledger for tests and embedders that opt out of
    /// persistence. Writes go to a throwaway location under the temp dir.
    #[must_use]
    pub fn ephemeral() -> Self {
        let path = std::env::temp_dir().join(format!(
            "quizcast-ledger-{}.json",
            std::process::id()
        ));
        Self {
            path,
            answered: IndexSet::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, id: &QuizId) -> bool {
        self.answered.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.answered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answered.is_empty()
    }

    /// Record an answered quiz. Returns `false` (and writes nothing) if
    /// the id was already present.
    pub fn record(&mut self, id: QuizId) -> Result<bool> {
        if !self.answered.insert(id) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Remove an id (quiz deleted server-side; it may be re-issued and
    /// should be answerable again). Returns `false` if it wasn't present.
    pub fn remove(&mut self, id: &QuizId) -> Result<bool> {
        if !self.answered.shift_remove(id) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.answered)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
