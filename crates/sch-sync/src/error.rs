use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a synchronization run.
///
/// Everything except [`SyncError::AmbiguousMatch`] aborts the run before any
/// file is written. Ambiguous matches are recovered locally and surface as
/// report warnings; the variant exists so callers can format them uniformly.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("ambiguous match for {entity}: {candidates} candidates share its fingerprint")]
    AmbiguousMatch { entity: String, candidates: usize },

    #[error("invariant violated for {entity}: {rule}")]
    InvariantViolation { entity: String, rule: String },

    #[error("no collision-free position for {entity} within radius {radius}")]
    PlacementExhausted { entity: String, radius: f64 },

    #[error("duplicate reference designator {reference} in sheet {sheet}")]
    DuplicateReference { reference: String, sheet: String },

    #[error("invalid circuit description: {0}")]
    Canonical(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn parse(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn invariant(entity: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::InvariantViolation {
            entity: entity.into(),
            rule: rule.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the run can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AmbiguousMatch { .. })
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
