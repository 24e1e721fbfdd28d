use std::io;
use thiserror::Error;

/// Failure taxonomy surfaced by every broker operation.
///
/// `NotFound` and `ArgumentError` are caller-correctable and carry a message
/// naming the offending entities. `InternalError` marks a contract violation in
/// the calling code and never results from valid external input.
#[derive(Error, Debug)]
pub enum AquilonError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ArgumentError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AquilonError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AquilonError::NotFound(_))
    }

    pub fn is_argument_error(&self) -> bool {
        matches!(self, AquilonError::ArgumentError(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, AquilonError::InternalError(_))
    }
}

/// True when a SQLite failure is a UNIQUE/FOREIGN KEY/CHECK constraint violation.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            code.code == rusqlite::ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}
