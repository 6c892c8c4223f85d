//! Error taxonomy for the docgraph core.
//!
//! The parser never fails on malformed content, so nothing here describes a
//! parse error. Everything else (identity exhaustion, missing rows, scope
//! validation, storage failures) is surfaced to the caller with the entity
//! kind and key it concerns. No layer retries on its own.

use thiserror::Error;

/// Result type alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A document, node, collection or topic does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness constraint rejected the write.
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    /// Every nonce up to the attempt limit produced a short ID already taken.
    #[error("short id collision limit reached for {full_id} after {attempts} attempts")]
    IdentityCollisionExhausted { full_id: String, attempts: u32 },

    /// A short ID failed format validation.
    #[error("invalid short id {input:?}: {reason}")]
    InvalidShortId { input: String, reason: String },

    /// A scope filter names a project or topic the store does not know.
    #[error("unknown {kind} in scope filter: {name}")]
    ScopeValidation { kind: &'static str, name: String },

    /// A full-text match expression was rejected by the index.
    #[error("invalid full-text query {query:?}: {reason}")]
    InvalidQuery { query: String, reason: String },

    /// A stored row could not be decoded into a model type.
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("sqlite: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl Into<String>) -> Self {
        Error::Conflict {
            entity,
            key: key.into(),
        }
    }

    /// True for missing rows, including names a scope filter references.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::ScopeValidation { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(err)
    }
}

/// Returns true when a SQLite error is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}
