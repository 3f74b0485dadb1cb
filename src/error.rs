use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::{Isbn, UserId};

/// Errors surfaced by the resolution pipeline and the binary.
#[derive(Debug, Error, Diagnostic)]
pub enum ShelfError {
    #[error("invalid ISBN: {0}")]
    #[diagnostic(code(shelfmark::input), help("use a 10 or 13 digit ISBN; hyphens are ignored"))]
    InvalidIsbn(String),

    #[error("invalid shelf name: {0}")]
    #[diagnostic(code(shelfmark::input))]
    InvalidShelfName(String),

    #[error("invalid user id: {0}")]
    #[diagnostic(code(shelfmark::input))]
    InvalidUserId(String),

    #[error("missing request context: {0}")]
    #[diagnostic(code(shelfmark::input))]
    MissingContext(&'static str),

    #[error("invalid book: {0}")]
    #[diagnostic(code(shelfmark::input))]
    InvalidBook(String),

    #[error("no such book: {isbn}")]
    #[diagnostic(code(shelfmark::not_found))]
    BookNotFound { isbn: Isbn },

    #[error("bibliographic service unavailable for {isbn} after {attempts} attempt(s): {message}")]
    #[diagnostic(code(shelfmark::upstream), help("the request can be retried later"))]
    UpstreamUnavailable {
        isbn: Isbn,
        attempts: u32,
        message: String,
    },

    #[error("bibliographic service rejected lookup for {isbn}: {message}")]
    #[diagnostic(code(shelfmark::upstream))]
    UpstreamRejected { isbn: Isbn, message: String },

    #[error("storage unavailable while {context}")]
    #[diagnostic(code(shelfmark::store))]
    StoreUnavailable {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("user {user_id} has no shelf named {shelf}")]
    #[diagnostic(code(shelfmark::input))]
    UnknownShelf { user_id: UserId, shelf: String },

    #[error("{isbn} is not on shelf {shelf} for user {user_id}")]
    #[diagnostic(code(shelfmark::not_found))]
    EntryNotFound {
        user_id: UserId,
        isbn: Isbn,
        shelf: String,
    },

    #[error("request deadline exceeded during {stage}")]
    #[diagnostic(code(shelfmark::deadline))]
    DeadlineExceeded { stage: &'static str },

    #[error("config file not found at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl ShelfError {
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::StoreUnavailable {
            context: context.into(),
            source,
        }
    }

    /// True for failures the caller may retry without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShelfError::UpstreamUnavailable { .. } | ShelfError::DeadlineExceeded { .. }
        )
    }
}

/// Outcome of a failed bibliographic lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no record for {isbn}: {message}")]
    NotFound { isbn: String, message: String },

    #[error("transient lookup failure: {0}")]
    Transient(String),

    #[error("lookup rejected (status {status:?}): {message}")]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    #[error("lookup cancelled")]
    Cancelled,
}

impl LookupError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LookupError::Transient(_))
    }
}

/// Storage layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },

    #[error("row already exists: {0}")]
    Conflict(String),

    #[error("referenced row does not exist: {0}")]
    MissingReference(String),

    #[error("invalid persisted data: {0}")]
    InvalidData(String),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("failed to prepare database location: {0}")]
    Filesystem(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
