//! Error types for notesync

use thiserror::Error;

/// Main error type for notesync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Rejected user input (empty or duplicate title)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The note factory ran out of candidate titles
    #[error("Could not find a unique title after {0} attempts")]
    TooManyAttempts(usize),

    /// The remote store could not be reached or refused the request
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote store rejected our credentials
    #[error("Remote authorization failed: {0}")]
    RemoteAuth(String),

    /// The remote store has no file with the given ID
    #[error("Remote file not found: {0}")]
    RemoteNotFound(String),

    /// Failure in the local file collaborator
    #[error("Local IO error: {0}")]
    LocalIo(String),

    /// A synchronization is already running
    #[error("Synchronization already in progress")]
    SyncInProgress,

    /// Note was not found in the local store
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether a later synchronization can be expected to succeed without
    /// user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable(_)
                | SyncError::LocalIo(_)
                | SyncError::Io(_)
                | SyncError::SyncInProgress
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
