//! Remote store collaborator
//!
//! The cloud drive is a black box keyed by [`RemoteId`]: it can find or
//! create the notes folder, list it, create/update/download a file, move a file to the trash and back,
//! and report a change feed since a [`SyncCursor`]. The sync engine only ever
//! reaches the drive through [`RemoteStore`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::types::{Fingerprint, LocalId, RemoteId, SyncCursor};

pub mod memory;

pub use memory::{MemoryRemote, RemoteOp};

/// MIME type notes are uploaded as
pub const NOTE_MIME_TYPE: &str = "text/plain";

/// Metadata for a file on the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: RemoteId,
    pub title: String,
    /// Folder the file lives in, if the provider reports one
    pub folder: Option<RemoteId>,
    /// Digest of the current content, if the provider reports one
    pub fingerprint: Option<Fingerprint>,
    /// Local ID of the note that created this file
    pub local_id: Option<LocalId>,
    pub trashed: bool,
    /// Unix timestamp of the last modification on the remote
    pub modified_at: i64,
}

/// Metadata sent along with uploaded content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub title: String,
    pub mime_type: String,
    pub local_id: LocalId,
}

impl RemoteMetadata {
    pub fn for_note(title: impl Into<String>, local_id: LocalId) -> Self {
        Self {
            title: title.into(),
            mime_type: NOTE_MIME_TYPE.to_string(),
            local_id,
        }
    }
}

/// One entry of the remote change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub remote_id: RemoteId,
    /// Latest metadata for the file; `None` when the file is gone for good
    pub file: Option<RemoteFile>,
}

/// A page of the change feed with the position to resume from
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub entries: Vec<ChangeEntry>,
    pub cursor: SyncCursor,
}

/// Operations the sync engine needs from the cloud drive.
///
/// Errors are reported as [`crate::SyncError::RemoteUnavailable`],
/// [`crate::SyncError::RemoteAuth`] or [`crate::SyncError::RemoteNotFound`].
/// Timeouts and retries inside a single call are the implementation's
/// business.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Files in `folder` (the root when `None`), trashed ones excluded.
    async fn list(&self, folder: Option<&RemoteId>) -> SyncResult<Vec<RemoteFile>>;

    /// Upload a new file, assigning its remote ID.
    async fn create(
        &self,
        content: Vec<u8>,
        metadata: RemoteMetadata,
        folder: Option<&RemoteId>,
    ) -> SyncResult<RemoteFile>;

    /// Replace the content and metadata of an existing file.
    async fn update(
        &self,
        id: &RemoteId,
        content: Vec<u8>,
        metadata: RemoteMetadata,
    ) -> SyncResult<RemoteFile>;

    /// Fetch the content of a file.
    async fn download(&self, id: &RemoteId) -> SyncResult<Vec<u8>>;

    /// Move a file to the trash.
    async fn trash(&self, id: &RemoteId) -> SyncResult<RemoteFile>;

    /// Bring a file back from the trash.
    async fn restore(&self, id: &RemoteId) -> SyncResult<RemoteFile>;

    /// Changes after `cursor`, or every change when `cursor` is `None`.
    async fn changes_since(&self, cursor: Option<&SyncCursor>) -> SyncResult<ChangeBatch>;

    /// ID of the folder called `name` at the root, created when missing.
    /// Calling it again with the same name returns the same folder.
    async fn ensure_folder(&self, name: &str) -> SyncResult<RemoteId>;
}
