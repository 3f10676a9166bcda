//! The note entity
//!
//! A [`Note`] is the durable record for one note: identity, title, content
//! fingerprint and the two sync flags. The body itself is never held here;
//! it lives in a file reached through [`LocalFileOps`] and is read on demand.
//!
//! ```text
//!  create ──► dirty ──push──► clean ──edit──► dirty
//!               │                │
//!          mark_deleted     mark_deleted
//!               ▼                ▼
//!      tombstone (no remote)  tombstone (remote) ──trash──► purged
//!               │
//!             purge
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::files::LocalFileOps;
use crate::types::{Fingerprint, LocalId, RemoteId};

/// Suffix for the scratch file used by content writes
const TEMP_SUFFIX: &str = ".tmp";

/// One note and its sync state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    local_id: LocalId,
    remote_id: Option<RemoteId>,
    title: String,
    file: String,
    fingerprint: Fingerprint,
    dirty: bool,
    deleted: bool,
    created_at: i64,
    modified_at: i64,
}

impl Note {
    /// A fresh, never pushed note with empty content.
    ///
    /// The caller is responsible for creating the (empty) content file.
    pub(crate) fn new(title: impl Into<String>) -> Self {
        let local_id = LocalId::new();
        let now = chrono::Utc::now().timestamp();
        Self {
            local_id,
            remote_id: None,
            title: title.into(),
            file: format!("{}.txt", local_id.to_string_repr()),
            fingerprint: Fingerprint::empty(),
            dirty: true,
            deleted: false,
            created_at: now,
            modified_at: now,
        }
    }

    /// A clean note mirroring a remote file that has no local counterpart.
    pub(crate) fn from_remote(remote_id: RemoteId, title: impl Into<String>) -> Self {
        let mut note = Self::new(title);
        note.remote_id = Some(remote_id);
        note.dirty = false;
        note
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Name of the content file, relative to the notes directory
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn modified_at(&self) -> i64 {
        self.modified_at
    }

    /// Shown to the user
    pub fn is_visible(&self) -> bool {
        !self.deleted
    }

    /// Needs a remote call: an edit to upload, or a delete to trash.
    pub fn needs_push(&self) -> bool {
        self.dirty || (self.deleted && self.remote_id.is_some())
    }

    /// Deleted before it ever reached the remote
    pub fn is_local_tombstone(&self) -> bool {
        self.deleted && self.remote_id.is_none()
    }

    /// Rename the note.
    ///
    /// `others` is the rest of the collection; a visible note other than this
    /// one holding exactly `new_title` is a conflict. Returns whether the
    /// title changed.
    pub fn update_title<'a>(
        &mut self,
        new_title: &str,
        others: impl IntoIterator<Item = &'a Note>,
    ) -> SyncResult<bool> {
        let new_title = new_title.trim();
        if new_title.is_empty() {
            return Err(SyncError::Validation("title must not be empty".to_string()));
        }
        if new_title == self.title {
            return Ok(false);
        }
        let taken = others
            .into_iter()
            .any(|n| n.local_id != self.local_id && n.is_visible() && n.title == new_title);
        if taken {
            return Err(SyncError::Validation(format!(
                "a note titled {new_title:?} already exists"
            )));
        }

        self.title = new_title.to_string();
        self.touch();
        self.dirty = true;
        Ok(true)
    }

    /// Read the note body.
    pub fn read_content(&self, files: &dyn LocalFileOps) -> SyncResult<String> {
        let bytes = files.read(&self.file)?;
        String::from_utf8(bytes)
            .map_err(|e| SyncError::LocalIo(format!("{} is not UTF-8: {e}", self.file)))
    }

    /// Replace the note body.
    ///
    /// Returns `true` and marks the note dirty only when the content
    /// fingerprint changed; rewriting identical text leaves the flags alone.
    pub fn write_content(&mut self, files: &dyn LocalFileOps, text: &str) -> SyncResult<bool> {
        let fingerprint = self.store_content(files, text)?;
        if fingerprint == self.fingerprint {
            return Ok(false);
        }
        self.fingerprint = fingerprint;
        self.dirty = true;
        self.touch();
        Ok(true)
    }

    /// Re-hash the content file without writing it.
    pub fn update_fingerprint(&mut self, files: &dyn LocalFileOps) -> SyncResult<Fingerprint> {
        let bytes = files.read(&self.file)?;
        self.fingerprint = Fingerprint::of(&bytes);
        Ok(self.fingerprint.clone())
    }

    /// Take remote content and title as the new synced state.
    pub(crate) fn overwrite_from_remote(
        &mut self,
        files: &dyn LocalFileOps,
        title: &str,
        content: &str,
    ) -> SyncResult<()> {
        self.fingerprint = self.store_content(files, content)?;
        self.title = title.to_string();
        self.dirty = false;
        self.touch();
        Ok(())
    }

    /// Take a remote title without touching content.
    pub(crate) fn set_title_from_remote(&mut self, title: &str) {
        self.title = title.to_string();
        self.touch();
    }

    /// Record the remote ID. It can be set once; setting the same value again
    /// is allowed so a retried confirmation is harmless.
    pub(crate) fn assign_remote_id(&mut self, remote_id: RemoteId) -> SyncResult<()> {
        match &self.remote_id {
            Some(existing) if *existing != remote_id => Err(SyncError::Validation(format!(
                "note {} already has remote ID {existing}, refusing {remote_id}",
                self.local_id
            ))),
            Some(_) => Ok(()),
            None => {
                self.remote_id = Some(remote_id);
                Ok(())
            }
        }
    }

    /// Point the note at a new remote file once the old one was removed for
    /// good. Only a note that was already pushed can be re-pointed.
    pub(crate) fn replace_remote_id(&mut self, remote_id: RemoteId) -> SyncResult<()> {
        if self.remote_id.is_none() {
            return Err(SyncError::Validation(format!(
                "note {} was never pushed, nothing to replace",
                self.local_id
            )));
        }
        self.remote_id = Some(remote_id);
        Ok(())
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub(crate) fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = fingerprint;
    }

    /// Tombstone the note. A delete supersedes pending edits.
    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
        self.dirty = false;
        self.touch();
    }

    fn store_content(&self, files: &dyn LocalFileOps, text: &str) -> SyncResult<Fingerprint> {
        let temp = format!("{}{}", self.file, TEMP_SUFFIX);
        files.write(&temp, text.as_bytes())?;
        if let Err(e) = files.atomic_replace(&self.file, &temp) {
            let _ = files.remove(&temp);
            return Err(e);
        }
        Ok(Fingerprint::of(text.as_bytes()))
    }

    fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FsFileOps;
    use tempfile::TempDir;

    fn create_test_note() -> (Note, FsFileOps, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let files = FsFileOps::new(temp_dir.path()).unwrap();
        let note = Note::new("Untitled");
        files.write(note.file(), b"").unwrap();
        (note, files, temp_dir)
    }

    #[test]
    fn test_new_note_is_dirty_and_unpushed() {
        let note = Note::new("Untitled");
        assert!(note.is_dirty());
        assert!(!note.is_deleted());
        assert!(note.remote_id().is_none());
        assert_eq!(note.fingerprint(), &Fingerprint::empty());
        assert!(note.file().ends_with(".txt"));
        assert!(note.needs_push());
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let (mut note, files, _temp) = create_test_note();

        assert!(note.write_content(&files, "hello world").unwrap());
        assert_eq!(note.read_content(&files).unwrap(), "hello world");
        assert_eq!(note.fingerprint(), &Fingerprint::of(b"hello world"));
    }

    #[test]
    fn test_noop_write_keeps_clean() {
        let (mut note, files, _temp) = create_test_note();

        note.write_content(&files, "same").unwrap();
        note.set_dirty(false);

        let changed = note.write_content(&files, "same").unwrap();
        assert!(!changed);
        assert!(!note.is_dirty());
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let (mut note, files, _temp) = create_test_note();
        note.write_content(&files, "body").unwrap();
        assert!(files.read(&format!("{}.tmp", note.file())).is_err());
    }

    #[test]
    fn test_update_title_rejects_empty() {
        let mut note = Note::new("A");
        let err = note.update_title("   ", std::iter::empty()).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_update_title_rejects_duplicate() {
        let other = Note::new("Taken");
        let mut note = Note::new("Mine");
        note.set_dirty(false);

        let err = note.update_title("Taken", [&other]).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(note.title(), "Mine");
        assert!(!note.is_dirty());
    }

    #[test]
    fn test_update_title_ignores_deleted_and_self() {
        let mut gone = Note::new("Taken");
        gone.mark_deleted();
        let mut note = Note::new("Mine");
        let same = note.clone();

        assert!(note.update_title("Taken", [&gone, &same]).unwrap());
        assert_eq!(note.title(), "Taken");
    }

    #[test]
    fn test_update_title_marks_dirty() {
        let mut note = Note::new("Old");
        note.set_dirty(false);
        assert!(note.update_title("New", std::iter::empty()).unwrap());
        assert!(note.is_dirty());

        note.set_dirty(false);
        assert!(!note.update_title("New", std::iter::empty()).unwrap());
        assert!(!note.is_dirty());
    }

    #[test]
    fn test_update_fingerprint_sees_external_edit() {
        let (mut note, files, _temp) = create_test_note();
        files.write(note.file(), b"edited elsewhere").unwrap();

        let fp = note.update_fingerprint(&files).unwrap();
        assert_eq!(fp, Fingerprint::of(b"edited elsewhere"));
        assert_eq!(note.fingerprint(), &fp);
    }

    #[test]
    fn test_mark_deleted_clears_dirty() {
        let mut note = Note::new("A");
        note.mark_deleted();
        assert!(note.is_deleted());
        assert!(!note.is_dirty());
        assert!(note.is_local_tombstone());
        assert!(!note.needs_push());
    }

    #[test]
    fn test_remote_id_is_immutable() {
        let mut note = Note::new("A");
        note.assign_remote_id(RemoteId::new("r1")).unwrap();
        note.assign_remote_id(RemoteId::new("r1")).unwrap();
        assert!(note.assign_remote_id(RemoteId::new("r2")).is_err());
        assert_eq!(note.remote_id().unwrap().as_str(), "r1");

        note.mark_deleted();
        assert!(note.needs_push());
    }

    #[test]
    fn test_replace_remote_id_needs_a_pushed_note() {
        let mut note = Note::new("A");
        assert!(note.replace_remote_id(RemoteId::new("r2")).is_err());

        note.assign_remote_id(RemoteId::new("r1")).unwrap();
        note.replace_remote_id(RemoteId::new("r2")).unwrap();
        assert_eq!(note.remote_id().unwrap().as_str(), "r2");
    }

    #[test]
    fn test_overwrite_from_remote_is_clean() {
        let (mut note, files, _temp) = create_test_note();
        note.overwrite_from_remote(&files, "Remote title", "remote body").unwrap();
        assert!(!note.is_dirty());
        assert_eq!(note.title(), "Remote title");
        assert_eq!(note.read_content(&files).unwrap(), "remote body");
        assert_eq!(note.fingerprint(), &Fingerprint::of(b"remote body"));
    }
}
