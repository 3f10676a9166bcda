//! Local note collection
//!
//! [`LocalStore`] owns every [`Note`] record (tombstones included) and the
//! files holding their bodies. The in-memory collection sits behind a single
//! lock; each mutation is persisted before the in-memory copy is replaced, so
//! a storage failure never leaves memory ahead of disk.
//!
//! ## Conflict policy
//!
//! A remote change never overwrites a note with un-pushed local edits: the
//! local version wins and is uploaded on the next push, replacing the remote
//! copy. See [`LocalStore::apply_remote_change`] for the full table.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::files::{FsFileOps, LocalFileOps};
use crate::note::Note;
use crate::remote::RemoteFile;
use crate::storage::Storage;
use crate::types::{Fingerprint, LocalId, RemoteId};

/// Database file name inside the data directory
pub const DB_FILE_NAME: &str = "notesync.redb";

/// Directory for note bodies inside the data directory
pub const NOTES_DIR_NAME: &str = "notes";

/// A remote-side state to reconcile with the local collection
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub remote_id: RemoteId,
    pub title: String,
    /// Remote content digest, when known
    pub fingerprint: Option<Fingerprint>,
    /// Downloaded body; `None` when the body was not fetched
    pub content: Option<String>,
    pub trashed: bool,
    /// Local ID stamped into the remote file's metadata at upload
    pub local_hint: Option<LocalId>,
}

impl RemoteChange {
    /// Describe a remote file, without content
    pub fn from_file(file: &RemoteFile) -> Self {
        Self {
            remote_id: file.id.clone(),
            title: file.title.clone(),
            fingerprint: file.fingerprint.clone(),
            content: None,
            trashed: file.trashed,
            local_hint: file.local_id,
        }
    }

    /// A file that no longer exists at all
    pub fn removed(remote_id: RemoteId) -> Self {
        Self {
            remote_id,
            title: String::new(),
            fingerprint: None,
            content: None,
            trashed: true,
            local_hint: None,
        }
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }
}

/// What [`LocalStore::apply_remote_change`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new local note mirrors the remote file
    Added,
    /// Title and/or content taken from the remote
    Updated,
    /// Local note purged because the remote file is gone
    Removed,
    /// An un-pushed note turned out to already exist remotely; the remote ID
    /// was recorded instead of creating a duplicate
    Adopted,
    /// Local edits are pending, the remote change was ignored
    KeptLocal,
    /// Local edits are pending on a file trashed remotely; the caller should
    /// restore the remote file so the next push can land
    RestoreRemote,
    /// Nothing to do
    Unchanged,
}

/// Title, content digest and deletion state captured when a push starts
#[derive(Debug, Clone, PartialEq)]
pub struct PushSnapshot {
    pub local_id: LocalId,
    pub title: String,
    pub fingerprint: Fingerprint,
}

impl PushSnapshot {
    pub fn of(note: &Note) -> Self {
        Self {
            local_id: note.local_id(),
            title: note.title().to_string(),
            fingerprint: note.fingerprint().clone(),
        }
    }
}

/// The set of local notes and their bodies
pub struct LocalStore {
    storage: Storage,
    files: Arc<dyn LocalFileOps>,
    notes: RwLock<BTreeMap<LocalId, Note>>,
}

impl LocalStore {
    /// Load every persisted note record.
    pub fn open(storage: Storage, files: Arc<dyn LocalFileOps>) -> SyncResult<Self> {
        let notes: BTreeMap<LocalId, Note> = storage
            .list_notes()?
            .into_iter()
            .map(|n| (n.local_id(), n))
            .collect();
        info!(count = notes.len(), "Loaded local notes");
        Ok(Self {
            storage,
            files,
            notes: RwLock::new(notes),
        })
    }

    /// Open the store kept in `data_dir` (database plus `notes/` directory).
    pub fn open_dir(data_dir: impl AsRef<Path>) -> SyncResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let storage = Storage::new(data_dir.join(DB_FILE_NAME))?;
        let files = FsFileOps::new(data_dir.join(NOTES_DIR_NAME))?;
        Self::open(storage, Arc::new(files))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn files(&self) -> &Arc<dyn LocalFileOps> {
        &self.files
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Non-deleted notes, ordered by title (case-insensitive) then local ID.
    pub fn visible_notes(&self) -> Vec<Note> {
        let notes = self.notes.read();
        let mut visible: Vec<Note> = notes.values().filter(|n| n.is_visible()).cloned().collect();
        visible.sort_by(|a, b| {
            a.title()
                .to_lowercase()
                .cmp(&b.title().to_lowercase())
                .then_with(|| a.local_id().cmp(&b.local_id()))
        });
        visible
    }

    /// Every record, tombstones included, in local ID order
    pub fn all_notes(&self) -> Vec<Note> {
        self.notes.read().values().cloned().collect()
    }

    pub fn get(&self, local_id: &LocalId) -> Option<Note> {
        self.notes.read().get(local_id).cloned()
    }

    pub fn find_by_remote(&self, remote_id: &RemoteId) -> Option<Note> {
        self.notes
            .read()
            .values()
            .find(|n| n.remote_id() == Some(remote_id))
            .cloned()
    }

    /// Notes needing a remote call: dirty, or deleted after being pushed.
    pub fn pending_push(&self) -> Vec<Note> {
        self.notes
            .read()
            .values()
            .filter(|n| n.needs_push())
            .cloned()
            .collect()
    }

    /// Deleted notes that never reached the remote.
    pub fn pending_purge(&self) -> Vec<Note> {
        self.notes
            .read()
            .values()
            .filter(|n| n.is_local_tombstone())
            .cloned()
            .collect()
    }

    /// Titles of visible notes
    pub fn titles_in_use(&self) -> HashSet<String> {
        Self::visible_titles(&self.notes.read())
    }

    fn visible_titles(notes: &BTreeMap<LocalId, Note>) -> HashSet<String> {
        notes
            .values()
            .filter(|n| n.is_visible())
            .map(|n| n.title().to_string())
            .collect()
    }

    /// Whether reconciling `remote_id` needs the remote body.
    ///
    /// Only a clean note whose digest differs (or is unknown), or a file with
    /// no local note at all, needs a download.
    pub fn wants_content(&self, remote_id: &RemoteId, remote_fingerprint: Option<&Fingerprint>) -> bool {
        match self.find_by_remote(remote_id) {
            None => true,
            Some(note) if note.is_deleted() || note.is_dirty() => false,
            Some(note) => remote_fingerprint != Some(note.fingerprint()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local mutations
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a note titled by `pick_title`, which sees the titles in use.
    ///
    /// Title choice and insertion happen under one lock, so two concurrent
    /// creations can't pick the same title.
    pub fn insert_new(
        &self,
        pick_title: impl FnOnce(&HashSet<String>) -> SyncResult<String>,
    ) -> SyncResult<Note> {
        let mut notes = self.notes.write();
        let title = pick_title(&Self::visible_titles(&notes))?;
        let note = Note::new(title);

        self.files.write(note.file(), b"")?;
        if let Err(e) = self.storage.save_note(&note) {
            let _ = self.files.remove(note.file());
            return Err(e);
        }
        notes.insert(note.local_id(), note.clone());
        info!(local_id = %note.local_id(), title = %note.title(), "Created note");
        Ok(note)
    }

    /// Rename a visible note. Returns whether the title changed.
    pub fn update_title(&self, local_id: &LocalId, title: &str) -> SyncResult<bool> {
        let mut notes = self.notes.write();
        let mut note = Self::visible(&notes, local_id)?;
        if !note.update_title(title, notes.values())? {
            return Ok(false);
        }
        self.storage.save_note(&note)?;
        debug!(%local_id, title = %note.title(), "Renamed note");
        notes.insert(*local_id, note);
        Ok(true)
    }

    /// Read a note's body.
    pub fn read_content(&self, local_id: &LocalId) -> SyncResult<String> {
        let note = self
            .get(local_id)
            .ok_or_else(|| SyncError::NoteNotFound(local_id.to_string()))?;
        note.read_content(self.files.as_ref())
    }

    /// Replace a visible note's body. Returns whether the content changed.
    pub fn write_content(&self, local_id: &LocalId, text: &str) -> SyncResult<bool> {
        let mut notes = self.notes.write();
        let mut note = Self::visible(&notes, local_id)?;
        if !note.write_content(self.files.as_ref(), text)? {
            return Ok(false);
        }
        self.storage.save_note(&note)?;
        debug!(%local_id, fingerprint = note.fingerprint().short(), "Wrote note content");
        notes.insert(*local_id, note);
        Ok(true)
    }

    /// Re-hash a note's body from disk, marking it dirty if it moved.
    pub fn update_fingerprint(&self, local_id: &LocalId) -> SyncResult<Fingerprint> {
        let mut notes = self.notes.write();
        let mut note = notes
            .get(local_id)
            .cloned()
            .ok_or_else(|| SyncError::NoteNotFound(local_id.to_string()))?;
        let previous = note.fingerprint().clone();
        let current = note.update_fingerprint(self.files.as_ref())?;
        if current != previous {
            let dirty = !note.is_deleted();
            self.storage.write_fingerprint(local_id, &current, dirty)?;
            if dirty {
                note.set_dirty(true);
            }
            info!(%local_id, "Note content changed outside the store");
            notes.insert(*local_id, note);
        }
        Ok(current)
    }

    /// [`LocalStore::update_fingerprint`] for every visible note.
    ///
    /// Returns how many notes became dirty plus the per-note errors.
    pub fn refresh_fingerprints(&self) -> (usize, Vec<SyncError>) {
        let mut dirtied = 0;
        let mut errors = Vec::new();
        for note in self.visible_notes() {
            let id = note.local_id();
            match self.update_fingerprint(&id) {
                Ok(fp) if fp != *note.fingerprint() && !note.is_dirty() => dirtied += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(local_id = %id, error = %e, "Could not fingerprint note");
                    errors.push(e);
                }
            }
        }
        (dirtied, errors)
    }

    /// Tombstone a note. It disappears from [`LocalStore::visible_notes`] at
    /// once and stays stored until the delete is pushed or purged.
    pub fn mark_deleted(&self, local_id: &LocalId) -> SyncResult<Note> {
        let mut notes = self.notes.write();
        let mut note = notes
            .get(local_id)
            .cloned()
            .ok_or_else(|| SyncError::NoteNotFound(local_id.to_string()))?;
        if note.is_deleted() {
            return Ok(note);
        }
        self.storage.write_deleted(local_id)?;
        note.mark_deleted();
        info!(%local_id, pushed = note.remote_id().is_some(), "Marked note deleted");
        notes.insert(*local_id, note.clone());
        Ok(note)
    }

    /// Drop a note record and its body.
    pub fn purge(&self, local_id: &LocalId) -> SyncResult<Option<Note>> {
        let mut notes = self.notes.write();
        self.purge_locked(&mut notes, local_id)
    }

    fn purge_locked(
        &self,
        notes: &mut BTreeMap<LocalId, Note>,
        local_id: &LocalId,
    ) -> SyncResult<Option<Note>> {
        let Some(note) = notes.get(local_id).cloned() else {
            return Ok(None);
        };
        // record first: a crash in between leaves an orphan file, never a
        // record without its body
        self.storage.delete_note(local_id)?;
        notes.remove(local_id);
        if let Err(e) = self.files.remove(note.file()) {
            warn!(%local_id, error = %e, "Could not remove note file");
        }
        debug!(%local_id, "Purged note");
        Ok(Some(note))
    }

    /// Record the outcome of a successful push.
    ///
    /// Stores the remote ID when the note had none, then clears `dirty` only
    /// if the note still matches `pushed`. A note edited while its push was
    /// in flight stays dirty. Returns whether `dirty` was cleared.
    pub fn confirm_push(&self, pushed: &PushSnapshot, remote: &RemoteFile) -> SyncResult<bool> {
        let local_id = &pushed.local_id;
        let mut notes = self.notes.write();
        let Some(mut note) = notes.get(local_id).cloned() else {
            return Err(SyncError::NoteNotFound(local_id.to_string()));
        };

        if note.remote_id().is_none() {
            self.storage.write_remote_id(local_id, &remote.id)?;
            note.assign_remote_id(remote.id.clone())?;
        }

        let unchanged = !note.is_deleted()
            && note.title() == pushed.title
            && *note.fingerprint() == pushed.fingerprint;
        if unchanged && note.is_dirty() {
            self.storage.write_dirty(local_id, false)?;
            note.set_dirty(false);
        }
        notes.insert(*local_id, note);
        Ok(unchanged)
    }

    /// Re-point a pushed note at a freshly uploaded file after its previous
    /// remote file was removed for good. Call before [`LocalStore::confirm_push`].
    pub fn replace_remote_id(&self, local_id: &LocalId, remote_id: &RemoteId) -> SyncResult<()> {
        let mut notes = self.notes.write();
        let note = notes
            .get_mut(local_id)
            .ok_or_else(|| SyncError::NoteNotFound(local_id.to_string()))?;
        let previous = note.remote_id().cloned();
        self.storage.replace_remote_id(local_id, remote_id)?;
        note.replace_remote_id(remote_id.clone())?;
        info!(%local_id, ?previous, %remote_id, "Replaced remote file of note");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Remote reconciliation
    // ═══════════════════════════════════════════════════════════════════════

    /// Reconcile one remote file state with the local collection.
    ///
    /// | local note          | remote            | outcome         |
    /// |---------------------|-------------------|-----------------|
    /// | none                | live              | `Added`         |
    /// | none                | trashed           | `Unchanged`     |
    /// | un-pushed, local_hint   | live              | `Adopted`       |
    /// | clean               | live              | `Updated`/`Unchanged` |
    /// | clean               | trashed           | `Removed`       |
    /// | dirty               | live              | `KeptLocal`     |
    /// | dirty               | trashed           | `RestoreRemote` |
    /// | tombstone           | live              | `Unchanged`     |
    /// | tombstone           | trashed           | `Removed`       |
    pub fn apply_remote_change(&self, change: RemoteChange) -> SyncResult<ApplyOutcome> {
        let mut notes = self.notes.write();
        let remote_id = &change.remote_id;

        let existing = notes
            .values()
            .find(|n| n.remote_id() == Some(remote_id))
            .cloned();

        let Some(mut note) = existing else {
            return self.apply_unknown(&mut notes, change);
        };
        let local_id = note.local_id();

        if note.is_deleted() {
            if change.trashed {
                self.purge_locked(&mut notes, &local_id)?;
                return Ok(ApplyOutcome::Removed);
            }
            return Ok(ApplyOutcome::Unchanged);
        }

        if note.is_dirty() {
            debug!(%local_id, %remote_id, "Local edits pending, keeping local version");
            return Ok(if change.trashed {
                ApplyOutcome::RestoreRemote
            } else {
                ApplyOutcome::KeptLocal
            });
        }

        if change.trashed {
            self.purge_locked(&mut notes, &local_id)?;
            info!(%local_id, %remote_id, "Note removed remotely");
            return Ok(ApplyOutcome::Removed);
        }

        let new_content = change
            .content
            .as_deref()
            .filter(|c| Fingerprint::of(c.as_bytes()) != *note.fingerprint());
        let outcome = match new_content {
            Some(content) => {
                note.overwrite_from_remote(self.files.as_ref(), &change.title, content)?;
                ApplyOutcome::Updated
            }
            None if note.title() != change.title && !change.title.is_empty() => {
                note.set_title_from_remote(&change.title);
                ApplyOutcome::Updated
            }
            None => return Ok(ApplyOutcome::Unchanged),
        };

        self.warn_on_title_clash(&notes, &note);
        self.storage.save_note(&note)?;
        debug!(%local_id, %remote_id, "Applied remote change");
        notes.insert(local_id, note);
        Ok(outcome)
    }

    fn apply_unknown(
        &self,
        notes: &mut BTreeMap<LocalId, Note>,
        change: RemoteChange,
    ) -> SyncResult<ApplyOutcome> {
        if change.trashed {
            return Ok(ApplyOutcome::Unchanged);
        }

        // a create whose confirmation was lost: same file, already uploaded
        let local_hint = change
            .local_hint
            .and_then(|id| notes.get(&id).cloned())
            .filter(|n| n.remote_id().is_none());
        if let Some(mut note) = local_hint {
            let local_id = note.local_id();
            self.storage.write_remote_id(&local_id, &change.remote_id)?;
            note.assign_remote_id(change.remote_id.clone())?;
            info!(%local_id, remote_id = %change.remote_id, "Adopted existing remote file");
            notes.insert(local_id, note);
            return Ok(ApplyOutcome::Adopted);
        }

        let Some(content) = change.content else {
            return Err(SyncError::Validation(format!(
                "no content supplied for new remote note {}",
                change.remote_id
            )));
        };

        let mut note = Note::from_remote(change.remote_id.clone(), change.title.clone());
        note.overwrite_from_remote(self.files.as_ref(), &change.title, &content)?;
        if let Err(e) = self.storage.save_note(&note) {
            let _ = self.files.remove(note.file());
            return Err(e);
        }
        self.warn_on_title_clash(notes, &note);
        info!(local_id = %note.local_id(), remote_id = %change.remote_id, "Added note from remote");
        notes.insert(note.local_id(), note);
        Ok(ApplyOutcome::Added)
    }

    fn warn_on_title_clash(&self, notes: &BTreeMap<LocalId, Note>, note: &Note) {
        let clash = notes.values().any(|n| {
            n.local_id() != note.local_id() && n.is_visible() && n.title() == note.title()
        });
        if clash {
            warn!(local_id = %note.local_id(), title = %note.title(), "Remote title duplicates a local note");
        }
    }

    fn visible(notes: &BTreeMap<LocalId, Note>, local_id: &LocalId) -> SyncResult<Note> {
        notes
            .get(local_id)
            .filter(|n| n.is_visible())
            .cloned()
            .ok_or_else(|| SyncError::NoteNotFound(local_id.to_string()))
    }
}
