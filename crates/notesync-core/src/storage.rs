//! Persistent storage using redb.
//!
//! This module persists:
//! - Note records (identity, title, fingerprint, dirty/deleted flags)
//! - The sync cursor for the remote change feed
//!
//! Every field writer commits its own transaction, so after a crash each
//! field holds exactly the last value written to it.

use crate::error::SyncError;
use crate::note::Note;
use crate::types::{Fingerprint, LocalId, RemoteId, SyncCursor};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

// local id -> JSON note record
const NOTES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("notes");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Note records and sync metadata in a redb database
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Sync cursor key in the meta table
    const CURSOR_KEY: &'static str = "sync_cursor";

    /// Open the database at `path`, creating the file, its parent
    /// directories and the `notes`/`meta` tables as needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(NOTES_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Note Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a full note record, overwriting any existing one.
    pub fn save_note(&self, note: &Note) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(NOTES_TABLE)?;
            let data = serde_json::to_vec(note)?;
            let key = note.local_id().to_string_repr();
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a single note by local ID.
    ///
    /// Returns `None` if no such note exists.
    pub fn load_note(&self, local_id: &LocalId) -> Result<Option<Note>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(NOTES_TABLE)?;
        let key = local_id.to_string_repr();

        match table.get(key.as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Load every note record, tombstones included.
    pub fn list_notes(&self) -> Result<Vec<Note>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(NOTES_TABLE)?;

        let mut notes = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let note: Note = serde_json::from_slice(value.value())?;
            notes.push(note);
        }
        Ok(notes)
    }

    /// Remove a note record. Removing a missing note succeeds.
    pub fn delete_note(&self, local_id: &LocalId) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(NOTES_TABLE)?;
            let key = local_id.to_string_repr();
            table.remove(key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Persist only the remote ID of a note.
    pub fn write_remote_id(&self, local_id: &LocalId, remote_id: &RemoteId) -> Result<(), SyncError> {
        self.update_field(local_id, |note| note.assign_remote_id(remote_id.clone()))
    }

    /// Persist a replacement remote ID for a note whose file was removed.
    pub fn replace_remote_id(&self, local_id: &LocalId, remote_id: &RemoteId) -> Result<(), SyncError> {
        self.update_field(local_id, |note| note.replace_remote_id(remote_id.clone()))
    }

    /// Persist only the dirty flag of a note.
    pub fn write_dirty(&self, local_id: &LocalId, dirty: bool) -> Result<(), SyncError> {
        self.update_field(local_id, |note| {
            note.set_dirty(dirty);
            Ok(())
        })
    }

    /// Persist only the deleted flag of a note (which also clears dirty).
    pub fn write_deleted(&self, local_id: &LocalId) -> Result<(), SyncError> {
        self.update_field(local_id, |note| {
            note.mark_deleted();
            Ok(())
        })
    }

    /// Persist only the fingerprint of a note, marking it dirty when it moved.
    pub fn write_fingerprint(
        &self,
        local_id: &LocalId,
        fingerprint: &Fingerprint,
        dirty: bool,
    ) -> Result<(), SyncError> {
        let fingerprint = fingerprint.clone();
        self.update_field(local_id, move |note| {
            note.set_fingerprint(fingerprint);
            if dirty {
                note.set_dirty(true);
            }
            Ok(())
        })
    }

    /// Read-modify-write of one stored record inside a single transaction.
    fn update_field(
        &self,
        local_id: &LocalId,
        apply: impl FnOnce(&mut Note) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(NOTES_TABLE)?;
            let key = local_id.to_string_repr();
            let mut note: Note = match table.get(key.as_str())? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(SyncError::NoteNotFound(key)),
            };
            apply(&mut note)?;
            let data = serde_json::to_vec(&note)?;
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cursor Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist the change feed cursor.
    pub fn save_cursor(&self, cursor: &SyncCursor) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_TABLE)?;
            table.insert(Self::CURSOR_KEY, cursor.as_str().as_bytes())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the change feed cursor.
    ///
    /// Returns `None` if nothing has been pulled yet.
    pub fn load_cursor(&self) -> Result<Option<SyncCursor>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;

        match table.get(Self::CURSOR_KEY)? {
            Some(v) => {
                let token = String::from_utf8(v.value().to_vec())
                    .map_err(|e| SyncError::Storage(format!("cursor is not UTF-8: {e}")))?;
                Ok(Some(SyncCursor::new(token)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_save_and_load_note() {
        let (storage, _temp) = create_test_storage();

        let note = Note::new("Groceries");
        storage.save_note(&note).unwrap();

        let loaded = storage.load_note(&note.local_id()).unwrap().unwrap();
        assert_eq!(loaded, note);
    }

    #[test]
    fn test_load_nonexistent_note() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.load_note(&LocalId::new()).unwrap().is_none());
    }

    #[test]
    fn test_list_and_delete_notes() {
        let (storage, _temp) = create_test_storage();

        let a = Note::new("A");
        let b = Note::new("B");
        storage.save_note(&a).unwrap();
        storage.save_note(&b).unwrap();
        assert_eq!(storage.list_notes().unwrap().len(), 2);

        storage.delete_note(&a.local_id()).unwrap();
        let remaining = storage.list_notes().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title(), "B");

        // deleting again is fine
        storage.delete_note(&a.local_id()).unwrap();
    }

    #[test]
    fn test_field_writers_touch_only_their_field() {
        let (storage, _temp) = create_test_storage();
        let note = Note::new("A");
        let id = note.local_id();
        storage.save_note(&note).unwrap();

        storage.write_remote_id(&id, &RemoteId::new("r-1")).unwrap();
        let loaded = storage.load_note(&id).unwrap().unwrap();
        assert_eq!(loaded.remote_id().unwrap().as_str(), "r-1");
        assert!(loaded.is_dirty());

        storage.write_dirty(&id, false).unwrap();
        let loaded = storage.load_note(&id).unwrap().unwrap();
        assert!(!loaded.is_dirty());
        assert_eq!(loaded.remote_id().unwrap().as_str(), "r-1");

        storage.write_deleted(&id).unwrap();
        let loaded = storage.load_note(&id).unwrap().unwrap();
        assert!(loaded.is_deleted());
        assert_eq!(loaded.title(), "A");
    }

    #[test]
    fn test_write_remote_id_refuses_reassignment() {
        let (storage, _temp) = create_test_storage();
        let note = Note::new("A");
        storage.save_note(&note).unwrap();

        storage.write_remote_id(&note.local_id(), &RemoteId::new("r-1")).unwrap();
        assert!(storage
            .write_remote_id(&note.local_id(), &RemoteId::new("r-2"))
            .is_err());
    }

    #[test]
    fn test_field_writer_on_missing_note() {
        let (storage, _temp) = create_test_storage();
        let err = storage.write_dirty(&LocalId::new(), true).unwrap_err();
        assert!(matches!(err, SyncError::NoteNotFound(_)));
    }

    #[test]
    fn test_cursor_roundtrip_and_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        {
            let storage = Storage::new(&db_path).unwrap();
            assert!(storage.load_cursor().unwrap().is_none());
            storage.save_cursor(&SyncCursor::new("42")).unwrap();
        }

        let storage = Storage::new(&db_path).unwrap();
        assert_eq!(storage.load_cursor().unwrap(), Some(SyncCursor::new("42")));
    }
}
