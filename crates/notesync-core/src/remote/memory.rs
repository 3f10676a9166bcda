//! In-process remote store
//!
//! [`MemoryRemote`] behaves like a drive folder held in memory: files get
//! sequential IDs, every mutation appends to a change feed, and the cursor is
//! the sequence number of the last change. Calls are recorded and failures
//! can be injected per operation, which is what the engine tests lean on.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{ChangeBatch, ChangeEntry, RemoteFile, RemoteMetadata, RemoteStore};
use crate::error::{SyncError, SyncResult};
use crate::types::{Fingerprint, RemoteId, SyncCursor};

/// Remote operation kinds, for call accounting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Create,
    Update,
    Download,
    Trash,
    Restore,
    Changes,
    Folder,
}

impl RemoteOp {
    /// Operations that change remote state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            RemoteOp::Create | RemoteOp::Update | RemoteOp::Trash | RemoteOp::Restore
        )
    }
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<RemoteId, (RemoteFile, Vec<u8>)>,
    /// (sequence, file) in append order
    changes: Vec<(u64, RemoteId)>,
    next_seq: u64,
    next_id: u64,
    calls: Vec<RemoteOp>,
    /// op -> remaining failures (`None` fails forever)
    failures: HashMap<RemoteOp, Option<usize>>,
    failing_downloads: HashSet<RemoteId>,
    folders: BTreeMap<String, RemoteId>,
}

impl MemoryState {
    fn check(&mut self, op: RemoteOp) -> SyncResult<()> {
        self.calls.push(op);
        match self.failures.get_mut(&op) {
            Some(None) => Err(injected(op)),
            Some(Some(n)) if *n > 0 => {
                *n -= 1;
                Err(injected(op))
            }
            _ => Ok(()),
        }
    }

    fn record_change(&mut self, id: &RemoteId) {
        self.next_seq += 1;
        self.changes.push((self.next_seq, id.clone()));
    }

    fn file_mut(&mut self, id: &RemoteId) -> SyncResult<&mut (RemoteFile, Vec<u8>)> {
        self.files
            .get_mut(id)
            .ok_or_else(|| SyncError::RemoteNotFound(id.to_string()))
    }

    fn insert(&mut self, title: &str, content: Vec<u8>, metadata: Option<&RemoteMetadata>, folder: Option<&RemoteId>) -> RemoteFile {
        self.next_id += 1;
        let id = RemoteId::new(format!("mem-{}", self.next_id));
        let file = RemoteFile {
            id: id.clone(),
            title: title.to_string(),
            folder: folder.cloned(),
            fingerprint: Some(Fingerprint::of(&content)),
            local_id: metadata.map(|m| m.local_id),
            trashed: false,
            modified_at: chrono::Utc::now().timestamp(),
        };
        self.files.insert(id.clone(), (file.clone(), content));
        self.record_change(&id);
        file
    }

    fn set_content(&mut self, id: &RemoteId, title: Option<&str>, content: Vec<u8>) -> SyncResult<RemoteFile> {
        let entry = self.file_mut(id)?;
        if let Some(title) = title {
            entry.0.title = title.to_string();
        }
        entry.0.fingerprint = Some(Fingerprint::of(&content));
        entry.0.modified_at = chrono::Utc::now().timestamp();
        entry.1 = content;
        let file = entry.0.clone();
        self.record_change(id);
        Ok(file)
    }

    fn set_trashed(&mut self, id: &RemoteId, trashed: bool) -> SyncResult<RemoteFile> {
        let entry = self.file_mut(id)?;
        entry.0.trashed = trashed;
        entry.0.modified_at = chrono::Utc::now().timestamp();
        let file = entry.0.clone();
        self.record_change(id);
        Ok(file)
    }
}

fn injected(op: RemoteOp) -> SyncError {
    SyncError::RemoteUnavailable(format!("injected {op:?} failure"))
}

/// A [`RemoteStore`] held entirely in memory
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Call accounting and failure injection
    // ═══════════════════════════════════════════════════════════════════════

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<RemoteOp> {
        self.state.lock().calls.clone()
    }

    /// How many calls of `op` were made
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// How many calls changed remote state
    pub fn mutation_count(&self) -> usize {
        self.state.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make every `op` call fail until [`MemoryRemote::clear_failures`]
    pub fn fail(&self, op: RemoteOp) {
        self.state.lock().failures.insert(op, None);
    }

    /// Make the next `times` calls of `op` fail
    pub fn fail_times(&self, op: RemoteOp, times: usize) {
        self.state.lock().failures.insert(op, Some(times));
    }

    /// Make downloads of one file fail
    pub fn fail_download_of(&self, id: &RemoteId) {
        self.state.lock().failing_downloads.insert(id.clone());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.failing_downloads.clear();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Edits made by other clients
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a file as another device would, without recording a call.
    pub fn put_external(&self, title: &str, content: &str, folder: Option<&RemoteId>) -> RemoteId {
        let mut state = self.state.lock();
        state.insert(title, content.as_bytes().to_vec(), None, folder).id
    }

    /// Change a file's content as another device would.
    pub fn edit_external(&self, id: &RemoteId, content: &str) -> SyncResult<()> {
        self.state
            .lock()
            .set_content(id, None, content.as_bytes().to_vec())
            .map(|_| ())
    }

    /// Rename a file as another device would.
    pub fn rename_external(&self, id: &RemoteId, title: &str) -> SyncResult<()> {
        let mut state = self.state.lock();
        let content = state.file_mut(id)?.1.clone();
        state.set_content(id, Some(title), content).map(|_| ())
    }

    /// Trash a file as another device would.
    pub fn trash_external(&self, id: &RemoteId) -> SyncResult<()> {
        self.state.lock().set_trashed(id, true).map(|_| ())
    }

    /// Delete a file for good, bypassing the trash. Later calls on `id` fail
    /// with `RemoteNotFound` and the change feed reports it without metadata.
    pub fn remove_external(&self, id: &RemoteId) -> SyncResult<()> {
        let mut state = self.state.lock();
        state
            .files
            .remove(id)
            .ok_or_else(|| SyncError::RemoteNotFound(id.to_string()))?;
        state.record_change(id);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn file(&self, id: &RemoteId) -> Option<RemoteFile> {
        self.state.lock().files.get(id).map(|(f, _)| f.clone())
    }

    pub fn content(&self, id: &RemoteId) -> Option<String> {
        self.state
            .lock()
            .files
            .get(id)
            .map(|(_, c)| String::from_utf8_lossy(c).into_owned())
    }

    /// Files that are not trashed
    pub fn live_files(&self) -> Vec<RemoteFile> {
        self.state
            .lock()
            .files
            .values()
            .filter(|(f, _)| !f.trashed)
            .map(|(f, _)| f.clone())
            .collect()
    }

    /// Cursor pointing at the newest change
    pub fn head(&self) -> SyncCursor {
        SyncCursor::new(self.state.lock().next_seq.to_string())
    }
}

fn parse_cursor(cursor: Option<&SyncCursor>) -> SyncResult<u64> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .as_str()
            .parse()
            .map_err(|_| SyncError::RemoteUnavailable(format!("invalid cursor {c}"))),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list(&self, folder: Option<&RemoteId>) -> SyncResult<Vec<RemoteFile>> {
        let mut state = self.state.lock();
        state.check(RemoteOp::List)?;
        Ok(state
            .files
            .values()
            .filter(|(f, _)| !f.trashed && f.folder.as_ref() == folder)
            .map(|(f, _)| f.clone())
            .collect())
    }

    async fn create(
        &self,
        content: Vec<u8>,
        metadata: RemoteMetadata,
        folder: Option<&RemoteId>,
    ) -> SyncResult<RemoteFile> {
        let mut state = self.state.lock();
        state.check(RemoteOp::Create)?;
        let file = state.insert(&metadata.title, content, Some(&metadata), folder);
        debug!(remote_id = %file.id, title = %file.title, "Created remote file");
        Ok(file)
    }

    async fn update(
        &self,
        id: &RemoteId,
        content: Vec<u8>,
        metadata: RemoteMetadata,
    ) -> SyncResult<RemoteFile> {
        let mut state = self.state.lock();
        state.check(RemoteOp::Update)?;
        state.set_content(id, Some(&metadata.title), content)
    }

    async fn download(&self, id: &RemoteId) -> SyncResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.check(RemoteOp::Download)?;
        if state.failing_downloads.contains(id) {
            return Err(SyncError::RemoteUnavailable(format!("injected download failure for {id}")));
        }
        Ok(state.file_mut(id)?.1.clone())
    }

    async fn trash(&self, id: &RemoteId) -> SyncResult<RemoteFile> {
        let mut state = self.state.lock();
        state.check(RemoteOp::Trash)?;
        state.set_trashed(id, true)
    }

    async fn restore(&self, id: &RemoteId) -> SyncResult<RemoteFile> {
        let mut state = self.state.lock();
        state.check(RemoteOp::Restore)?;
        state.set_trashed(id, false)
    }

    async fn ensure_folder(&self, name: &str) -> SyncResult<RemoteId> {
        let mut state = self.state.lock();
        state.check(RemoteOp::Folder)?;
        if let Some(id) = state.folders.get(name) {
            return Ok(id.clone());
        }
        state.next_id += 1;
        let id = RemoteId::new(format!("mem-folder-{}", state.next_id));
        state.folders.insert(name.to_string(), id.clone());
        debug!(folder = name, remote_id = %id, "Created remote folder");
        Ok(id)
    }

    async fn changes_since(&self, cursor: Option<&SyncCursor>) -> SyncResult<ChangeBatch> {
        let mut state = self.state.lock();
        state.check(RemoteOp::Changes)?;
        let since = parse_cursor(cursor)?;

        // one entry per file, positioned at its latest change
        let mut latest: BTreeMap<u64, RemoteId> = BTreeMap::new();
        let mut seen = HashSet::new();
        for (seq, id) in state.changes.iter().rev() {
            if *seq <= since {
                break;
            }
            if seen.insert(id.clone()) {
                latest.insert(*seq, id.clone());
            }
        }

        let entries = latest
            .into_values()
            .map(|id| ChangeEntry {
                file: state.files.get(&id).map(|(f, _)| f.clone()),
                remote_id: id,
            })
            .collect();

        Ok(ChangeBatch {
            entries,
            cursor: SyncCursor::new(state.next_seq.max(since).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocalId;

    fn metadata(title: &str) -> RemoteMetadata {
        RemoteMetadata::for_note(title, LocalId::new())
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_records_change() {
        let remote = MemoryRemote::new();
        let a = remote.create(b"a".to_vec(), metadata("A"), None).await.unwrap();
        let b = remote.create(b"b".to_vec(), metadata("B"), None).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint, Some(Fingerprint::of(b"a")));

        let batch = remote.changes_since(None).await.unwrap();
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.cursor, SyncCursor::new("2"));
    }

    #[tokio::test]
    async fn test_changes_since_dedupes_per_file() {
        let remote = MemoryRemote::new();
        let id = remote.put_external("A", "one", None);
        let cursor = remote.head();
        remote.edit_external(&id, "two").unwrap();
        remote.edit_external(&id, "three").unwrap();

        let batch = remote.changes_since(Some(&cursor)).await.unwrap();
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].remote_id, id);
        assert_eq!(batch.cursor, SyncCursor::new("3"));

        let empty = remote.changes_since(Some(&batch.cursor)).await.unwrap();
        assert!(empty.entries.is_empty());
        assert_eq!(empty.cursor, batch.cursor);
    }

    #[tokio::test]
    async fn test_removed_file_is_gone_everywhere() {
        let remote = MemoryRemote::new();
        let id = remote.put_external("A", "x", None);
        let cursor = remote.head();
        remote.remove_external(&id).unwrap();

        let batch = remote.changes_since(Some(&cursor)).await.unwrap();
        assert_eq!(batch.entries.len(), 1);
        assert!(batch.entries[0].file.is_none());
        assert!(matches!(
            remote.restore(&id).await,
            Err(SyncError::RemoteNotFound(_))
        ));
        assert!(matches!(
            remote.update(&id, b"y".to_vec(), metadata("A")).await,
            Err(SyncError::RemoteNotFound(_))
        ));
        assert!(remote.remove_external(&id).is_err());
    }

    #[tokio::test]
    async fn test_ensure_folder_is_stable() {
        let remote = MemoryRemote::new();
        let notes = remote.ensure_folder("Notes").await.unwrap();
        assert_eq!(remote.ensure_folder("Notes").await.unwrap(), notes);
        assert_ne!(remote.ensure_folder("Other").await.unwrap(), notes);
        assert_eq!(remote.call_count(RemoteOp::Folder), 3);

        remote.fail(RemoteOp::Folder);
        assert!(remote.ensure_folder("Notes").await.is_err());
    }

    #[tokio::test]
    async fn test_trash_and_restore() {
        let remote = MemoryRemote::new();
        let id = remote.put_external("A", "x", None);

        remote.trash(&id).await.unwrap();
        assert!(remote.list(None).await.unwrap().is_empty());

        remote.restore(&id).await.unwrap();
        assert_eq!(remote.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_folder() {
        let remote = MemoryRemote::new();
        let folder = RemoteId::new("folder");
        remote.put_external("in", "x", Some(&folder));
        remote.put_external("out", "y", None);

        let listed = remote.list(Some(&folder)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "in");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let remote = MemoryRemote::new();
        remote.fail_times(RemoteOp::Create, 1);

        let err = remote.create(vec![], metadata("A"), None).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteUnavailable(_)));
        assert!(remote.create(vec![], metadata("A"), None).await.is_ok());
        assert_eq!(remote.call_count(RemoteOp::Create), 2);
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let remote = MemoryRemote::new();
        let err = remote.download(&RemoteId::new("nope")).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteNotFound(_)));
    }
}
