//! A remote store kept in a plain directory
//!
//! Stands in for a cloud drive so several data directories can sync with
//! each other through one shared folder:
//!
//! ```text
//! <remote-dir>/
//! ├── .lock            held exclusively for each call
//! ├── manifest.json    file metadata + change log
//! └── blobs/<id>       file contents
//! ```
//!
//! Every call locks `.lock`, loads the manifest, applies its change and
//! writes it back atomically. Several `notesync` processes may share the
//! directory; their calls run one at a time.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notesync_core::{
    ChangeBatch, ChangeEntry, Fingerprint, RemoteFile, RemoteId, RemoteMetadata, RemoteStore,
    SyncCursor, SyncError, SyncResult,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

const LOCK_FILE: &str = ".lock";
const MANIFEST_FILE: &str = "manifest.json";
const BLOBS_DIR: &str = "blobs";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    files: BTreeMap<String, RemoteFile>,
    /// (sequence, file) in append order
    changes: Vec<(u64, RemoteId)>,
    next_seq: u64,
    next_id: u64,
    /// Folder name -> ID
    #[serde(default)]
    folders: BTreeMap<String, RemoteId>,
}

impl Manifest {
    fn record_change(&mut self, id: &RemoteId) {
        self.next_seq += 1;
        self.changes.push((self.next_seq, id.clone()));
    }

    fn file_mut(&mut self, id: &RemoteId) -> SyncResult<&mut RemoteFile> {
        self.files
            .get_mut(id.as_str())
            .ok_or_else(|| SyncError::RemoteNotFound(id.to_string()))
    }
}

/// [`RemoteStore`] backed by a directory on the local filesystem
pub struct DirRemote {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DirRemote {
    pub fn open(root: impl AsRef<Path>) -> SyncResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOBS_DIR)).map_err(|e| unavailable(&root, e))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load(&self) -> SyncResult<Manifest> {
        let path = self.root.join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(unavailable(&path, e)),
        }
    }

    fn save(&self, manifest: &Manifest) -> SyncResult<()> {
        let path = self.root.join(MANIFEST_FILE);
        let temp = self.root.join(format!("{MANIFEST_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(manifest)?;
        fs::write(&temp, bytes).map_err(|e| unavailable(&temp, e))?;
        fs::rename(&temp, &path).map_err(|e| unavailable(&path, e))
    }

    fn blob_path(&self, id: &RemoteId) -> PathBuf {
        self.root.join(BLOBS_DIR).join(id.as_str())
    }

    fn write_blob(&self, id: &RemoteId, content: &[u8]) -> SyncResult<()> {
        let path = self.blob_path(id);
        fs::write(&path, content).map_err(|e| unavailable(&path, e))
    }

    /// Run `f` holding the in-process lock and an exclusive lock on the
    /// directory's lock file, which other processes wait on.
    fn exclusive<T>(&self, f: impl FnOnce() -> SyncResult<T>) -> SyncResult<T> {
        let _guard = self.lock.lock();
        let path = self.root.join(LOCK_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| unavailable(&path, e))?;
        let mut file_lock = fd_lock::RwLock::new(file);
        let _held = file_lock.write().map_err(|e| unavailable(&path, e))?;
        f()
    }

    /// Load, change and store the manifest under the lock.
    fn modify<T>(&self, apply: impl FnOnce(&mut Manifest) -> SyncResult<T>) -> SyncResult<T> {
        self.exclusive(|| {
            let mut manifest = self.load()?;
            let out = apply(&mut manifest)?;
            self.save(&manifest)?;
            Ok(out)
        })
    }

    fn set_trashed(&self, id: &RemoteId, trashed: bool) -> SyncResult<RemoteFile> {
        self.modify(|m| {
            let file = m.file_mut(id)?;
            file.trashed = trashed;
            file.modified_at = chrono::Utc::now().timestamp();
            let file = file.clone();
            m.record_change(id);
            Ok(file)
        })
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> SyncError {
    SyncError::RemoteUnavailable(format!("{}: {e}", path.display()))
}

#[async_trait]
impl RemoteStore for DirRemote {
    async fn list(&self, folder: Option<&RemoteId>) -> SyncResult<Vec<RemoteFile>> {
        let manifest = self.exclusive(|| self.load())?;
        Ok(manifest
            .files
            .into_values()
            .filter(|f| !f.trashed && f.folder.as_ref() == folder)
            .collect())
    }

    async fn create(
        &self,
        content: Vec<u8>,
        metadata: RemoteMetadata,
        folder: Option<&RemoteId>,
    ) -> SyncResult<RemoteFile> {
        self.modify(|m| {
            m.next_id += 1;
            let id = RemoteId::new(format!("file-{:06}", m.next_id));
            self.write_blob(&id, &content)?;
            let file = RemoteFile {
                id: id.clone(),
                title: metadata.title,
                folder: folder.cloned(),
                fingerprint: Some(Fingerprint::of(&content)),
                local_id: Some(metadata.local_id),
                trashed: false,
                modified_at: chrono::Utc::now().timestamp(),
            };
            m.files.insert(id.as_str().to_string(), file.clone());
            m.record_change(&id);
            debug!(remote_id = %id, "Created file in remote directory");
            Ok(file)
        })
    }

    async fn update(
        &self,
        id: &RemoteId,
        content: Vec<u8>,
        metadata: RemoteMetadata,
    ) -> SyncResult<RemoteFile> {
        self.modify(|m| {
            m.file_mut(id)?;
            self.write_blob(id, &content)?;
            let file = m.file_mut(id)?;
            file.title = metadata.title;
            file.fingerprint = Some(Fingerprint::of(&content));
            file.modified_at = chrono::Utc::now().timestamp();
            let file = file.clone();
            m.record_change(id);
            Ok(file)
        })
    }

    async fn download(&self, id: &RemoteId) -> SyncResult<Vec<u8>> {
        let path = self.blob_path(id);
        self.exclusive(|| {
            fs::read(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SyncError::RemoteNotFound(id.to_string()),
                _ => unavailable(&path, e),
            })
        })
    }

    async fn trash(&self, id: &RemoteId) -> SyncResult<RemoteFile> {
        self.set_trashed(id, true)
    }

    async fn restore(&self, id: &RemoteId) -> SyncResult<RemoteFile> {
        self.set_trashed(id, false)
    }

    async fn ensure_folder(&self, name: &str) -> SyncResult<RemoteId> {
        self.modify(|m| {
            if let Some(id) = m.folders.get(name) {
                return Ok(id.clone());
            }
            m.next_id += 1;
            let id = RemoteId::new(format!("folder-{:06}", m.next_id));
            m.folders.insert(name.to_string(), id.clone());
            debug!(folder = name, remote_id = %id, "Created folder in remote directory");
            Ok(id)
        })
    }

    async fn changes_since(&self, cursor: Option<&SyncCursor>) -> SyncResult<ChangeBatch> {
        let manifest = self.exclusive(|| self.load())?;
        let since: u64 = match cursor {
            None => 0,
            Some(c) => c
                .as_str()
                .parse()
                .map_err(|_| SyncError::RemoteUnavailable(format!("invalid cursor {c}")))?,
        };

        // latest change per file, in change order
        let mut seen = HashSet::new();
        let mut latest = BTreeMap::new();
        for (seq, id) in manifest.changes.iter().rev() {
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
                file: manifest.files.get(id.as_str()).cloned(),
                remote_id: id,
            })
            .collect();
        Ok(ChangeBatch {
            entries,
            cursor: SyncCursor::new(manifest.next_seq.max(since).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_core::LocalId;
    use tempfile::TempDir;

    fn metadata(title: &str) -> RemoteMetadata {
        RemoteMetadata::for_note(title, LocalId::new())
    }

    #[tokio::test]
    async fn test_state_shared_between_handles() {
        let temp = TempDir::new().unwrap();
        let a = DirRemote::open(temp.path()).unwrap();
        let b = DirRemote::open(temp.path()).unwrap();

        let file = a.create(b"hello".to_vec(), metadata("Hi"), None).await.unwrap();

        assert_eq!(b.download(&file.id).await.unwrap(), b"hello");
        assert_eq!(b.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handles_on_one_directory_do_not_lose_writes() {
        let temp = TempDir::new().unwrap();
        // separate handles share nothing but the directory, like two processes
        let handles: Vec<_> = (0..2)
            .map(|_| std::sync::Arc::new(DirRemote::open(temp.path()).unwrap()))
            .collect();

        let mut tasks = Vec::new();
        for (n, remote) in handles.iter().enumerate() {
            for i in 0..10 {
                let remote = remote.clone();
                tasks.push(tokio::spawn(async move {
                    remote
                        .create(b"x".to_vec(), metadata(&format!("{n}-{i}")), None)
                        .await
                        .unwrap()
                }));
            }
        }
        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().id);
        }

        assert_eq!(ids.len(), 20);
        let reopened = DirRemote::open(temp.path()).unwrap();
        assert_eq!(reopened.list(None).await.unwrap().len(), 20);
        assert_eq!(reopened.changes_since(None).await.unwrap().entries.len(), 20);
    }

    #[tokio::test]
    async fn test_ensure_folder_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let folder = {
            let remote = DirRemote::open(temp.path()).unwrap();
            remote.ensure_folder("Notes").await.unwrap()
        };

        let remote = DirRemote::open(temp.path()).unwrap();
        assert_eq!(remote.ensure_folder("Notes").await.unwrap(), folder);
        let file = remote
            .create(b"x".to_vec(), metadata("A"), Some(&folder))
            .await
            .unwrap();
        assert_eq!(remote.list(Some(&folder)).await.unwrap(), vec![file]);
        assert!(remote.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_feed() {
        let temp = TempDir::new().unwrap();
        let remote = DirRemote::open(temp.path()).unwrap();

        let file = remote.create(b"1".to_vec(), metadata("A"), None).await.unwrap();
        let first = remote.changes_since(None).await.unwrap();
        assert_eq!(first.entries.len(), 1);

        remote.update(&file.id, b"2".to_vec(), metadata("A")).await.unwrap();
        remote.trash(&file.id).await.unwrap();

        let next = remote.changes_since(Some(&first.cursor)).await.unwrap();
        assert_eq!(next.entries.len(), 1);
        assert!(next.entries[0].file.as_ref().unwrap().trashed);
        assert!(remote.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let temp = TempDir::new().unwrap();
        let remote = DirRemote::open(temp.path()).unwrap();
        let missing = RemoteId::new("file-999999");

        assert!(matches!(
            remote.download(&missing).await,
            Err(SyncError::RemoteNotFound(_))
        ));
        assert!(matches!(
            remote.trash(&missing).await,
            Err(SyncError::RemoteNotFound(_))
        ));
    }
}
