//! SyncEngine - the caller-facing entry point
//!
//! The engine owns the [`LocalStore`], the [`RemoteStore`] handle and the
//! [`ChangeNotifier`]. Callers mutate notes through it so every change is
//! announced, and call [`SyncEngine::synchronize`] to exchange changes with
//! the remote.
//!
//! ## Example
//!
//! ```ignore
//! let remote = Arc::new(MemoryRemote::new());
//! let engine = SyncEngine::open("~/.notesync", remote, SyncConfig::default())?;
//! let note = engine.create_unique_note()?;
//! engine.write_content(&note.local_id(), "buy milk")?;
//! let report = engine.synchronize().await?;
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use super::events::{ChangeSet, NoteEvent, SyncReport};
use super::notifier::ChangeNotifier;
use super::{pull, push};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::factory::NoteFactory;
use crate::note::Note;
use crate::remote::RemoteStore;
use crate::store::LocalStore;
use crate::types::{LocalId, SyncCursor};

/// Notes waiting for the next sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Edits to upload or deletes to trash remotely
    pub push: usize,
    /// Never-pushed deletes to drop locally
    pub purge: usize,
}

impl PendingCounts {
    pub fn is_empty(&self) -> bool {
        self.push == 0 && self.purge == 0
    }
}

struct EngineInner {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    factory: NoteFactory,
    notifier: ChangeNotifier,
    /// Held for the whole of a sync or refresh
    sync_lock: Arc<Mutex<()>>,
    /// Last state announced per note by caller mutations since the current
    /// sync started; `None` marks a delete
    announced: parking_lot::Mutex<HashMap<LocalId, Option<Note>>>,
}

/// Keeps a [`LocalStore`] in sync with a [`RemoteStore`]. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine over an already opened store.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if `config` is unusable.
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let notifier = ChangeNotifier::new(config.event_capacity);
        let factory = NoteFactory::from_config(&config);
        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                config,
                factory,
                notifier,
                sync_lock: Arc::new(Mutex::new(())),
                announced: parking_lot::Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Open (or create) the store in `data_dir` and build an engine on it.
    pub fn open(
        data_dir: impl AsRef<Path>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let data_dir = data_dir.as_ref();
        info!(?data_dir, "Opening notesync engine");
        let store = LocalStore::open_dir(data_dir)?;
        Self::new(store, remote, config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Note Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Non-deleted notes ordered by title
    pub fn visible_notes(&self) -> Vec<Note> {
        self.inner.store.visible_notes()
    }

    pub fn get_note(&self, local_id: &LocalId) -> Option<Note> {
        self.inner.store.get(local_id).filter(|n| n.is_visible())
    }

    /// Create an empty note with the next free "Untitled" title.
    pub fn create_unique_note(&self) -> SyncResult<Note> {
        let note = self.inner.factory.create_unique_note(&self.inner.store)?;
        self.inner.remember(note.local_id(), Some(note.clone()));
        self.inner.notifier.added(note.clone());
        Ok(note)
    }

    pub fn update_title(&self, local_id: &LocalId, title: &str) -> SyncResult<bool> {
        let changed = self.inner.store.update_title(local_id, title)?;
        if changed {
            self.announce_update(local_id);
        }
        Ok(changed)
    }

    pub fn read_content(&self, local_id: &LocalId) -> SyncResult<String> {
        self.inner.store.read_content(local_id)
    }

    /// Replace a note's body. Identical text is a no-op and leaves the note
    /// clean.
    pub fn write_content(&self, local_id: &LocalId, text: &str) -> SyncResult<bool> {
        let changed = self.inner.store.write_content(local_id, text)?;
        if changed {
            self.announce_update(local_id);
        }
        Ok(changed)
    }

    /// Hide a note now; the remote delete (or local purge) happens on the
    /// next sync.
    pub fn mark_deleted(&self, local_id: &LocalId) -> SyncResult<()> {
        let before = self
            .inner
            .store
            .get(local_id)
            .ok_or_else(|| SyncError::NoteNotFound(local_id.to_string()))?;
        self.inner.store.mark_deleted(local_id)?;
        if before.is_visible() {
            self.inner.remember(*local_id, None);
            self.inner.notifier.deleted(before);
        }
        Ok(())
    }

    fn announce_update(&self, local_id: &LocalId) {
        if let Some(note) = self.inner.store.get(local_id) {
            self.inner.remember(*local_id, Some(note.clone()));
            self.inner.notifier.updated(note);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Subscribe to note events
    pub fn subscribe(&self) -> broadcast::Receiver<NoteEvent> {
        self.inner.notifier.subscribe()
    }

    /// Last change feed position fully applied
    pub fn cursor(&self) -> SyncResult<Option<SyncCursor>> {
        self.inner.store.storage().load_cursor()
    }

    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            push: self.inner.store.pending_push().len(),
            purge: self.inner.store.pending_purge().len(),
        }
    }

    /// Run scan, push, purge and pull, in that order.
    ///
    /// Partial failures are returned in [`SyncReport::errors`] rather than
    /// failing the call. The work runs on its own task, so dropping the
    /// returned future does not interrupt a sync halfway.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::SyncInProgress` if a sync or refresh is running.
    pub async fn synchronize(&self) -> SyncResult<SyncReport> {
        self.run_exclusive(|inner| async move { inner.run_sync().await })
            .await
    }

    /// Reconcile local notes against a full listing of the remote folder,
    /// without pushing and without moving the cursor.
    pub async fn refresh_from_remote(&self) -> SyncResult<SyncReport> {
        self.run_exclusive(|inner| async move { inner.run_refresh().await })
            .await
    }

    async fn run_exclusive<F, Fut>(&self, job: F) -> SyncResult<SyncReport>
    where
        F: FnOnce(Arc<EngineInner>) -> Fut,
        Fut: std::future::Future<Output = SyncReport> + Send + 'static,
    {
        let guard = self
            .inner
            .sync_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| SyncError::SyncInProgress)?;

        let work = job(self.inner.clone());
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });

        match handle.await {
            Ok(report) => Ok(report),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                format!("sync task cancelled: {e}"),
            ))),
        }
    }
}

impl EngineInner {
    async fn run_sync(&self) -> SyncReport {
        let before = self.snapshot();
        let mut report = SyncReport::default();
        info!(pending = self.store.pending_push().len(), "Starting sync");

        // scan for edits made outside the store
        let (dirtied, errors) = self.store.refresh_fingerprints();
        if dirtied > 0 {
            info!(dirtied, "Found notes edited on disk");
        }
        report.errors.extend(errors);

        let pushed = push::push_pending(&self.store, self.remote.as_ref(), &self.config).await;
        report.pushed = pushed.pushed;
        report.errors.extend(pushed.errors);

        for note in self.store.pending_purge() {
            match self.store.purge(&note.local_id()) {
                Ok(Some(_)) => report.purged += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(local_id = %note.local_id(), error = %e, "Purge failed");
                    report.errors.push(e);
                }
            }
        }

        let pulled = pull::pull_changes(&self.store, self.remote.as_ref(), &self.config).await;
        report.pulled = pulled.pulled;
        report.errors.extend(pulled.errors);

        self.finish(before, report, "Sync finished")
    }

    async fn run_refresh(&self) -> SyncReport {
        let before = self.snapshot();
        let mut report = SyncReport::default();

        let pulled = pull::refresh_all(&self.store, self.remote.as_ref(), &self.config).await;
        report.pulled = pulled.pulled;
        report.errors.extend(pulled.errors);

        self.finish(before, report, "Refresh finished")
    }

    fn remember(&self, local_id: LocalId, state: Option<Note>) {
        self.announced.lock().insert(local_id, state);
    }

    /// Visible notes at the start of a run; caller announcements start over.
    fn snapshot(&self) -> Vec<Note> {
        self.announced.lock().clear();
        self.store.visible_notes()
    }

    /// Drop changes whose final state a caller mutation already announced
    /// while the run was in flight.
    fn without_announced(&self, mut changes: ChangeSet) -> ChangeSet {
        let announced = std::mem::take(&mut *self.announced.lock());
        let echoed = |note: &Note| {
            matches!(
                announced.get(&note.local_id()),
                Some(Some(seen)) if seen.title() == note.title() && seen.fingerprint() == note.fingerprint()
            )
        };
        changes.added.retain(|n| !echoed(n));
        changes.updated.retain(|n| !echoed(n));
        changes
            .deleted
            .retain(|n| !matches!(announced.get(&n.local_id()), Some(None)));
        changes
    }

    fn finish(&self, before: Vec<Note>, mut report: SyncReport, message: &'static str) -> SyncReport {
        let changes = self.without_announced(ChangeSet::diff(&before, &self.store.visible_notes()));
        self.notifier.notify(changes.clone());
        report.changes = changes;
        info!(
            pushed = report.pushed,
            purged = report.purged,
            pulled = report.pulled,
            changed = report.changes.len(),
            errors = report.errors.len(),
            "{message}"
        );
        report
    }
}
