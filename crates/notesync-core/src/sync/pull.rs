//! Pull phase: apply the remote change feed locally

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{ChangeEntry, RemoteStore};
use crate::store::{ApplyOutcome, LocalStore, RemoteChange};

/// Result of one pull
#[derive(Debug, Default)]
pub(crate) struct PullOutcome {
    pub pulled: usize,
    pub errors: Vec<SyncError>,
}

impl PullOutcome {
    fn record(&mut self, result: SyncResult<ApplyOutcome>) {
        match result {
            Ok(ApplyOutcome::Unchanged | ApplyOutcome::KeptLocal | ApplyOutcome::RestoreRemote) => {}
            Ok(_) => self.pulled += 1,
            Err(e) => self.errors.push(e),
        }
    }
}

/// Fetch changes since the stored cursor and apply them.
///
/// The cursor moves to the batch's cursor only when every entry applied
/// cleanly; otherwise the whole batch is offered again next time.
pub(crate) async fn pull_changes(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    config: &SyncConfig,
) -> PullOutcome {
    let mut outcome = PullOutcome::default();

    let cursor = match store.storage().load_cursor() {
        Ok(c) => c,
        Err(e) => {
            outcome.errors.push(e);
            return outcome;
        }
    };

    let batch = match remote.changes_since(cursor.as_ref()).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "Could not fetch remote changes");
            outcome.errors.push(e);
            return outcome;
        }
    };
    debug!(entries = batch.entries.len(), cursor = %batch.cursor, "Fetched remote changes");

    for entry in batch.entries {
        if !in_folder(&entry, config) {
            continue;
        }
        let change = match &entry.file {
            Some(file) => RemoteChange::from_file(file),
            None => RemoteChange::removed(entry.remote_id.clone()),
        };
        let result = apply_change(store, remote, change).await;
        if let Err(e) = &result {
            warn!(
                remote_id = %entry.remote_id,
                error = %e,
                retryable = e.is_retryable(),
                "Could not apply remote change"
            );
        }
        outcome.record(result);
    }

    if outcome.errors.is_empty() {
        match store.storage().save_cursor(&batch.cursor) {
            Ok(()) => debug!(cursor = %batch.cursor, "Advanced sync cursor"),
            Err(e) => outcome.errors.push(e),
        }
    } else {
        info!(
            errors = outcome.errors.len(),
            "Pull had errors, cursor left in place"
        );
    }
    outcome
}

/// Reconcile against a full listing of the remote folder.
///
/// Notes that were synced but are missing from the listing are treated as
/// trashed remotely. The change cursor is not touched.
pub(crate) async fn refresh_all(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    config: &SyncConfig,
) -> PullOutcome {
    let mut outcome = PullOutcome::default();

    let files = match remote.list(config.remote_folder.as_ref()).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "Could not list remote folder");
            outcome.errors.push(e);
            return outcome;
        }
    };

    let listed: HashSet<_> = files.iter().map(|f| f.id.clone()).collect();
    for file in &files {
        let result = apply_change(store, remote, RemoteChange::from_file(file)).await;
        outcome.record(result);
    }

    let missing: Vec<_> = store
        .all_notes()
        .into_iter()
        .filter_map(|n| n.remote_id().cloned())
        .filter(|id| !listed.contains(id))
        .collect();
    for remote_id in missing {
        let result = apply_change(store, remote, RemoteChange::removed(remote_id)).await;
        outcome.record(result);
    }

    info!(listed = files.len(), pulled = outcome.pulled, "Refreshed from remote listing");
    outcome
}

/// Download the body when needed, apply, and restore a remotely trashed file
/// that still has local edits.
async fn apply_change(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    mut change: RemoteChange,
) -> SyncResult<ApplyOutcome> {
    if !change.trashed && store.wants_content(&change.remote_id, change.fingerprint.as_ref()) {
        let bytes = remote.download(&change.remote_id).await?;
        let content = String::from_utf8(bytes).map_err(|_| {
            SyncError::Validation(format!("remote file {} is not UTF-8 text", change.remote_id))
        })?;
        change.content = Some(content);
    }

    let remote_id = change.remote_id.clone();
    let outcome = store.apply_remote_change(change)?;
    if outcome == ApplyOutcome::RestoreRemote {
        info!(%remote_id, "Restoring remotely trashed note with local edits");
        match remote.restore(&remote_id).await {
            Ok(_) => {}
            // removed for good, not trashed: the next push uploads a new file
            Err(SyncError::RemoteNotFound(_)) => {
                debug!(%remote_id, "Nothing to restore, remote file is gone");
                return Ok(ApplyOutcome::KeptLocal);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outcome)
}

/// Whether an entry belongs to the configured folder (the root when unset).
/// Entries without metadata are kept; only known notes react to them.
fn in_folder(entry: &ChangeEntry, config: &SyncConfig) -> bool {
    match &entry.file {
        Some(file) => file.folder == config.remote_folder,
        None => true,
    }
}
