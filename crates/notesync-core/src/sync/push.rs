//! Push phase: send local edits and deletes to the remote

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::note::Note;
use crate::remote::{RemoteFile, RemoteMetadata, RemoteStore};
use crate::store::{LocalStore, PushSnapshot};
use crate::types::{Fingerprint, LocalId};

/// Result of one push pass
#[derive(Debug, Default)]
pub(crate) struct PushOutcome {
    pub pushed: usize,
    pub errors: Vec<SyncError>,
}

/// What a single note push did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushKind {
    Created,
    Adopted,
    Updated,
    /// Uploaded again after the remote file was removed for good
    Replaced,
    Trashed,
    /// Left for a later pass
    Skipped,
}

/// Push every pending note, at most `push_concurrency` at a time.
///
/// Returns once every push has finished, successfully or not.
pub(crate) async fn push_pending(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    config: &SyncConfig,
) -> PushOutcome {
    let mut outcome = PushOutcome::default();
    let pending = store.pending_push();
    if pending.is_empty() {
        return outcome;
    }

    // A create whose response was lost left a file stamped with our local ID.
    // One listing per pass finds those so they are updated, not duplicated.
    let needs_create = pending.iter().any(|n| n.remote_id().is_none());
    let existing = if needs_create {
        match existing_by_local_id(remote, config).await {
            Ok(map) => Some(map),
            Err(e) => {
                warn!(error = %e, "Could not list remote folder, skipping creates this pass");
                outcome.errors.push(e);
                None
            }
        }
    } else {
        Some(HashMap::new())
    };

    info!(count = pending.len(), "Pushing local changes");
    let results: Vec<(LocalId, SyncResult<PushKind>)> = stream::iter(pending)
        .map(|note| {
            let adoptable = existing
                .as_ref()
                .and_then(|m| m.get(&note.local_id()).cloned());
            let can_create = existing.is_some();
            async move {
                let id = note.local_id();
                (id, push_one(store, remote, config, note, adoptable, can_create).await)
            }
        })
        .buffer_unordered(config.push_concurrency.max(1))
        .collect()
        .await;

    for (local_id, result) in results {
        match result {
            Ok(PushKind::Skipped) => {}
            Ok(kind) => {
                debug!(%local_id, ?kind, "Pushed note");
                outcome.pushed += 1;
            }
            Err(e) => {
                warn!(%local_id, error = %e, retryable = e.is_retryable(), "Push failed");
                outcome.errors.push(e);
            }
        }
    }
    outcome
}

async fn existing_by_local_id(
    remote: &dyn RemoteStore,
    config: &SyncConfig,
) -> SyncResult<HashMap<LocalId, RemoteFile>> {
    let files = remote.list(config.remote_folder.as_ref()).await?;
    Ok(files
        .into_iter()
        .filter_map(|f| f.local_id.map(|id| (id, f)))
        .collect())
}

/// Upload a note whose remote file no longer exists. A file stamped with the
/// note's local ID from an earlier attempt is reused instead of duplicated.
async fn reupload(
    remote: &dyn RemoteStore,
    config: &SyncConfig,
    local_id: LocalId,
    bytes: Vec<u8>,
    metadata: RemoteMetadata,
) -> SyncResult<RemoteFile> {
    match existing_by_local_id(remote, config).await?.remove(&local_id) {
        Some(found) => remote.update(&found.id, bytes, metadata).await,
        None => {
            remote
                .create(bytes, metadata, config.remote_folder.as_ref())
                .await
        }
    }
}

async fn push_one(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    config: &SyncConfig,
    note: Note,
    adoptable: Option<RemoteFile>,
    can_create: bool,
) -> SyncResult<PushKind> {
    let local_id = note.local_id();

    if note.is_deleted() {
        let Some(remote_id) = note.remote_id() else {
            return Ok(PushKind::Skipped);
        };
        match remote.trash(remote_id).await {
            Ok(_) => {}
            // already gone remotely; the delete is reflected either way
            Err(SyncError::RemoteNotFound(_)) => {
                debug!(%local_id, %remote_id, "Remote file already gone");
            }
            Err(e) => return Err(e),
        }
        store.purge(&local_id)?;
        return Ok(PushKind::Trashed);
    }

    let content = store.read_content(&local_id)?;
    let snapshot = PushSnapshot {
        local_id,
        title: note.title().to_string(),
        fingerprint: Fingerprint::of(content.as_bytes()),
    };
    let metadata = RemoteMetadata::for_note(note.title(), local_id);
    let bytes = content.into_bytes();

    let (file, kind) = match (note.remote_id(), adoptable) {
        (Some(remote_id), _) => match remote.update(remote_id, bytes.clone(), metadata.clone()).await {
            Ok(file) => (file, PushKind::Updated),
            Err(SyncError::RemoteNotFound(_)) => {
                warn!(%local_id, %remote_id, "Remote file removed, uploading note again");
                let file = reupload(remote, config, local_id, bytes, metadata).await?;
                store.replace_remote_id(&local_id, &file.id)?;
                (file, PushKind::Replaced)
            }
            Err(e) => return Err(e),
        },
        (None, Some(found)) => {
            info!(%local_id, remote_id = %found.id, "Adopting remote file from an earlier create");
            (remote.update(&found.id, bytes, metadata).await?, PushKind::Adopted)
        }
        (None, None) if can_create => (
            remote
                .create(bytes, metadata, config.remote_folder.as_ref())
                .await?,
            PushKind::Created,
        ),
        (None, None) => return Ok(PushKind::Skipped),
    };

    // updating a trashed file leaves it in the trash; local edits win
    let file = if file.trashed {
        info!(%local_id, remote_id = %file.id, "Restoring trashed remote file for local edits");
        remote.restore(&file.id).await?
    } else {
        file
    };

    if !store.confirm_push(&snapshot, &file)? {
        debug!(%local_id, "Note changed during push, stays dirty");
    }
    Ok(kind)
}
