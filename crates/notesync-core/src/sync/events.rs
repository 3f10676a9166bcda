//! Change notifications and sync results
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ChangeSet: visible notes before vs after a sync                │
//! │  ├── added:   visible now, not before                           │
//! │  ├── updated: visible both times, title or fingerprint moved    │
//! │  └── deleted: visible before, gone now                          │
//! │                                                                 │
//! │  NoteEvent: one broadcast per non-empty ChangeSet category      │
//! │  SyncReport: what one synchronize() call did                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::error::SyncError;
use crate::note::Note;
use crate::types::LocalId;

/// Broadcast to subscribers when visible notes change
#[derive(Debug, Clone, PartialEq)]
pub enum NoteEvent {
    Added(Vec<Note>),
    Updated(Vec<Note>),
    /// Notes as they were last visible
    Deleted(Vec<Note>),
}

impl NoteEvent {
    pub fn notes(&self) -> &[Note] {
        match self {
            NoteEvent::Added(n) | NoteEvent::Updated(n) | NoteEvent::Deleted(n) => n,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NoteEvent::Added(_) => "added",
            NoteEvent::Updated(_) => "updated",
            NoteEvent::Deleted(_) => "deleted",
        }
    }
}

/// Difference between two snapshots of the visible notes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<Note>,
    pub updated: Vec<Note>,
    pub deleted: Vec<Note>,
}

impl ChangeSet {
    /// Compare `before` and `after`, matching notes by local ID.
    pub fn diff(before: &[Note], after: &[Note]) -> Self {
        let previous: HashMap<LocalId, &Note> = before.iter().map(|n| (n.local_id(), n)).collect();
        let current: HashMap<LocalId, &Note> = after.iter().map(|n| (n.local_id(), n)).collect();

        let mut changes = ChangeSet::default();
        for note in after {
            match previous.get(&note.local_id()) {
                None => changes.added.push(note.clone()),
                Some(old) if old.title() != note.title() || old.fingerprint() != note.fingerprint() => {
                    changes.updated.push(note.clone())
                }
                Some(_) => {}
            }
        }
        changes.deleted = before
            .iter()
            .filter(|n| !current.contains_key(&n.local_id()))
            .cloned()
            .collect();
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    /// Events for the non-empty categories: added, then updated, then deleted.
    pub fn into_events(self) -> Vec<NoteEvent> {
        [
            NoteEvent::Added(self.added),
            NoteEvent::Updated(self.updated),
            NoteEvent::Deleted(self.deleted),
        ]
        .into_iter()
        .filter(|e| !e.notes().is_empty())
        .collect()
    }
}

/// Outcome of one sync run
///
/// A run never fails as a whole; per-note and per-phase failures land in
/// `errors` and are retried by the next run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub errors: Vec<SyncError>,
    /// Visible-note changes the run itself caused. Edits made through the
    /// engine while it ran were announced on their own and are left out.
    pub changes: ChangeSet,
    /// Remote creates, updates and trashes that succeeded
    pub pushed: usize,
    /// Never-pushed tombstones removed locally
    pub purged: usize,
    /// Remote changes applied locally
    pub pulled: usize,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pushed {}, purged {}, pulled {}, {} added, {} updated, {} deleted, {} errors",
            self.pushed,
            self.purged,
            self.pulled,
            self.changes.added.len(),
            self.changes.updated.len(),
            self.changes.deleted.len(),
            self.errors.len()
        )
    }
}
