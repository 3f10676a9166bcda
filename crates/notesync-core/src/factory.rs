//! Creation of uniquely titled notes

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::note::Note;
use crate::store::LocalStore;

/// Produces new notes titled "Untitled", "Untitled 2", "Untitled 3", ...
#[derive(Debug, Clone)]
pub struct NoteFactory {
    base_title: String,
    max_attempts: usize,
}

impl NoteFactory {
    pub fn new(base_title: impl Into<String>, max_attempts: usize) -> Self {
        Self {
            base_title: base_title.into(),
            max_attempts,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.default_title.clone(), config.max_title_attempts)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Candidate title for the given attempt (1-based)
    pub fn candidate(&self, attempt: usize) -> String {
        if attempt <= 1 {
            self.base_title.clone()
        } else {
            format!("{} {}", self.base_title, attempt)
        }
    }

    /// First candidate not in `taken`, trying at most `max_attempts`.
    pub fn unique_title(&self, taken: &HashSet<String>) -> SyncResult<String> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate(attempt);
            if !taken.contains(&candidate) {
                debug!(attempt, title = %candidate, "Picked note title");
                return Ok(candidate);
            }
        }
        warn!(attempts = self.max_attempts, "Ran out of unique note titles");
        Err(SyncError::TooManyAttempts(self.max_attempts))
    }

    /// Create a new dirty, empty, never pushed note in `store`.
    pub fn create_unique_note(&self, store: &LocalStore) -> SyncResult<Note> {
        store.insert_new(|taken| self.unique_title(taken))
    }
}

impl Default for NoteFactory {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
