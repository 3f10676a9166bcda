//! Engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::types::RemoteId;

/// Default number of concurrent remote pushes
pub const DEFAULT_PUSH_CONCURRENCY: usize = 4;

/// Default bound on title candidates tried by the note factory
pub const DEFAULT_MAX_TITLE_ATTEMPTS: usize = 100;

/// Default base title for new notes
pub const DEFAULT_TITLE: &str = "Untitled";

/// Default capacity for the note event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables for the sync engine and note factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on pushes in flight during the push phase
    pub push_concurrency: usize,
    /// How many titles the factory tries before giving up
    pub max_title_attempts: usize,
    /// Base title for new notes ("Untitled", "Untitled 2", ...)
    pub default_title: String,
    /// Remote folder notes live in. `None` means the store's root.
    pub remote_folder: Option<RemoteId>,
    /// Name of a folder to find or create at the remote root when
    /// `remote_folder` is unset
    pub folder_name: Option<String>,
    /// Buffered events per subscriber before lagging
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
            max_title_attempts: DEFAULT_MAX_TITLE_ATTEMPTS,
            default_title: DEFAULT_TITLE.to_string(),
            remote_folder: None,
            folder_name: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Load a JSON config file, falling back to defaults when it is absent.
    ///
    /// Missing keys take their default value.
    pub fn load_or_default(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        let config: SyncConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> SyncResult<()> {
        if self.push_concurrency == 0 {
            return Err(SyncError::Validation(
                "push_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_title_attempts == 0 {
            return Err(SyncError::Validation(
                "max_title_attempts must be at least 1".to_string(),
            ));
        }
        if self.default_title.trim().is_empty() {
            return Err(SyncError::Validation(
                "default_title must not be empty".to_string(),
            ));
        }
        if self
            .folder_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(SyncError::Validation(
                "folder_name must not be empty".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::Validation(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Fill in `remote_folder` from `folder_name`, creating the folder on
    /// the remote if needed. An explicit `remote_folder` is kept as is.
    pub async fn resolve_remote_folder(&mut self, remote: &dyn RemoteStore) -> SyncResult<()> {
        if self.remote_folder.is_some() {
            return Ok(());
        }
        let Some(name) = self.folder_name.as_deref() else {
            return Ok(());
        };
        let id = remote.ensure_folder(name.trim()).await?;
        info!(folder = name, remote_id = %id, "Resolved remote folder");
        self.remote_folder = Some(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteOp};
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.push_concurrency, 4);
        assert_eq!(config.max_title_attempts, 100);
        assert_eq!(config.default_title, "Untitled");
        assert!(config.remote_folder.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = SyncConfig::load_or_default(temp.path().join("absent.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notesync.json");
        std::fs::write(&path, r#"{ "push_concurrency": 2, "remote_folder": "abc" }"#).unwrap();

        let config = SyncConfig::load_or_default(&path).unwrap();
        assert_eq!(config.push_concurrency, 2);
        assert_eq!(config.remote_folder, Some(RemoteId::new("abc")));
        assert_eq!(config.max_title_attempts, DEFAULT_MAX_TITLE_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_folder_name_resolves_once() {
        let remote = MemoryRemote::new();
        let mut config = SyncConfig {
            folder_name: Some("Notes".to_string()),
            ..Default::default()
        };
        config.resolve_remote_folder(&remote).await.unwrap();
        let folder = config.remote_folder.clone().unwrap();

        let mut again = SyncConfig {
            folder_name: Some("Notes".to_string()),
            ..Default::default()
        };
        again.resolve_remote_folder(&remote).await.unwrap();
        assert_eq!(again.remote_folder, Some(folder));
    }

    #[tokio::test]
    async fn test_explicit_folder_skips_lookup() {
        let remote = MemoryRemote::new();
        let mut config = SyncConfig {
            remote_folder: Some(RemoteId::new("abc")),
            folder_name: Some("Notes".to_string()),
            ..Default::default()
        };
        config.resolve_remote_folder(&remote).await.unwrap();
        assert_eq!(config.remote_folder, Some(RemoteId::new("abc")));
        assert_eq!(remote.call_count(RemoteOp::Folder), 0);

        let mut plain = SyncConfig::default();
        plain.resolve_remote_folder(&remote).await.unwrap();
        assert!(plain.remote_folder.is_none());
        assert!(remote.calls().is_empty());
    }

    #[test]
    fn test_blank_folder_name_rejected() {
        let config = SyncConfig {
            folder_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notesync.json");
        std::fs::write(&path, r#"{ "push_concurrency": 0 }"#).unwrap();

        let err = SyncConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
