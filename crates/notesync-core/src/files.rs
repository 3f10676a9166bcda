//! Local file collaborator
//!
//! Note bodies live outside the note records, one file per note. The store
//! only ever talks to them through [`LocalFileOps`], so tests and embedders
//! can swap the filesystem for something else.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// File access used by notes and the local store.
///
/// File references are names relative to whatever root the implementation
/// manages.
pub trait LocalFileOps: Send + Sync {
    /// Read the whole file. A missing file is an error.
    fn read(&self, file: &str) -> SyncResult<Vec<u8>>;

    /// Create or truncate the file with `bytes`.
    fn write(&self, file: &str, bytes: &[u8]) -> SyncResult<()>;

    /// Move `new` into the place of `old`, returning the reference that now
    /// holds the content. On failure `old` must still be intact.
    fn atomic_replace(&self, old: &str, new: &str) -> SyncResult<String>;

    /// Remove the file. Removing a missing file succeeds.
    fn remove(&self, file: &str) -> SyncResult<()>;
}

/// [`LocalFileOps`] over a directory on disk
#[derive(Debug, Clone)]
pub struct FsFileOps {
    root: PathBuf,
}

impl FsFileOps {
    /// Use `root` as the notes directory, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> SyncResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, file: &str) -> SyncResult<PathBuf> {
        if file.is_empty() || file.contains('/') || file.contains('\\') || file == ".." {
            return Err(SyncError::LocalIo(format!("invalid file reference: {file:?}")));
        }
        Ok(self.root.join(file))
    }
}

fn local_io(action: &str, file: &str, e: std::io::Error) -> SyncError {
    SyncError::LocalIo(format!("{action} {file}: {e}"))
}

impl LocalFileOps for FsFileOps {
    fn read(&self, file: &str) -> SyncResult<Vec<u8>> {
        let path = self.path(file)?;
        std::fs::read(&path).map_err(|e| local_io("read", file, e))
    }

    fn write(&self, file: &str, bytes: &[u8]) -> SyncResult<()> {
        let path = self.path(file)?;
        std::fs::write(&path, bytes).map_err(|e| local_io("write", file, e))
    }

    fn atomic_replace(&self, old: &str, new: &str) -> SyncResult<String> {
        let old_path = self.path(old)?;
        let new_path = self.path(new)?;
        // rename(2) replaces the destination atomically on the same filesystem
        std::fs::rename(&new_path, &old_path).map_err(|e| {
            warn!(old, new, error = %e, "Atomic replace failed");
            local_io("replace", old, e)
        })?;
        debug!(old, new, "Replaced file");
        Ok(old.to_string())
    }

    fn remove(&self, file: &str) -> SyncResult<()> {
        let path = self.path(file)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(local_io("remove", file, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_ops() -> (FsFileOps, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ops = FsFileOps::new(temp_dir.path().join("notes")).unwrap();
        (ops, temp_dir)
    }

    #[test]
    fn test_write_then_read() {
        let (ops, _temp) = create_test_ops();
        ops.write("a.txt", b"hello").unwrap();
        assert_eq!(ops.read("a.txt").unwrap(), b"hello");
    }

    #[test]
    fn test_read_missing_is_local_io() {
        let (ops, _temp) = create_test_ops();
        let err = ops.read("missing.txt").unwrap_err();
        assert!(matches!(err, SyncError::LocalIo(_)));
    }

    #[test]
    fn test_atomic_replace_moves_content() {
        let (ops, _temp) = create_test_ops();
        ops.write("a.txt", b"old").unwrap();
        ops.write("a.txt.tmp", b"new").unwrap();

        let result = ops.atomic_replace("a.txt", "a.txt.tmp").unwrap();
        assert_eq!(result, "a.txt");
        assert_eq!(ops.read("a.txt").unwrap(), b"new");
        assert!(ops.read("a.txt.tmp").is_err());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (ops, _temp) = create_test_ops();
        ops.write("a.txt", b"x").unwrap();
        ops.remove("a.txt").unwrap();
        ops.remove("a.txt").unwrap();
        assert!(ops.read("a.txt").is_err());
    }

    #[test]
    fn test_rejects_paths_outside_root() {
        let (ops, _temp) = create_test_ops();
        assert!(ops.write("../escape.txt", b"x").is_err());
        assert!(ops.read("").is_err());
    }
}
