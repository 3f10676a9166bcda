//! notesync Core Library
//!
//! A local note collection kept in sync with a cloud drive.
//!
//! ## Overview
//!
//! Notes live locally: a record per note in a redb database and the body in
//! a plain text file. Every edit marks the note dirty. A sync pushes dirty
//! notes and deletes to the remote, purges deletes that never left the
//! device, then pulls the remote change feed. When both sides changed a note,
//! the local edit wins.
//!
//! ## Core Principles
//!
//! - **Local-first**: every operation except sync works offline
//! - **Nothing lost silently**: a failed push keeps the note dirty, a failed
//!   pull keeps the cursor, and every error is reported
//! - **Fingerprints, not clocks**: content changes are detected by hashing
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use notesync_core::{MemoryRemote, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let remote = Arc::new(MemoryRemote::new());
//!     let engine = SyncEngine::open("~/.notesync", remote, SyncConfig::default())?;
//!
//!     let note = engine.create_unique_note()?;
//!     engine.write_content(&note.local_id(), "Plant garden")?;
//!
//!     let report = engine.synchronize().await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod files;
pub mod note;
pub mod remote;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use factory::NoteFactory;
pub use files::{FsFileOps, LocalFileOps};
pub use note::Note;
pub use remote::{
    ChangeBatch, ChangeEntry, MemoryRemote, RemoteFile, RemoteMetadata, RemoteOp, RemoteStore,
    NOTE_MIME_TYPE,
};
pub use storage::Storage;
pub use store::{ApplyOutcome, LocalStore, PushSnapshot, RemoteChange};
pub use sync::{ChangeNotifier, ChangeSet, NoteEvent, PendingCounts, SyncEngine, SyncReport};
pub use types::*;
