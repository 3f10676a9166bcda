//! Synchronization with the remote store
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEngine::synchronize()                                      │
//! │  0. scan   re-hash note files, mark edited ones dirty           │
//! │  1. push   create / update / trash, bounded concurrency         │
//! │  2. purge  drop tombstones that never reached the remote        │
//! │  3. pull   apply changes_since(cursor), then advance cursor     │
//! │                                                                 │
//! │  ChangeNotifier                                                 │
//! │  └── NoteEvent::{Added, Updated, Deleted} over broadcast        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each phase finishes completely before the next starts.

pub mod engine;
pub mod events;
pub mod notifier;
mod pull;
mod push;

pub use engine::{PendingCounts, SyncEngine};
pub use events::{ChangeSet, NoteEvent, SyncReport};
pub use notifier::ChangeNotifier;
