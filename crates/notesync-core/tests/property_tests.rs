//! Property-based tests for notes and the local store
//!
//! Uses proptest to check title uniqueness and content round trips over
//! arbitrary operation sequences.

use std::collections::HashSet;
use std::sync::Arc;

use notesync_core::{Fingerprint, MemoryRemote, SyncConfig, SyncEngine};
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Strategy Generators
// ============================================================================

fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{1,40}")
        .expect("valid regex")
        .prop_filter("non-blank", |s| !s.trim().is_empty())
}

fn content_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("(?s).{0,500}").expect("valid regex")
}

#[derive(Debug, Clone)]
enum NoteOp {
    Create,
    Rename(usize, String),
    Delete(usize),
}

fn ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<NoteOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(NoteOp::Create),
            2 => (0..50usize, title_strategy()).prop_map(|(i, t)| NoteOp::Rename(i, t)),
            1 => (0..50usize).prop_map(NoteOp::Delete),
        ],
        0..max_ops,
    )
}

fn create_test_engine() -> (SyncEngine, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let engine = SyncEngine::open(
        temp_dir.path(),
        Arc::new(MemoryRemote::new()),
        SyncConfig::default(),
    )
    .unwrap();
    (engine, temp_dir)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Visible titles stay unique whatever creates, renames and deletes run
    #[test]
    fn visible_titles_stay_unique(ops in ops_strategy(30)) {
        let (engine, _temp) = create_test_engine();

        for op in ops {
            let visible = engine.visible_notes();
            match op {
                NoteOp::Create => {
                    engine.create_unique_note().unwrap();
                }
                NoteOp::Rename(i, title) if !visible.is_empty() => {
                    let note = &visible[i % visible.len()];
                    // a clash is rejected, anything else succeeds
                    let _ = engine.update_title(&note.local_id(), &title);
                }
                NoteOp::Delete(i) if !visible.is_empty() => {
                    let note = &visible[i % visible.len()];
                    engine.mark_deleted(&note.local_id()).unwrap();
                }
                _ => {}
            }

            let titles: Vec<String> = engine
                .visible_notes()
                .iter()
                .map(|n| n.title().to_string())
                .collect();
            let unique: HashSet<&String> = titles.iter().collect();
            prop_assert_eq!(unique.len(), titles.len());
        }
    }

    /// Written content reads back identically with a matching fingerprint
    #[test]
    fn content_roundtrip(content in content_strategy()) {
        let (engine, _temp) = create_test_engine();
        let note = engine.create_unique_note().unwrap();

        engine.write_content(&note.local_id(), &content).unwrap();

        prop_assert_eq!(engine.read_content(&note.local_id()).unwrap(), content.clone());
        let stored = engine.get_note(&note.local_id()).unwrap();
        prop_assert_eq!(stored.fingerprint(), &Fingerprint::of(content.as_bytes()));
    }

    /// Visible notes are always ordered by lowercase title
    #[test]
    fn visible_notes_sorted(titles in prop::collection::hash_set(title_strategy(), 1..10)) {
        let (engine, _temp) = create_test_engine();
        for title in &titles {
            let note = engine.create_unique_note().unwrap();
            let _ = engine.update_title(&note.local_id(), title);
        }

        let keys: Vec<String> = engine
            .visible_notes()
            .iter()
            .map(|n| n.title().to_lowercase())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        prop_assert_eq!(keys, sorted);
    }
}
