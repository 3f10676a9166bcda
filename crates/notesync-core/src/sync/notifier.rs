//! Broadcast of [`NoteEvent`]s to any number of subscribers

use tokio::sync::broadcast;
use tracing::trace;

use super::events::{ChangeSet, NoteEvent};
use crate::note::Note;

/// Fire-and-forget sender for note events.
///
/// Sending never blocks and never fails the caller: with no subscriber the
/// event is dropped, and a slow subscriber sees `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<NoteEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NoteEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit one event per non-empty category of `changes`.
    pub fn notify(&self, changes: ChangeSet) {
        for event in changes.into_events() {
            self.send(event);
        }
    }

    pub fn added(&self, note: Note) {
        self.send(NoteEvent::Added(vec![note]));
    }

    pub fn updated(&self, note: Note) {
        self.send(NoteEvent::Updated(vec![note]));
    }

    pub fn deleted(&self, note: Note) {
        self.send(NoteEvent::Deleted(vec![note]));
    }

    fn send(&self, event: NoteEvent) {
        let kind = event.kind();
        let count = event.notes().len();
        // Err only means nobody is listening
        if self.tx.send(event).is_err() {
            trace!(kind, count, "No subscribers for note event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers_is_fine() {
        let notifier = ChangeNotifier::new(4);
        notifier.added(Note::new("A"));
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_notify_emits_in_order() {
        let notifier = ChangeNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.notify(ChangeSet {
            added: vec![],
            updated: vec![Note::new("U")],
            deleted: vec![Note::new("D")],
        });

        assert!(matches!(rx.recv().await.unwrap(), NoteEvent::Updated(n) if n.len() == 1));
        assert!(matches!(rx.recv().await.unwrap(), NoteEvent::Deleted(n) if n.len() == 1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_does_not_block_sender() {
        let notifier = ChangeNotifier::new(1);
        let mut rx = notifier.subscribe();

        for i in 0..5 {
            notifier.added(Note::new(format!("N{i}")));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
