//! Per-entry outcome reporting.

use tokio::sync::mpsc;
use tracing::info;

use crate::item::Outcome;

/// Emitted once per entry the processor finishes, processed or skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub entry_id: String,
    pub item_id: String,
    pub item_name: String,
    pub outcome: Outcome,
}

impl ProcessedEvent {
    /// Human-readable summary: `#{index}  {name}` for a first completion,
    /// `Skipping duplicate payment: {item id}` for a duplicate.
    pub fn display_line(&self) -> String {
        match self.outcome {
            Outcome::Processed { index } => format!("#{index}  {}", self.item_name),
            Outcome::Skipped => format!("Skipping duplicate payment: {}", self.item_id),
        }
    }
}

/// Receives processing outcomes. Called on the worker task, so
/// implementations must not block.
pub trait EventSink: Send + Sync {
    fn record(&self, event: ProcessedEvent);
}

/// Writes each outcome to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: ProcessedEvent) {
        match event.outcome {
            Outcome::Processed { index } => info!(
                entry_id = %event.entry_id,
                item_id = %event.item_id,
                index,
                "{}", event.display_line()
            ),
            Outcome::Skipped => info!(
                entry_id = %event.entry_id,
                item_id = %event.item_id,
                "{}", event.display_line()
            ),
        }
    }
}

/// Forwards outcomes to an unbounded channel. Events are dropped once the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProcessedEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn record(&self, event: ProcessedEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outcome: Outcome) -> ProcessedEvent {
        ProcessedEvent {
            entry_id: "1-0".to_string(),
            item_id: "abc123".to_string(),
            item_name: "Rustic Wooden Table".to_string(),
            outcome,
        }
    }

    #[test]
    fn processed_line_shows_index_and_name() {
        assert_eq!(
            event(Outcome::Processed { index: 12 }).display_line(),
            "#12  Rustic Wooden Table"
        );
    }

    #[test]
    fn skipped_line_shows_item_id() {
        assert_eq!(
            event(Outcome::Skipped).display_line(),
            "Skipping duplicate payment: abc123"
        );
    }

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.record(event(Outcome::Processed { index: 1 }));
        sink.record(event(Outcome::Skipped));
        assert_eq!(rx.recv().await.unwrap().outcome, Outcome::Processed { index: 1 });
        assert_eq!(rx.recv().await.unwrap().outcome, Outcome::Skipped);
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.record(event(Outcome::Skipped));
    }
}
