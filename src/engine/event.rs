//! Event sink the invalidation engine reports through: one
//! `PartialParsingEnabled` fired after the diff is known, and one
//! `PartialParsingFile` per mutation. A trait object the driver supplies, so
//! the engine itself never depends on how events are surfaced.

use crate::model::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct PartialParsingEnabled {
    pub deleted: usize,
    pub added: usize,
    pub changed: usize,
}

#[derive(Debug, Clone)]
pub struct PartialParsingFile {
    pub operation: FileOperation,
    pub file_id: FileId,
}

/// Communication of planning events back to the rest of the tool.
pub trait EventSink: Send {
    fn partial_parsing_enabled(&self, _event: PartialParsingEnabled) {}
    fn partial_parsing_file(&self, _event: PartialParsingFile) {}
}

/// Discards every event. The default for callers that don't care.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {}

/// Emits every event through the `log` facade, at `info` for the one-shot
/// summary and `debug` for the per-file events.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn partial_parsing_enabled(&self, event: PartialParsingEnabled) {
        log::info!(
            "partial parsing enabled: {} added, {} changed, {} deleted",
            event.added,
            event.changed,
            event.deleted
        );
    }

    fn partial_parsing_file(&self, event: PartialParsingFile) {
        log::debug!("partial parsing {:?}: {}", event.operation, event.file_id);
    }
}

