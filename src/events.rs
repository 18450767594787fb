//! Structured transition events. Every observed state change is reported through an `EventSink`
//! as a `(entity_id, severity, message, timestamp, other_entity_ids...)` tuple — the engine's
//! side of the "event-log sink" external interface in SPEC_FULL.md §6.
//!
//! The default sink emits a `tracing` event with each field attached as structured key-value
//! data, mirroring the way this codebase keeps its day-to-day `log::info!`/`log::warn!` calls
//! separate from the structured path it reserves for `tracing` (see `src/logging/tracestream.rs`
//! and `src/monitor_metrics.rs` upstream). A `tracing-subscriber` layer — or an HTTP forwarder in
//! the shape of this codebase's `Logstream` (`src/logstream.rs`) — is the natural downstream
//! consumer; building that forwarder is out of scope here.

use bm_api::EntityId;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single observed transition, ready to hand to an `EventSink`.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub entity_id: EntityId,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub other_entity_ids: Vec<EntityId>,
}

impl TransitionEvent {
    pub fn new(entity_id: EntityId, severity: Severity, message: impl Into<String>) -> Self {
        TransitionEvent {
            entity_id,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            other_entity_ids: Vec::new(),
        }
    }

    pub fn with_related(mut self, other: EntityId) -> Self {
        self.other_entity_ids.push(other);
        self
    }
}

/// A pure downstream consumer of transition events. The engine only ever produces events; it
/// never depends on how, or whether, they're shipped anywhere.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &TransitionEvent);
}

/// Default sink: emits each event as a single structured `tracing` event, so a subscriber can
/// index on `entity_id`/`severity` without parsing a formatted string.
#[derive(Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: &TransitionEvent) {
        let related = event
            .other_entity_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        match event.severity {
            Severity::Info => tracing::info!(
                entity_id = %event.entity_id,
                related_entity_ids = %related,
                timestamp = %event.timestamp,
                "{}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                entity_id = %event.entity_id,
                related_entity_ids = %related,
                timestamp = %event.timestamp,
                "{}",
                event.message
            ),
            Severity::Error => tracing::error!(
                entity_id = %event.entity_id,
                related_entity_ids = %related,
                timestamp = %event.timestamp,
                "{}",
                event.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<TransitionEvent>>);

    impl EventSink for RecordingSink {
        fn record(&self, event: &TransitionEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn with_related_accumulates_entity_ids() {
        let host = EntityId::new_v4();
        let cluster = EntityId::new_v4();
        let event = TransitionEvent::new(host, Severity::Info, "host registered")
            .with_related(cluster);
        assert_eq!(event.other_entity_ids, vec![cluster]);
    }

    #[test]
    fn recording_sink_captures_events() {
        let sink = RecordingSink::default();
        let host = EntityId::new_v4();
        sink.record(&TransitionEvent::new(host, Severity::Warning, "disconnected"));
        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].message, "disconnected");
    }
}
