use crate::core::NodeValue;
use crate::core::data::packet::Packet;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// What happened at a single point of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEventKind {
    StepStarted { step_id: u64 },
    StepCompleted { step_id: Option<u64> },
    PacketSent { label: String, uris: Vec<String> },
    EndOfStreamSent { label: String },
    PacketReceived { label: String, uris: Vec<String> },
    WorkflowRunStarted,
    WorkflowRunCompleted,
    WorkflowInput { label: String, value: NodeValue },
    WorkflowOutput { label: String, value: NodeValue },
}

/// A single entry in the execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: u64,
    /// Node name for step and packet events, workflow name otherwise.
    pub source: String,
    pub kind: TraceEventKind,
}

impl TraceEvent {
    fn now(source: &str, kind: TraceEventKind) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            timestamp,
            source: source.to_string(),
            kind,
        }
    }
}

/// Trait for recording workflow execution traces.
///
/// Implementations must tolerate calls from concurrently running steps.
pub trait TraceRecorder: Send + Sync {
    /// Records the start of a step and returns the identifier stored in the
    /// node's `STEP_ID` variable.
    fn record_step_started(&self, node: &str) -> u64;
    fn record_step_completed(&self, node: &str, step_id: Option<u64>);
    fn record_packet_sent(&self, node: &str, label: &str, packet: &Packet);
    fn record_packet_received(&self, node: &str, label: &str, packet: &Packet);
    fn record_workflow_run_started(&self, workflow: &str);
    fn record_workflow_run_completed(&self, workflow: &str);
    fn record_workflow_input(&self, workflow: &str, label: &str, value: &NodeValue);
    fn record_workflow_output(&self, workflow: &str, label: &str, value: &NodeValue);
    fn flush(&self) {}
}

/// Recorder that keeps nothing but still hands out unique step identifiers.
#[derive(Debug, Default)]
pub struct NoopTraceRecorder {
    next_step_id: AtomicU64,
}

impl NoopTraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceRecorder for NoopTraceRecorder {
    fn record_step_started(&self, _node: &str) -> u64 {
        self.next_step_id.fetch_add(1, Ordering::SeqCst) + 1
    }
    fn record_step_completed(&self, _node: &str, _step_id: Option<u64>) {}
    fn record_packet_sent(&self, _node: &str, _label: &str, _packet: &Packet) {}
    fn record_packet_received(&self, _node: &str, _label: &str, _packet: &Packet) {}
    fn record_workflow_run_started(&self, _workflow: &str) {}
    fn record_workflow_run_completed(&self, _workflow: &str) {}
    fn record_workflow_input(&self, _workflow: &str, _label: &str, _value: &NodeValue) {}
    fn record_workflow_output(&self, _workflow: &str, _label: &str, _value: &NodeValue) {}
}

/// Simple in-memory collector for traces.
#[derive(Debug, Default)]
pub struct MemoryTraceRecorder {
    events: Mutex<Vec<TraceEvent>>,
    next_step_id: AtomicU64,
}

impl MemoryTraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of steps started by the named node.
    pub fn steps_started(&self, node: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.source == node && matches!(e.kind, TraceEventKind::StepStarted { .. }))
            .count()
    }

    /// Packets sent by the named node on the given outflow label, in order.
    pub fn packets_sent(&self, node: &str, label: &str) -> Vec<Vec<String>> {
        self.events()
            .into_iter()
            .filter(|e| e.source == node)
            .filter_map(|e| match e.kind {
                TraceEventKind::PacketSent { label: l, uris } if l == label => Some(uris),
                _ => None,
            })
            .collect()
    }

    /// End-of-stream markers sent by the named node on the given outflow label.
    pub fn end_of_stream_sent(&self, node: &str, label: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.source == node)
            .filter(|e| matches!(&e.kind, TraceEventKind::EndOfStreamSent { label: l } if l == label))
            .count()
    }

    fn push(&self, source: &str, kind: TraceEventKind) {
        if let Ok(mut events) = self.events.lock() {
            events.push(TraceEvent::now(source, kind));
        }
    }
}

fn packet_uris(packet: &Packet) -> Vec<String> {
    packet.uris().into_iter().map(str::to_string).collect()
}

impl TraceRecorder for MemoryTraceRecorder {
    fn record_step_started(&self, node: &str) -> u64 {
        let step_id = self.next_step_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.push(node, TraceEventKind::StepStarted { step_id });
        step_id
    }

    fn record_step_completed(&self, node: &str, step_id: Option<u64>) {
        self.push(node, TraceEventKind::StepCompleted { step_id });
    }

    fn record_packet_sent(&self, node: &str, label: &str, packet: &Packet) {
        if packet.is_end_of_stream() {
            self.push(
                node,
                TraceEventKind::EndOfStreamSent {
                    label: label.to_string(),
                },
            );
            return;
        }
        self.push(
            node,
            TraceEventKind::PacketSent {
                label: label.to_string(),
                uris: packet_uris(packet),
            },
        );
    }

    fn record_packet_received(&self, node: &str, label: &str, packet: &Packet) {
        if packet.is_end_of_stream() {
            return;
        }
        self.push(
            node,
            TraceEventKind::PacketReceived {
                label: label.to_string(),
                uris: packet_uris(packet),
            },
        );
    }

    fn record_workflow_run_started(&self, workflow: &str) {
        self.push(workflow, TraceEventKind::WorkflowRunStarted);
    }

    fn record_workflow_run_completed(&self, workflow: &str) {
        self.push(workflow, TraceEventKind::WorkflowRunCompleted);
    }

    fn record_workflow_input(&self, workflow: &str, label: &str, value: &NodeValue) {
        self.push(
            workflow,
            TraceEventKind::WorkflowInput {
                label: label.to_string(),
                value: value.clone(),
            },
        );
    }

    fn record_workflow_output(&self, workflow: &str, label: &str, value: &NodeValue) {
        self.push(
            workflow,
            TraceEventKind::WorkflowOutput {
                label: label.to_string(),
                value: value.clone(),
            },
        );
    }

    fn flush(&self) {
        // No-op for memory collector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_ids_are_unique_and_increasing() {
        let recorder = MemoryTraceRecorder::new();
        let first = recorder.record_step_started("A");
        let second = recorder.record_step_started("A");
        assert!(second > first);
        assert_eq!(recorder.steps_started("A"), 2);
        assert_eq!(recorder.steps_started("B"), 0);
    }

    #[test]
    fn test_end_of_stream_recorded_apart_from_data() {
        let recorder = MemoryTraceRecorder::new();
        recorder.record_packet_sent("A", "out", &Packet::EndOfStream);
        recorder.record_packet_sent("A", "out", &Packet::from_value(json!(1)));
        recorder.record_packet_received("B", "in", &Packet::EndOfStream);
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.packets_sent("A", "out").len(), 1);
        assert_eq!(recorder.end_of_stream_sent("A", "out"), 1);
        assert_eq!(recorder.end_of_stream_sent("A", "other"), 0);
    }

    #[test]
    fn test_noop_recorder_still_numbers_steps() {
        let recorder = NoopTraceRecorder::new();
        assert_eq!(recorder.record_step_started("A"), 1);
        assert_eq!(recorder.record_step_started("B"), 2);
    }
}
