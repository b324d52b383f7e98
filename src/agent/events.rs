//! The loop's explicit event bus (supplemented beyond the distilled spec,
//! Design Note §9's "explicit event bus" request). Naming follows the
//! pack's `querymt-agent` `events.rs`/`event_bus.rs` split: a flat enum of
//! everything a host might want to subscribe to, forwarded over an
//! unbounded channel so the loop never blocks on a slow consumer.

use crate::message::{Message, ToolCall};
use crate::provider::AssistantMessageEvent;
use serde_json::Value;

/// Everything the agent loop can report to a host observer. Assistant
/// streaming events are forwarded unchanged so a host doesn't need to
/// subscribe to both this bus and the provider stream separately.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStart { turn: u32 },
    Assistant(AssistantMessageEvent),
    ToolExecutionStart { call: ToolCall },
    ToolExecutionUpdate { call_id: String, update: Value },
    ToolExecutionEnd { call_id: String, result: Message },
    SteeringReceived { count: usize },
    FollowUpReceived { count: usize },
    CompactionTriggered { tokens_before: u64 },
    AgentEnd { transcript: Vec<Message> },
}

/// Sink the loop pushes [`AgentEvent`]s into. An `UnboundedSender` so
/// `emit` never awaits — a host that wants backpressure should drain its
/// receiver promptly rather than starve the loop.
pub type EventSink = tokio::sync::mpsc::UnboundedSender<AgentEvent>;
