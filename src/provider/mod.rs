//! Provider layer: stateless adapters from a neutral request/context to a
//! provider-specific HTTP+SSE call, emitting the canonical event set.

pub mod anthropic;
pub mod openai_chat;
pub mod openai_responses;
pub mod registry;

pub use registry::Registry;

use crate::message::{ContentBlock, Message, ToolCall};
use crate::model::{Api, LLMModel, StopReason, ThinkingLevel, Usage};
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// A single assistant-generation event. Every stream carries exactly one
/// terminal event (`Done` or `Error`), and `idx` is monotone non-decreasing
/// across the stream.
#[derive(Debug, Clone)]
pub enum AssistantMessageEvent {
    Start { partial: PartialMessage },
    TextStart { idx: usize, partial: String },
    TextDelta { idx: usize, chunk: String },
    TextEnd { idx: usize, text: String },
    ThinkingStart { idx: usize, partial: String },
    ThinkingDelta { idx: usize, chunk: String },
    ThinkingEnd { idx: usize, text: String },
    ToolCallStart { idx: usize, partial: PartialToolCall },
    ToolCallDelta { idx: usize, json_chunk: String },
    ToolCallEnd { idx: usize, call: ToolCall },
    /// Exactly one of `Done`/`Error` terminates the stream.
    Done { stop_reason: StopReason, message: Message },
    Error { stop_reason: StopReason, error: crate::Error },
}

/// Snapshot of the assistant message under construction, carried by `Start`.
#[derive(Debug, Clone, Default)]
pub struct PartialMessage {
    pub id: String,
}

/// A tool call whose name is known but whose argument JSON is still
/// streaming in.
#[derive(Debug, Clone, Default)]
pub struct PartialToolCall {
    pub id: String,
    pub name: String,
}

/// The conversation state a provider needs to build a request: system
/// prompt, message history, available tools, and reasoning configuration.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub thinking: ThinkingLevel,
}

/// Tool metadata a provider needs to advertise function-calling support.
/// Execution itself belongs to the agent loop's tool table
/// ([`crate::agent::tools::ToolTable`]); the provider layer only needs
/// enough to build the wire-format tool list.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Per-call knobs that aren't part of the conversation state.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f32>,
    pub extra_headers: Option<std::collections::BTreeMap<String, String>>,
}

pub type AssistantMessageEventStream = BoxStream<'static, AssistantMessageEvent>;

/// The operation every provider implements: translate `(model, context,
/// options)` into a canonical event stream. Implementors own the HTTP
/// request lifetime; dropping/cancelling the returned stream cancels the
/// in-flight request.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The wire protocol this adapter speaks.
    fn api(&self) -> Api;

    async fn stream(
        &self,
        model: &LLMModel,
        context: Context,
        options: RequestOptions,
    ) -> Result<AssistantMessageEventStream>;
}

/// Synthesize the terminal event a provider must emit if its own stream
/// ended without one: `Done(ToolUse)` when any tool call was accumulated,
/// else `Done(Stop)`.
pub fn synthesize_done(message: Message) -> AssistantMessageEvent {
    let stop_reason = if message.has_tool_calls() { StopReason::ToolUse } else { StopReason::Stop };
    AssistantMessageEvent::Done { stop_reason, message }
}

/// Merge a freshly observed [`Usage`] snapshot into an optional running one
/// by the max-per-field rule.
pub fn merge_usage(running: Option<Usage>, fresh: Usage) -> Usage {
    match running {
        Some(r) => r.merge_max(&fresh),
        None => fresh,
    }
}

/// Build the ordered content-block list from indexed text/thinking/tool-call
/// accumulators, used by every adapter's decode loop to assemble the final
/// `Message::Assistant` at `Done`.
#[derive(Debug, Default)]
pub struct BlockAccumulator {
    order: Vec<usize>,
    blocks: std::collections::BTreeMap<usize, ContentBlock>,
}

impl BlockAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, idx: usize, block: ContentBlock) {
        if !self.blocks.contains_key(&idx) {
            self.order.push(idx);
        }
        self.blocks.insert(idx, block);
    }

    /// Final blocks in first-started order (preserves interleaving across
    /// text/thinking/tool-call kinds).
    pub fn into_ordered(mut self) -> Vec<ContentBlock> {
        self.order.sort();
        self.order.into_iter().filter_map(|i| self.blocks.remove(&i)).collect()
    }
}
