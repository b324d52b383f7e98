//! # agentcore
//!
//! Provider-agnostic streaming layer, agentic tool-use loop, and branched
//! session store for building AI coding agents.
//!
//! The crate is organized leaves-first, matching how a caller assembles
//! one:
//!
//! - **sse**: incremental Server-Sent-Events decoder, shared by every
//!   provider adapter.
//! - **provider**: the canonical `AssistantMessageEvent` stream, one
//!   adapter per wire protocol (Anthropic Messages, OpenAI Chat
//!   Completions, OpenAI Responses), and the `Registry` that dispatches
//!   between them by `Api`.
//! - **agent**: the turn-bounded control loop that drives a provider,
//!   executes tool calls under a permission gate, and exposes
//!   cancellation, steering, and follow-up injection.
//! - **session**: the branched, append-only NDJSON store the loop reads
//!   its context from and compacts when it grows too large.
//! - **config**: API-key storage and lookup.
//! - **retry**: exponential backoff shared by the provider and agent
//!   layers.
//!
//! `error` and `model` sit underneath all of the above and have no
//! dependents inside the crate other than each other.

pub mod agent;
pub mod config;
pub mod error;
pub mod message;
pub mod model;
pub mod provider;
pub mod retry;
pub mod session;
pub mod sse;

pub use error::{Error, Result};
pub use message::{AgentMessage, ContentBlock, Message, ToolCall, ToolResultBlock, UserBlock, UserContent};
pub use model::{Api, LLMModel, Modality, StopReason, ThinkingLevel, Usage};
pub use provider::{AssistantMessageEvent, AssistantMessageEventStream, Context, Provider, RequestOptions, ToolSchema};
pub use session::{EntryKind, Header, Session, SessionEntry};

pub use agent::{Agent, AgentConfig, AgentEvent, AgentHooks, EventSink, ToolDef, ToolTable};

/// Convenience re-exports for the common case of wiring an agent against
/// the built-in providers.
pub mod prelude {
    pub use crate::agent::{Agent, AgentConfig, AgentHooks, ToolDef, ToolTable};
    pub use crate::config::ApiKeyStore;
    pub use crate::error::{Error, Result};
    pub use crate::message::{AgentMessage, Message};
    pub use crate::model::{Api, LLMModel, ThinkingLevel};
    pub use crate::provider::Registry;
    pub use crate::session::Session;
}
