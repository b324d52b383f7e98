//! The canonical message data model shared by the provider layer, agent
//! loop, and session store.

use crate::model::{Api, StopReason, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A single fragment of user-supplied content: plain text or a base64-encoded
/// image with an IANA media type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserBlock {
    Text { text: String },
    Image { media_type: String, data: String },
}

/// Content of a `User` message: either a plain string or an ordered list of
/// blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<UserBlock>),
}

impl UserContent {
    /// Flatten to a plain-text representation (used by context estimation
    /// and synthetic compaction/branch-summary messages).
    pub fn as_text(&self) -> String {
        match self {
            UserContent::Text(s) => s.clone(),
            UserContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    UserBlock::Text { text } => Some(text.clone()),
                    UserBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A tool invocation requested by the model. Arguments arrive as a raw JSON
/// string during streaming and are parsed exactly once when the call block
/// terminates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned id, unique within the message. If the provider
    /// doesn't supply one, the decoding adapter mints a v4 UUID.
    pub id: String,
    pub name: String,
    pub arguments: BTreeMap<String, Value>,
    pub thought_signature: Option<String>,
}

/// One fragment of an assistant message. Order across kinds is preserved
/// because providers interleave text, thinking, and tool calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { text: String },
    ToolCall(ToolCall),
}

/// Content of a `ToolResult` message: text and/or image blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultBlock {
    Text { text: String },
    Image { media_type: String, data: String },
}

/// The three message variants that make up a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        id: String,
        content: UserContent,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Assistant {
        id: String,
        content: Vec<ContentBlock>,
        api: Api,
        provider: String,
        model: String,
        usage: Option<Usage>,
        stop_reason: Option<StopReason>,
        error: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    ToolResult {
        id: String,
        tool_call_id: String,
        tool_name: String,
        content: Vec<ToolResultBlock>,
        is_error: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl Message {
    /// Build a plain-text `User` message.
    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            id: new_id(),
            content: UserContent::Text(text.into()),
            timestamp: now(),
        }
    }

    /// Build a `User` message carrying text and/or image blocks.
    pub fn user_blocks(blocks: Vec<UserBlock>) -> Self {
        Message::User {
            id: new_id(),
            content: UserContent::Blocks(blocks),
            timestamp: now(),
        }
    }

    /// Build an error-terminated `Assistant` message, the shape the agent
    /// loop produces for both the turn-bound guard and provider errors.
    pub fn assistant_error(api: Api, provider: &str, model: &str, message: impl Into<String>) -> Self {
        Message::Assistant {
            id: new_id(),
            content: Vec::new(),
            api,
            provider: provider.to_string(),
            model: model.to_string(),
            usage: None,
            stop_reason: Some(StopReason::Error),
            error: Some(message.into()),
            timestamp: now(),
        }
    }

    /// Build a successful `ToolResult` message from plain text.
    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, text: impl Into<String>) -> Self {
        Message::ToolResult {
            id: new_id(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![ToolResultBlock::Text { text: text.into() }],
            is_error: false,
            timestamp: now(),
        }
    }

    /// Build an error `ToolResult` message from plain text.
    pub fn tool_error(tool_call_id: impl Into<String>, tool_name: impl Into<String>, text: impl Into<String>) -> Self {
        Message::ToolResult {
            id: new_id(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![ToolResultBlock::Text { text: text.into() }],
            is_error: true,
            timestamp: now(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::User { id, .. } | Message::Assistant { id, .. } | Message::ToolResult { id, .. } => id,
        }
    }

    /// Tool calls carried by this message, if it is an `Assistant` message
    /// with any.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        match self {
            Message::Assistant { content, .. } => content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall(tc) => Some(tc),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// Rough character count of this message's visible content, used by the
    /// token estimator.
    pub fn char_len(&self) -> usize {
        match self {
            Message::User { content, .. } => content.as_text().len(),
            Message::Assistant { content, .. } => content
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } | ContentBlock::Thinking { text } => text.len(),
                    ContentBlock::ToolCall(tc) => tc.name.len() + tc.arguments.len() * 8,
                })
                .sum(),
            Message::ToolResult { content, .. } => content
                .iter()
                .map(|b| match b {
                    ToolResultBlock::Text { text } => text.len(),
                    ToolResultBlock::Image { .. } => 0,
                })
                .sum(),
        }
    }
}

/// A host-visible record that is either a real conversation `Message` or an
/// opaque `Custom` record. Only `Message` variants are ever sent to a
/// provider; `Custom` is persisted and visible to host code but filtered out
/// at the LLM boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AgentMessage {
    Message(Message),
    Custom { r#type: String, data: Value },
}

impl AgentMessage {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            AgentMessage::Message(m) => Some(m),
            AgentMessage::Custom { .. } => None,
        }
    }
}

/// Filter a host-visible list down to the `Message`s a provider may see.
pub fn llm_visible(messages: &[AgentMessage]) -> Vec<Message> {
    messages.iter().filter_map(|m| m.as_message().cloned()).collect()
}
