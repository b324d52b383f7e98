//! Model identity, capability, and usage-accounting types.

use serde::{Deserialize, Serialize};

/// Which wire protocol a provider speaks. Stable identity for dispatch
/// through the [`crate::provider::Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Api {
    /// Anthropic Messages API.
    AnthropicMessages,
    /// OpenAI Chat Completions API (and compatible gateways).
    OpenAIChat,
    /// OpenAI Responses API.
    OpenAIResponses,
}

impl Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            Api::AnthropicMessages => "anthropic-messages",
            Api::OpenAIChat => "openai-chat",
            Api::OpenAIResponses => "openai-responses",
        }
    }
}

impl std::fmt::Display for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasoning effort the host asked for. Ordering is meaningful: budgets and
/// the `reasoning_effort` mapping are looked up per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkingLevel {
    /// `thinking.budget_tokens` for the Anthropic Messages adapter.
    pub fn default_budget_tokens(&self) -> Option<u32> {
        match self {
            ThinkingLevel::Off => None,
            ThinkingLevel::Minimal => Some(1024),
            ThinkingLevel::Low => Some(2048),
            ThinkingLevel::Medium => Some(4096),
            ThinkingLevel::High => Some(8192),
            ThinkingLevel::XHigh => Some(32768),
        }
    }

    /// `reasoning_effort` / `reasoning.effort` string for the OpenAI-style
    /// adapters: Minimal/Low -> low, Medium -> medium, High/XHigh -> high.
    pub fn openai_effort(&self) -> Option<&'static str> {
        match self {
            ThinkingLevel::Off => None,
            ThinkingLevel::Minimal | ThinkingLevel::Low => Some("low"),
            ThinkingLevel::Medium => Some("medium"),
            ThinkingLevel::High | ThinkingLevel::XHigh => Some("high"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, ThinkingLevel::Off)
    }
}

/// Terminal reason a streamed assistant turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

/// Per-million-token cost split, used for [`Usage::cost`] accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CostPerMillion {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

/// Token usage for a single assistant turn.
///
/// Providers sometimes emit more than one usage snapshot for the same
/// response (an initial frame plus a final cumulative frame). These are
/// merged by taking the max of each field, never summed — see
/// [`Usage::merge_max`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total: u64,
    pub cost: f64,
}

impl Usage {
    /// Merge two usage snapshots for the same response by taking the max of
    /// each field. Safe for cumulative provider reporting; would undercount
    /// if a provider ever sent disjoint additive deltas instead (flagged as
    /// an open contract hazard upstream, not resolved here).
    pub fn merge_max(&self, other: &Usage) -> Usage {
        Usage {
            input: self.input.max(other.input),
            output: self.output.max(other.output),
            cache_read: self.cache_read.max(other.cache_read),
            cache_write: self.cache_write.max(other.cache_write),
            total: self.total.max(other.total),
            cost: self.cost.max(other.cost),
        }
    }
}

/// Modalities a model can accept beyond text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

/// Static description of an LLM endpoint. Stable identity is [`LLMModel::id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMModel {
    pub id: String,
    pub name: String,
    pub api: Api,
    pub provider: String,
    pub base_url: Option<String>,
    pub reasoning: bool,
    pub modalities: Vec<Modality>,
    pub cost: CostPerMillion,
    pub context_window: u64,
    pub max_tokens: u64,
    pub headers: Option<std::collections::BTreeMap<String, String>>,
}
