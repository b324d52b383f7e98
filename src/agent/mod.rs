//! The agentic control loop: turn-bounded streaming generation
//! interleaved with tool execution under a permission gate.

pub mod events;
pub mod hooks;
pub mod loop_;
pub mod tools;
pub mod validator;

pub use events::{AgentEvent, EventSink};
pub use hooks::{AgentHooks, FollowUpMode, PermissionDecision};
pub use loop_::{AbortHandle, Agent, AgentConfig, DEFAULT_MAX_TURNS};
pub use tools::{ToolDef, ToolTable, UpdateCallback};
pub use validator::validate_arguments;
