//! Tool table and the five-step per-call execution sequence.
//!
//! `ToolDef`'s handler is an `Arc<dyn Fn(...) -> Pin<Box<dyn Future<...>>>>`
//! closure taking `(call_id, arguments, update_callback)`, so a long-running
//! tool can push partial results the loop forwards as
//! `AgentEvent::ToolExecutionUpdate`.

use super::events::{AgentEvent, EventSink};
use super::hooks::{AgentHooks, PermissionDecision};
use super::validator::validate_arguments;
use crate::message::{Message, ToolCall};
use crate::provider::ToolSchema;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Pushes a partial result from a long-running tool. Kept synchronous:
/// implementations typically just forward onto a channel.
pub type UpdateCallback = Arc<dyn Fn(Value) + Send + Sync>;

pub type ToolFn = Arc<
    dyn Fn(String, Value, Option<UpdateCallback>) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// A single tool: identity, human-facing label, schema, and handler.
#[derive(Clone)]
pub struct ToolDef {
    name: String,
    label: String,
    description: String,
    parameters: Value,
    execute: ToolFn,
}

impl ToolDef {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        execute: F,
    ) -> Self
    where
        F: Fn(String, Value, Option<UpdateCallback>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            label: label.into(),
            description: description.into(),
            parameters,
            execute: Arc::new(move |call_id, args, update| Box::pin(execute(call_id, args, update))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema { name: self.name.clone(), description: self.description.clone(), parameters: self.parameters.clone() }
    }
}

impl std::fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("label", &self.label)
            .finish()
    }
}

/// Registry of tools available to a running agent loop.
#[derive(Clone, Default, Debug)]
pub struct ToolTable {
    tools: HashMap<String, ToolDef>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: ToolDef) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.get(name)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(ToolDef::to_schema).collect()
    }

    /// Run the five-step sequence for a single call: resolve, validate,
    /// check permission, invoke, wrap the outcome in a `ToolResult`
    /// message. Never returns `Err` — every failure mode collapses to an
    /// error `ToolResult` so the loop can always append a result and move
    /// on to the next call.
    pub async fn execute_call(&self, call: &ToolCall, hooks: &AgentHooks, events: Option<&EventSink>) -> Message {
        let Some(tool) = self.tools.get(&call.name) else {
            return Message::tool_error(&call.id, &call.name, format!("Unknown tool: {}", call.name));
        };

        let arg_value = Value::Object(call.arguments.clone().into_iter().collect());
        let violations = validate_arguments(tool.parameters(), &call.arguments);
        if !violations.is_empty() {
            return Message::tool_error(&call.id, &call.name, format!("Error: Argument validation failed: {}", violations.join("; ")));
        }

        if let Some(sink) = events {
            let _ = sink.send(AgentEvent::ToolExecutionStart { call: call.clone() });
        }

        let decision = hooks.check_permission(&call.name, &arg_value).await;
        let result = match decision {
            PermissionDecision::Allow => {
                let sink = events.cloned();
                let call_id = call.id.clone();
                let update: Option<UpdateCallback> = sink.map(|s| {
                    Arc::new(move |value: Value| {
                        let _ = s.send(AgentEvent::ToolExecutionUpdate { call_id: call_id.clone(), update: value });
                    }) as UpdateCallback
                });
                match (tool.execute)(call.id.clone(), arg_value, update).await {
                    Ok(value) => Message::tool_result(&call.id, &call.name, render_value(&value)),
                    Err(e) => Message::tool_error(&call.id, &call.name, e.to_string()),
                }
            }
            PermissionDecision::Deny(reason) => Message::tool_error(&call.id, &call.name, format!("Permission denied: {reason}")),
            PermissionDecision::NeedsConfirmation(reason) => {
                Message::tool_error(&call.id, &call.name, format!("Permission denied: {reason}"))
            }
        };

        if let Some(sink) = events {
            let _ = sink.send(AgentEvent::ToolExecutionEnd { call_id: call.id.clone(), result: result.clone() });
        }

        result
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
