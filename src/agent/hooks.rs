//! Callback surface the agent loop consults at well-defined points:
//! tool permission, context transform, steering pull, follow-up pull, and
//! API-key lookup. Each is `Arc<dyn Fn(...) -> Pin<Box<dyn Future<...>>>>`
//! so handlers can be cloned cheaply and shared across a running loop.

use crate::message::{AgentMessage, Message};
use crate::model::Api;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Outcome of a tool-permission check.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    Allow,
    Deny(String),
    /// The callback suspended on a host UI prompt before resolving to
    /// `Allow` or `Deny`; by the time it returns, this value has already
    /// collapsed to one of those two — the variant exists so hosts can
    /// log that a prompt occurred.
    NeedsConfirmation(String),
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionDecision::Allow)
    }

    pub fn deny_reason(&self) -> Option<&str> {
        match self {
            PermissionDecision::Deny(r) | PermissionDecision::NeedsConfirmation(r) => Some(r),
            PermissionDecision::Allow => None,
        }
    }
}

/// Follow-up delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpMode {
    All,
    OneAtATime,
}

pub type PermissionCallback =
    Arc<dyn Fn(String, Value) -> Pin<Box<dyn Future<Output = PermissionDecision> + Send>> + Send + Sync>;

pub type ContextTransform =
    Arc<dyn Fn(Vec<Message>) -> Pin<Box<dyn Future<Output = Vec<Message>> + Send>> + Send + Sync>;

pub type SteeringPull = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Vec<AgentMessage>> + Send>> + Send + Sync>;

pub type FollowUpPull =
    Arc<dyn Fn(FollowUpMode) -> Pin<Box<dyn Future<Output = Vec<AgentMessage>> + Send>> + Send + Sync>;

/// Synchronous API-key lookup keyed by wire protocol. Kept sync (unlike the
/// other hooks) because key material is typically already resident in
/// memory or env vars by the time the loop needs it; see
/// [`crate::config::ApiKeyStore`].
pub type ApiKeyLookup = Arc<dyn Fn(Api) -> Option<String> + Send + Sync>;

/// Container for every loop-level callback. All fields are optional;
/// an absent hook means "no-op" (permission defaults to `Allow`, steering
/// and follow-up default to empty, context transform defaults to identity).
#[derive(Clone, Default)]
pub struct AgentHooks {
    pub permission: Option<PermissionCallback>,
    pub transform_context: Option<ContextTransform>,
    pub get_steering_messages: Option<SteeringPull>,
    pub get_follow_up_messages: Option<FollowUpPull>,
    pub api_key: Option<ApiKeyLookup>,
}

impl AgentHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PermissionDecision> + Send + 'static,
    {
        self.permission = Some(Arc::new(move |name, args| Box::pin(f(name, args))));
        self
    }

    pub fn with_transform_context<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Message>> + Send + 'static,
    {
        self.transform_context = Some(Arc::new(move |msgs| Box::pin(f(msgs))));
        self
    }

    pub fn with_steering<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<AgentMessage>> + Send + 'static,
    {
        self.get_steering_messages = Some(Arc::new(move || Box::pin(f())));
        self
    }

    pub fn with_follow_up<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FollowUpMode) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<AgentMessage>> + Send + 'static,
    {
        self.get_follow_up_messages = Some(Arc::new(move |mode| Box::pin(f(mode))));
        self
    }

    pub fn with_api_key<F>(mut self, f: F) -> Self
    where
        F: Fn(Api) -> Option<String> + Send + Sync + 'static,
    {
        self.api_key = Some(Arc::new(f));
        self
    }

    pub(crate) async fn check_permission(&self, tool_name: &str, arguments: &Value) -> PermissionDecision {
        match &self.permission {
            Some(cb) => cb(tool_name.to_string(), arguments.clone()).await,
            None => PermissionDecision::Allow,
        }
    }

    pub(crate) async fn pull_steering(&self) -> Vec<AgentMessage> {
        match &self.get_steering_messages {
            Some(cb) => cb().await,
            None => Vec::new(),
        }
    }

    pub(crate) async fn pull_follow_up(&self, mode: FollowUpMode) -> Vec<AgentMessage> {
        match &self.get_follow_up_messages {
            Some(cb) => cb(mode).await,
            None => Vec::new(),
        }
    }

    pub(crate) async fn transform(&self, messages: Vec<Message>) -> Vec<Message> {
        match &self.transform_context {
            Some(cb) => cb(messages).await,
            None => messages,
        }
    }
}

impl std::fmt::Debug for AgentHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHooks")
            .field("permission", &self.permission.is_some())
            .field("transform_context", &self.transform_context.is_some())
            .field("get_steering_messages", &self.get_steering_messages.is_some())
            .field("get_follow_up_messages", &self.get_follow_up_messages.is_some())
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_permission_hook_allows() {
        let hooks = AgentHooks::new();
        let decision = hooks.check_permission("read_file", &Value::Null).await;
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn permission_hook_can_deny() {
        let hooks = AgentHooks::new().with_permission(|name, _args| async move {
            if name == "delete_everything" {
                PermissionDecision::Deny("blocked".into())
            } else {
                PermissionDecision::Allow
            }
        });
        let decision = hooks.check_permission("delete_everything", &Value::Null).await;
        assert_eq!(decision, PermissionDecision::Deny("blocked".into()));
    }

    #[tokio::test]
    async fn absent_steering_and_follow_up_are_empty() {
        let hooks = AgentHooks::new();
        assert!(hooks.pull_steering().await.is_empty());
        assert!(hooks.pull_follow_up(FollowUpMode::All).await.is_empty());
    }
}
