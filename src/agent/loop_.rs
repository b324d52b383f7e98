//! The agentic control loop: inner/outer structure, the bounded turn
//! counter, steering/follow-up injection, and cooperative cancellation.
//! Named `loop_` because `loop` is a keyword.

use super::events::{AgentEvent, EventSink};
use super::hooks::{AgentHooks, FollowUpMode};
use super::tools::ToolTable;
use crate::message::{llm_visible, AgentMessage, Message};
use crate::model::{LLMModel, ThinkingLevel};
use crate::provider::{Context, RequestOptions, Registry};
use crate::retry::{retry_with_backoff_conditional, RetryConfig};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default turn bound.
pub const DEFAULT_MAX_TURNS: u32 = 50;

/// Cooperative cancellation handle. Cloning shares the same underlying
/// flag; calling [`AbortHandle::abort`] from any clone stops the loop at
/// its next check point.
#[derive(Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Static configuration for a single `Agent::run` invocation.
#[derive(Clone)]
pub struct AgentConfig {
    pub model: LLMModel,
    pub max_turns: u32,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f32>,
    pub thinking: ThinkingLevel,
    pub retry: RetryConfig,
}

impl AgentConfig {
    pub fn new(model: LLMModel) -> Self {
        Self {
            model,
            max_turns: DEFAULT_MAX_TURNS,
            max_tokens: None,
            temperature: None,
            thinking: ThinkingLevel::Off,
            retry: RetryConfig::default(),
        }
    }
}

/// Ties a provider registry, tool table, and callback set to a running
/// conversation. Stateless between calls to [`Agent::run`] — all mutable
/// state (messages, turn counter) lives on the stack of that call.
pub struct Agent {
    registry: Registry,
    tools: ToolTable,
    hooks: AgentHooks,
    config: AgentConfig,
}

impl Agent {
    pub fn new(registry: Registry, tools: ToolTable, hooks: AgentHooks, config: AgentConfig) -> Self {
        Self { registry, tools, hooks, config }
    }

    /// Run the inner/outer loop to completion starting from `messages`
    /// (which the caller has already appended the new user turn to).
    /// Returns the full updated message list.
    pub async fn run(
        &self,
        system_prompt: Option<String>,
        mut messages: Vec<AgentMessage>,
        events: Option<EventSink>,
        abort: AbortHandle,
    ) -> Vec<AgentMessage> {
        let mut turn: u32 = 0;

        'outer: loop {
            'inner: loop {
                if abort.is_aborted() {
                    break 'outer;
                }

                turn += 1;
                if let Some(sink) = &events {
                    let _ = sink.send(AgentEvent::TurnStart { turn });
                }

                if turn > self.config.max_turns {
                    messages.push(AgentMessage::Message(Message::assistant_error(
                        self.config.model.api,
                        &self.config.model.provider,
                        &self.config.model.id,
                        format!("exceeded {} turns", self.config.max_turns),
                    )));
                    break 'outer;
                }

                let visible = self.hooks.transform(llm_visible(&messages)).await;
                let ctx = Context {
                    system_prompt: system_prompt.clone(),
                    messages: visible,
                    tools: self.tools.schemas(),
                    thinking: self.config.thinking,
                };

                let assistant_message = match self.registry.get(self.config.model.api) {
                    Some(provider) => {
                        let api_key = self.hooks.api_key.as_ref().and_then(|cb| cb(self.config.model.api)).unwrap_or_default();
                        let options = RequestOptions {
                            api_key,
                            base_url: self.config.model.base_url.clone(),
                            max_tokens: self.config.max_tokens.or(Some(self.config.model.max_tokens)),
                            temperature: self.config.temperature,
                            extra_headers: self.config.model.headers.clone(),
                        };
                        self.stream_assistant_message(provider, ctx, options, events.as_ref()).await
                    }
                    None => Message::assistant_error(
                        self.config.model.api,
                        &self.config.model.provider,
                        &self.config.model.id,
                        format!("no provider registered for api: {}", self.config.model.api),
                    ),
                };

                let has_tool_calls = assistant_message.has_tool_calls();
                messages.push(AgentMessage::Message(assistant_message.clone()));

                if !has_tool_calls {
                    break 'inner;
                }

                let calls: Vec<_> = assistant_message.tool_calls().into_iter().cloned().collect();
                let mut steered = false;

                for (i, call) in calls.iter().enumerate() {
                    if abort.is_aborted() {
                        break;
                    }

                    let steering = self.hooks.pull_steering().await;
                    if !steering.is_empty() {
                        for remaining in &calls[i..] {
                            messages.push(AgentMessage::Message(Message::tool_result(
                                &remaining.id,
                                &remaining.name,
                                "Tool call skipped due to steering message",
                            )));
                        }
                        if let Some(sink) = &events {
                            let _ = sink.send(AgentEvent::SteeringReceived { count: steering.len() });
                        }
                        messages.extend(steering);
                        steered = true;
                        break;
                    }

                    let result = self.tools.execute_call(call, &self.hooks, events.as_ref()).await;
                    messages.push(AgentMessage::Message(result));
                }

                if steered {
                    continue 'inner;
                }
                // Tool calls were executed with no steering: always
                // re-enter the inner loop for another round of generation.
                continue 'inner;
            }

            if abort.is_aborted() {
                break 'outer;
            }

            let follow_up = self.hooks.pull_follow_up(FollowUpMode::All).await;
            if follow_up.is_empty() {
                break 'outer;
            }
            if let Some(sink) = &events {
                let _ = sink.send(AgentEvent::FollowUpReceived { count: follow_up.len() });
            }
            messages.extend(follow_up);
        }

        if let Some(sink) = &events {
            let _ = sink.send(AgentEvent::AgentEnd { transcript: llm_visible(&messages) });
        }

        messages
    }

    /// Stream one assistant response, retrying the whole attempt under
    /// [`RetryConfig`] when the classifier marks the terminal error
    /// retryable. This retry is independent of the turn counter — a
    /// retried attempt does not consume another turn.
    async fn stream_assistant_message(
        &self,
        provider: Arc<dyn crate::provider::Provider>,
        ctx: Context,
        options: RequestOptions,
        events: Option<&EventSink>,
    ) -> Message {
        let model = self.config.model.clone();
        let retry = self.config.retry.clone();
        let events_owned = events.cloned();

        let attempt = move || {
            let provider = provider.clone();
            let model = model.clone();
            let ctx = ctx.clone();
            let options = options.clone();
            let events = events_owned.clone();
            async move { run_one_stream(provider, &model, ctx, options, events.as_ref()).await }
        };

        match retry_with_backoff_conditional(retry, attempt).await {
            Ok(message) => message,
            Err(e) => Message::assistant_error(self.config.model.api, &self.config.model.provider, &self.config.model.id, e.to_string()),
        }
    }
}

async fn run_one_stream(
    provider: Arc<dyn crate::provider::Provider>,
    model: &LLMModel,
    ctx: Context,
    options: RequestOptions,
    events: Option<&EventSink>,
) -> Result<Message> {
    let mut stream = provider.stream(model, ctx, options).await?;
    while let Some(ev) = stream.next().await {
        if let Some(sink) = events {
            let _ = sink.send(AgentEvent::Assistant(ev.clone()));
        }
        match ev {
            crate::provider::AssistantMessageEvent::Done { message, .. } => return Ok(message),
            crate::provider::AssistantMessageEvent::Error { error, .. } => return Err(error),
            _ => {}
        }
    }
    Err(Error::decoding("stream ended without a terminal event"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_handle_shares_state_across_clones() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_aborted());
        clone.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn default_config_uses_default_turn_bound() {
        let model = LLMModel {
            id: "m".into(),
            name: "m".into(),
            api: crate::model::Api::AnthropicMessages,
            provider: "anthropic".into(),
            base_url: None,
            reasoning: false,
            modalities: vec![crate::model::Modality::Text],
            cost: Default::default(),
            context_window: 200_000,
            max_tokens: 8192,
            headers: None,
        };
        let config = AgentConfig::new(model);
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
    }
}
