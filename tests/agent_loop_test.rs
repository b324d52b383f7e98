//! Exercises the agent loop against an in-process fake provider so these
//! tests need no network access: tool dispatch, steering short-circuiting
//! a turn's remaining calls, and the turn-bound safety limit.

use agentcore::agent::{Agent, AgentConfig, AgentHooks, ToolDef, ToolTable};
use agentcore::model::{Api, CostPerMillion, LLMModel, Modality, StopReason};
use agentcore::provider::{AssistantMessageEvent, AssistantMessageEventStream, Context, PartialMessage, Provider, RequestOptions, Registry};
use agentcore::{AgentMessage, ContentBlock, Message, ToolCall};
use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn model() -> LLMModel {
    LLMModel {
        id: "fake-model".into(),
        name: "Fake".into(),
        api: Api::AnthropicMessages,
        provider: "fake".into(),
        base_url: None,
        reasoning: false,
        modalities: vec![Modality::Text],
        cost: CostPerMillion::default(),
        context_window: 100_000,
        max_tokens: 4096,
        headers: None,
    }
}

fn assistant_text(text: &str) -> Message {
    Message::Assistant {
        id: "m1".into(),
        content: vec![ContentBlock::Text { text: text.into() }],
        api: Api::AnthropicMessages,
        provider: "fake".into(),
        model: "fake-model".into(),
        usage: None,
        stop_reason: Some(StopReason::Stop),
        error: None,
        timestamp: chrono::Utc::now(),
    }
}

fn assistant_tool_call(id: &str, name: &str, args: &[(&str, serde_json::Value)]) -> Message {
    let arguments: BTreeMap<String, serde_json::Value> = args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    Message::Assistant {
        id: "m2".into(),
        content: vec![ContentBlock::ToolCall(ToolCall { id: id.into(), name: name.into(), arguments, thought_signature: None })],
        api: Api::AnthropicMessages,
        provider: "fake".into(),
        model: "fake-model".into(),
        usage: None,
        stop_reason: Some(StopReason::ToolUse),
        error: None,
        timestamp: chrono::Utc::now(),
    }
}

/// Always returns the same scripted message, regardless of what turn or
/// context it's called with. Good enough to drive the loop's control
/// flow without a real HTTP round trip.
struct ScriptedProvider {
    responses: std::sync::Mutex<std::collections::VecDeque<Message>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Message>) -> Self {
        Self { responses: std::sync::Mutex::new(responses.into()) }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn api(&self) -> Api {
        Api::AnthropicMessages
    }

    async fn stream(&self, _model: &LLMModel, _context: Context, _options: RequestOptions) -> agentcore::Result<AssistantMessageEventStream> {
        let message = self.responses.lock().unwrap().pop_front().unwrap_or_else(|| assistant_text("out of script"));
        let stop_reason = match &message {
            Message::Assistant { stop_reason, .. } => stop_reason.unwrap_or(StopReason::Stop),
            _ => StopReason::Stop,
        };
        let events = vec![
            AssistantMessageEvent::Start { partial: PartialMessage { id: "m".into() } },
            AssistantMessageEvent::Done { stop_reason, message },
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

fn registry_with(provider: ScriptedProvider) -> Registry {
    let mut reg = Registry::new();
    reg.register(Arc::new(provider));
    reg
}

#[tokio::test]
async fn a_plain_response_ends_the_turn_with_no_tool_calls() {
    let registry = registry_with(ScriptedProvider::new(vec![assistant_text("hello there")]));
    let agent = Agent::new(registry, ToolTable::new(), AgentHooks::new(), AgentConfig::new(model()));

    let messages = agent.run(None, vec![AgentMessage::Message(Message::user("hi"))], None, Default::default()).await;

    assert_eq!(messages.len(), 2);
    match messages.last().unwrap() {
        AgentMessage::Message(Message::Assistant { content, .. }) => {
            assert!(matches!(&content[0], ContentBlock::Text { text } if text == "hello there"));
        }
        _ => panic!("expected an assistant message"),
    }
}

#[tokio::test]
async fn a_tool_call_is_dispatched_and_its_result_appended() {
    let call_count = Arc::new(AtomicUsize::new(0));
    let counter = call_count.clone();

    let mut tools = ToolTable::new();
    tools.register(ToolDef::new(
        "read_file",
        "Read File",
        "Reads a file from disk",
        json!({ "type": "object", "properties": { "path": { "type": "string" } }, "required": ["path"] }),
        move |_call_id, args, _update| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "contents": format!("contents of {}", args["path"]) }))
            }
        },
    ));

    let registry = registry_with(ScriptedProvider::new(vec![
        assistant_tool_call("call_1", "read_file", &[("path", json!("main.rs"))]),
        assistant_text("the file looks fine"),
    ]));

    let agent = Agent::new(registry, tools, AgentHooks::new(), AgentConfig::new(model()));
    let messages = agent.run(None, vec![AgentMessage::Message(Message::user("check main.rs"))], None, Default::default()).await;

    assert_eq!(call_count.load(Ordering::SeqCst), 1);
    let tool_result_present = messages.iter().any(|m| matches!(m, AgentMessage::Message(Message::ToolResult { is_error: false, .. })));
    assert!(tool_result_present);
}

#[tokio::test]
async fn steering_skips_remaining_tool_calls_in_the_same_turn() {
    let registry = registry_with(ScriptedProvider::new(vec![
        assistant_tool_call("call_1", "noop", &[]),
        assistant_text("done"),
    ]));

    let mut tools = ToolTable::new();
    tools.register(ToolDef::new("noop", "Noop", "Does nothing", json!({"type": "object", "properties": {}}), |_id, _args, _update| async {
        Ok(json!({}))
    }));

    let steered_once = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = steered_once.clone();
    let hooks = AgentHooks::new().with_steering(move || {
        let flag = flag.clone();
        async move {
            if flag.swap(true, Ordering::SeqCst) {
                vec![]
            } else {
                vec![AgentMessage::Message(Message::user("actually, stop"))]
            }
        }
    });

    let agent = Agent::new(registry, tools, hooks, AgentConfig::new(model()));
    let messages = agent.run(None, vec![AgentMessage::Message(Message::user("go"))], None, Default::default()).await;

    let steering_injected = messages.iter().any(|m| matches!(m, AgentMessage::Message(Message::User { content, .. }) if content.as_text() == "actually, stop"));
    assert!(steering_injected);
}

#[tokio::test]
async fn exceeding_the_turn_bound_ends_the_loop_with_an_error_message() {
    struct LoopingProvider;

    #[async_trait]
    impl Provider for LoopingProvider {
        fn api(&self) -> Api {
            Api::AnthropicMessages
        }

        async fn stream(&self, _model: &LLMModel, _context: Context, _options: RequestOptions) -> agentcore::Result<AssistantMessageEventStream> {
            let message = assistant_tool_call("call_x", "noop", &[]);
            let events = vec![AssistantMessageEvent::Done { stop_reason: StopReason::ToolUse, message }];
            Ok(Box::pin(stream::iter(events)))
        }
    }

    let mut registry = Registry::new();
    registry.register(Arc::new(LoopingProvider));

    let mut tools = ToolTable::new();
    tools.register(ToolDef::new("noop", "Noop", "Does nothing", json!({"type": "object", "properties": {}}), |_id, _args, _update| async {
        Ok(json!({}))
    }));

    let mut config = AgentConfig::new(model());
    config.max_turns = 2;
    let agent = Agent::new(registry, tools, AgentHooks::new(), config);
    let messages = agent.run(None, vec![AgentMessage::Message(Message::user("loop forever"))], None, Default::default()).await;

    let hit_turn_limit = messages.iter().any(|m| matches!(m, AgentMessage::Message(Message::Assistant { error: Some(e), .. }) if e.contains("turns")));
    assert!(hit_turn_limit);
}
