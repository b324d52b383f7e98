//! Anthropic Messages API adapter.
//!
//! System prompt is top-level, tool results are a user turn with
//! `tool_result` blocks, and reasoning is a `thinking { budget_tokens }`
//! object with temperature omitted while it's set.

use super::{
    synthesize_done, AssistantMessageEvent, AssistantMessageEventStream, BlockAccumulator, Context,
    PartialMessage, PartialToolCall, Provider, RequestOptions,
};
use crate::message::{ContentBlock, Message, ToolCall, ToolResultBlock, UserBlock, UserContent};
use crate::model::{Api, LLMModel, StopReason, Usage};
use crate::sse::SseDecoder;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Default)]
pub struct AnthropicProvider {
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[derive(Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

fn build_request_body(model: &LLMModel, ctx: &Context, options: &RequestOptions) -> Value {
    let messages: Vec<Value> = ctx.messages.iter().filter_map(message_to_anthropic).collect();

    let mut body = json!({
        "model": model.id,
        "messages": messages,
        "stream": true,
    });
    let obj = body.as_object_mut().unwrap();

    if let Some(sys) = &ctx.system_prompt {
        obj.insert("system".into(), json!(sys));
    }
    obj.insert("max_tokens".into(), json!(options.max_tokens.unwrap_or(model.max_tokens)));

    if ctx.thinking.is_enabled() {
        if let Some(budget) = ctx.thinking.default_budget_tokens() {
            obj.insert("thinking".into(), json!(ThinkingConfig { kind: "enabled", budget_tokens: budget }));
        }
        // temperature is omitted while reasoning is enabled; Anthropic rejects both.
    } else if let Some(t) = options.temperature {
        obj.insert("temperature".into(), json!(t));
    }

    if !ctx.tools.is_empty() {
        let tools: Vec<Value> = ctx
            .tools
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
            .collect();
        obj.insert("tools".into(), json!(tools));
    }

    body
}

fn message_to_anthropic(message: &Message) -> Option<Value> {
    match message {
        Message::User { content, .. } => {
            let blocks = match content {
                UserContent::Text(t) => vec![json!({ "type": "text", "text": t })],
                UserContent::Blocks(bs) => bs
                    .iter()
                    .map(|b| match b {
                        UserBlock::Text { text } => json!({ "type": "text", "text": text }),
                        UserBlock::Image { media_type, data } => json!({
                            "type": "image",
                            "source": { "type": "base64", "media_type": media_type, "data": data },
                        }),
                    })
                    .collect(),
            };
            Some(json!({ "role": "user", "content": blocks }))
        }
        Message::Assistant { content, .. } => {
            let blocks: Vec<Value> = content
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                    ContentBlock::Thinking { text } => json!({ "type": "thinking", "thinking": text }),
                    ContentBlock::ToolCall(tc) => json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": Value::Object(tc.arguments.clone().into_iter().collect()),
                    }),
                })
                .collect();
            if blocks.is_empty() {
                None
            } else {
                Some(json!({ "role": "assistant", "content": blocks }))
            }
        }
        Message::ToolResult { tool_call_id, content, is_error, .. } => {
            let text: String = content
                .iter()
                .filter_map(|b| match b {
                    ToolResultBlock::Text { text } => Some(text.clone()),
                    ToolResultBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": text,
                    "is_error": is_error,
                }],
            }))
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn api(&self) -> Api {
        Api::AnthropicMessages
    }

    async fn stream(&self, model: &LLMModel, context: Context, options: RequestOptions) -> Result<AssistantMessageEventStream> {
        let base = options.base_url.clone().unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let url = format!("{base}/v1/messages");
        let body = build_request_body(model, &context, &options);

        let mut req = self
            .client
            .post(&url)
            .header("x-api-key", options.api_key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(headers) = &options.extra_headers {
            for (k, v) in headers {
                req = req.header(k.as_str(), v.as_str());
            }
        }

        let response = req.send().await.map_err(Error::Network)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body_text = response.text().await.unwrap_or_default();
            let err = Error::from_status(status, retry_after, Some(body_text));
            return Ok(Box::pin(stream::once(async move {
                AssistantMessageEvent::Error { stop_reason: StopReason::Error, error: err }
            })));
        }

        let state = DecodeState::new(model.id.clone(), model.provider.clone(), response.bytes_stream());
        let events = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(ev) = state.queue.pop_front() {
                    return Some((ev, state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let frames = state.decoder.feed(&chunk);
                        for frame in frames {
                            state.handle_frame(&frame.data);
                        }
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        state.queue.push_back(AssistantMessageEvent::Error { stop_reason: StopReason::Error, error: Error::Network(e) });
                    }
                    None => {
                        state.done = true;
                        state.flush_end_of_stream();
                    }
                }
            }
        });

        Ok(Box::pin(events))
    }
}

enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

struct DecodeState {
    model_id: String,
    provider_name: String,
    bytes: std::pin::Pin<Box<dyn futures::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send>>,
    decoder: SseDecoder,
    queue: VecDeque<AssistantMessageEvent>,
    done: bool,
    started: bool,
    accumulator: BlockAccumulator,
    next_idx: usize,
    current_block: Option<(usize, BlockKind)>,
    text_buf: String,
    tool_json: String,
    tool_id: String,
    tool_name: String,
    usage: Option<Usage>,
    terminal_seen: bool,
    message_id: String,
}

impl DecodeState {
    fn new<S>(model_id: String, provider_name: String, bytes: S) -> Self
    where
        S: futures::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            model_id,
            provider_name,
            bytes: Box::pin(bytes),
            decoder: SseDecoder::new(),
            queue: VecDeque::new(),
            done: false,
            started: false,
            accumulator: BlockAccumulator::new(),
            next_idx: 0,
            current_block: None,
            text_buf: String::new(),
            tool_json: String::new(),
            tool_id: String::new(),
            tool_name: String::new(),
            usage: None,
            terminal_seen: false,
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn handle_frame(&mut self, data: &str) {
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return,
        };
        let event_type = payload.get("type").and_then(Value::as_str).unwrap_or_default();

        match event_type {
            "message_start" => {
                if !self.started {
                    self.started = true;
                    self.queue.push_back(AssistantMessageEvent::Start { partial: PartialMessage { id: self.message_id.clone() } });
                }
                if let Some(u) = payload.pointer("/message/usage").and_then(parse_anthropic_usage) {
                    self.usage = Some(super::merge_usage(self.usage, u));
                }
            }
            "content_block_start" => {
                let idx = payload.get("index").and_then(Value::as_u64).unwrap_or(self.next_idx as u64) as usize;
                self.next_idx = self.next_idx.max(idx + 1);
                let block = payload.get("content_block").cloned().unwrap_or_default();
                let kind = block.get("type").and_then(Value::as_str).unwrap_or("");
                self.text_buf.clear();
                match kind {
                    "text" => {
                        self.current_block = Some((idx, BlockKind::Text));
                        self.queue.push_back(AssistantMessageEvent::TextStart { idx, partial: String::new() });
                    }
                    "thinking" => {
                        self.current_block = Some((idx, BlockKind::Thinking));
                        self.queue.push_back(AssistantMessageEvent::ThinkingStart { idx, partial: String::new() });
                    }
                    "tool_use" => {
                        self.current_block = Some((idx, BlockKind::ToolUse));
                        self.tool_json.clear();
                        self.tool_id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                        self.tool_name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                        self.queue.push_back(AssistantMessageEvent::ToolCallStart {
                            idx,
                            partial: PartialToolCall { id: self.tool_id.clone(), name: self.tool_name.clone() },
                        });
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let idx = payload.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let delta = payload.get("delta").cloned().unwrap_or_default();
                let delta_type = delta.get("type").and_then(Value::as_str).unwrap_or("");
                match delta_type {
                    "text_delta" => {
                        let chunk = delta.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
                        self.text_buf.push_str(&chunk);
                        self.queue.push_back(AssistantMessageEvent::TextDelta { idx, chunk });
                    }
                    "thinking_delta" => {
                        let chunk = delta.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string();
                        self.text_buf.push_str(&chunk);
                        self.queue.push_back(AssistantMessageEvent::ThinkingDelta { idx, chunk });
                    }
                    "input_json_delta" => {
                        let chunk = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default().to_string();
                        self.tool_json.push_str(&chunk);
                        self.queue.push_back(AssistantMessageEvent::ToolCallDelta { idx, json_chunk: chunk });
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let idx = payload.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                if let Some((_, kind)) = self.current_block.take() {
                    match kind {
                        BlockKind::Text => {
                            let text = std::mem::take(&mut self.text_buf);
                            self.queue.push_back(AssistantMessageEvent::TextEnd { idx, text: text.clone() });
                            self.accumulator.set(idx, ContentBlock::Text { text });
                        }
                        BlockKind::Thinking => {
                            let text = std::mem::take(&mut self.text_buf);
                            self.queue.push_back(AssistantMessageEvent::ThinkingEnd { idx, text: text.clone() });
                            self.accumulator.set(idx, ContentBlock::Thinking { text });
                        }
                        BlockKind::ToolUse => {
                            let args: Value = serde_json::from_str(&self.tool_json).unwrap_or(Value::Object(Default::default()));
                            let arguments: BTreeMap<String, Value> = args.as_object().cloned().map(|m| m.into_iter().collect()).unwrap_or_default();
                            let call = ToolCall {
                                id: std::mem::take(&mut self.tool_id),
                                name: std::mem::take(&mut self.tool_name),
                                arguments,
                                thought_signature: None,
                            };
                            self.queue.push_back(AssistantMessageEvent::ToolCallEnd { idx, call: call.clone() });
                            self.accumulator.set(idx, ContentBlock::ToolCall(call));
                        }
                    }
                }
            }
            "message_delta" => {
                if let Some(u) = payload.pointer("/usage").and_then(parse_anthropic_usage) {
                    self.usage = Some(super::merge_usage(self.usage, u));
                }
                if let Some(sr) = payload.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.finish(map_stop_reason(sr));
                }
            }
            "message_stop" => self.finish(StopReason::Stop),
            "error" => {
                let msg = payload.pointer("/error/message").and_then(Value::as_str).unwrap_or("anthropic error").to_string();
                self.terminal_seen = true;
                self.queue.push_back(AssistantMessageEvent::Error { stop_reason: StopReason::Error, error: Error::Api { status: 0, message: msg } });
            }
            _ => {}
        }
    }

    fn finish(&mut self, stop_reason: StopReason) {
        if self.terminal_seen {
            return;
        }
        self.terminal_seen = true;
        let blocks = std::mem::take(&mut self.accumulator).into_ordered();
        let message = Message::Assistant {
            id: self.message_id.clone(),
            content: blocks,
            api: Api::AnthropicMessages,
            provider: self.provider_name.clone(),
            model: self.model_id.clone(),
            usage: self.usage,
            stop_reason: Some(stop_reason),
            error: None,
            timestamp: chrono::Utc::now(),
        };
        self.queue.push_back(AssistantMessageEvent::Done { stop_reason, message });
    }

    fn flush_end_of_stream(&mut self) {
        if self.terminal_seen {
            return;
        }
        self.terminal_seen = true;
        let blocks = std::mem::take(&mut self.accumulator).into_ordered();
        let message = Message::Assistant {
            id: self.message_id.clone(),
            content: blocks,
            api: Api::AnthropicMessages,
            provider: self.provider_name.clone(),
            model: self.model_id.clone(),
            usage: self.usage,
            stop_reason: None,
            error: None,
            timestamp: chrono::Utc::now(),
        };
        self.queue.push_back(synthesize_done(message));
    }
}

fn map_stop_reason(raw: &str) -> StopReason {
    match raw {
        "max_tokens" => StopReason::Length,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::Stop,
    }
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = v.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    let cache_read = v.get("cache_read_input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let cache_write = v.get("cache_creation_input_tokens").and_then(Value::as_u64).unwrap_or(0);
    Some(Usage { input, output, cache_read, cache_write, total: input + output, cost: 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThinkingLevel;
    use crate::provider::ToolSchema;

    fn model() -> LLMModel {
        LLMModel {
            id: "claude-opus".into(),
            name: "Claude Opus".into(),
            api: Api::AnthropicMessages,
            provider: "anthropic".into(),
            base_url: None,
            reasoning: true,
            modalities: vec![crate::model::Modality::Text],
            cost: Default::default(),
            context_window: 200_000,
            max_tokens: 8192,
            headers: None,
        }
    }

    fn options() -> RequestOptions {
        RequestOptions { api_key: "key".into(), base_url: None, max_tokens: None, temperature: Some(0.7), extra_headers: None }
    }

    #[test]
    fn system_prompt_goes_top_level_not_into_messages() {
        let ctx = Context { system_prompt: Some("be terse".into()), messages: vec![Message::user("hi")], tools: vec![], thinking: ThinkingLevel::Off };
        let body = build_request_body(&model(), &ctx, &options());
        assert_eq!(body["system"], json!("be terse"));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn thinking_enabled_sets_budget_and_omits_temperature() {
        let ctx = Context { system_prompt: None, messages: vec![], tools: vec![], thinking: ThinkingLevel::Medium };
        let body = build_request_body(&model(), &ctx, &options());
        assert!(body.get("thinking").is_some());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn temperature_passes_through_when_thinking_off() {
        let ctx = Context { system_prompt: None, messages: vec![], tools: vec![], thinking: ThinkingLevel::Off };
        let body = build_request_body(&model(), &ctx, &options());
        assert_eq!(body["temperature"], json!(0.7));
    }

    #[test]
    fn tool_schemas_map_to_input_schema_field() {
        let ctx = Context {
            system_prompt: None,
            messages: vec![],
            tools: vec![ToolSchema { name: "read_file".into(), description: "reads a file".into(), parameters: json!({"type":"object"}) }],
            thinking: ThinkingLevel::Off,
        };
        let body = build_request_body(&model(), &ctx, &options());
        assert_eq!(body["tools"][0]["input_schema"], json!({"type":"object"}));
    }

    #[test]
    fn tool_result_becomes_user_turn_with_tool_result_block() {
        let msg = Message::tool_error("call_1", "read_file", "not found");
        let wire = message_to_anthropic(&msg).unwrap();
        assert_eq!(wire["role"], json!("user"));
        assert_eq!(wire["content"][0]["type"], json!("tool_result"));
        assert_eq!(wire["content"][0]["is_error"], json!(true));
    }

    #[test]
    fn empty_assistant_message_is_skipped() {
        let msg = Message::Assistant {
            id: "m1".into(),
            content: vec![],
            api: Api::AnthropicMessages,
            provider: "anthropic".into(),
            model: "claude".into(),
            usage: None,
            stop_reason: None,
            error: None,
            timestamp: chrono::Utc::now(),
        };
        assert!(message_to_anthropic(&msg).is_none());
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason("max_tokens"), StopReason::Length);
        assert_eq!(map_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(map_stop_reason("end_turn"), StopReason::Stop);
    }

    #[test]
    fn usage_parses_cache_fields() {
        let usage = parse_anthropic_usage(&json!({
            "input_tokens": 100, "output_tokens": 50,
            "cache_read_input_tokens": 10, "cache_creation_input_tokens": 5,
        }))
        .unwrap();
        assert_eq!(usage.total, 150);
        assert_eq!(usage.cache_read, 10);
        assert_eq!(usage.cache_write, 5);
    }
}
