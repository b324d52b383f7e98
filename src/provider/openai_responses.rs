//! OpenAI Responses API adapter.
//!
//! The Responses API replaces the flat message list with a typed `input`
//! array (`input_text`/`input_image`, `function_call`,
//! `function_call_output`) and streams typed envelope events
//! (`response.output_text.delta`, `response.function_call_arguments.delta`,
//! `response.completed`, ...) rather than bare content-block deltas.

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
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};

#[derive(Default)]
pub struct OpenAIResponsesProvider {
    client: reqwest::Client,
}

impl OpenAIResponsesProvider {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

fn build_request_body(model: &LLMModel, ctx: &Context, options: &RequestOptions) -> Value {
    let mut input = Vec::new();
    for m in &ctx.messages {
        input.extend(message_to_input_items(m));
    }

    let mut body = json!({
        "model": model.id,
        "input": input,
        "stream": true,
    });
    let obj = body.as_object_mut().unwrap();

    if let Some(sys) = &ctx.system_prompt {
        obj.insert("instructions".into(), json!(sys));
    }
    if let Some(mt) = options.max_tokens {
        obj.insert("max_output_tokens".into(), json!(mt));
    }
    if let Some(effort) = ctx.thinking.openai_effort() {
        obj.insert("reasoning".into(), json!({ "effort": effort }));
    } else if let Some(t) = options.temperature {
        obj.insert("temperature".into(), json!(t));
    }

    if !ctx.tools.is_empty() {
        let tools: Vec<Value> = ctx
            .tools
            .iter()
            .map(|t| json!({ "type": "function", "name": t.name, "description": t.description, "parameters": t.parameters }))
            .collect();
        obj.insert("tools".into(), json!(tools));
    }

    body
}

fn message_to_input_items(message: &Message) -> Vec<Value> {
    match message {
        Message::User { content, .. } => {
            let parts: Vec<Value> = match content {
                UserContent::Text(t) => vec![json!({ "type": "input_text", "text": t })],
                UserContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|b| match b {
                        UserBlock::Text { text } => json!({ "type": "input_text", "text": text }),
                        UserBlock::Image { media_type, data } => {
                            json!({ "type": "input_image", "image_url": format!("data:{media_type};base64,{data}") })
                        }
                    })
                    .collect(),
            };
            vec![json!({ "role": "user", "content": parts })]
        }
        Message::Assistant { content, .. } => {
            let mut items = Vec::new();
            let text: String = content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("");
            if !text.is_empty() {
                items.push(json!({ "role": "assistant", "content": [{ "type": "output_text", "text": text }] }));
            }
            for block in content {
                if let ContentBlock::ToolCall(tc) = block {
                    items.push(json!({
                        "type": "function_call",
                        "call_id": tc.id,
                        "name": tc.name,
                        "arguments": serde_json::to_string(&Value::Object(tc.arguments.clone().into_iter().collect())).unwrap_or_default(),
                    }));
                }
            }
            items
        }
        Message::ToolResult { tool_call_id, content, .. } => {
            let text: String = content
                .iter()
                .filter_map(|b| match b {
                    ToolResultBlock::Text { text } => Some(text.clone()),
                    ToolResultBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            vec![json!({ "type": "function_call_output", "call_id": tool_call_id, "output": text })]
        }
    }
}

#[async_trait]
impl Provider for OpenAIResponsesProvider {
    fn api(&self) -> Api {
        Api::OpenAIResponses
    }

    async fn stream(&self, model: &LLMModel, context: Context, options: RequestOptions) -> Result<AssistantMessageEventStream> {
        let base = options.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let url = format!("{base}/responses");
        let body = build_request_body(model, &context, &options);

        let mut req = self.client.post(&url).bearer_auth(options.api_key.clone()).json(&body);
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

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments_json: String,
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
    text_buf: BTreeMap<usize, String>,
    thinking_buf: BTreeMap<usize, String>,
    calls: BTreeMap<usize, PendingCall>,
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
            text_buf: BTreeMap::new(),
            thinking_buf: BTreeMap::new(),
            calls: BTreeMap::new(),
            usage: None,
            terminal_seen: false,
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn ensure_started(&mut self) {
        if !self.started {
            self.started = true;
            self.queue.push_back(AssistantMessageEvent::Start { partial: PartialMessage { id: self.message_id.clone() } });
        }
    }

    fn handle_frame(&mut self, data: &str) {
        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return,
        };
        let event_type = payload.get("type").and_then(Value::as_str).unwrap_or_default();
        self.ensure_started();

        match event_type {
            "response.output_item.added" => {
                let idx = payload.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let item = payload.get("item").cloned().unwrap_or_default();
                match item.get("type").and_then(Value::as_str).unwrap_or("") {
                    "function_call" => {
                        let id = item.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string();
                        let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                        self.calls.insert(idx, PendingCall { id: id.clone(), name: name.clone(), arguments_json: String::new() });
                        self.queue.push_back(AssistantMessageEvent::ToolCallStart { idx, partial: PartialToolCall { id, name } });
                    }
                    "reasoning" => {
                        self.thinking_buf.insert(idx, String::new());
                        self.queue.push_back(AssistantMessageEvent::ThinkingStart { idx, partial: String::new() });
                    }
                    _ => {
                        self.text_buf.insert(idx, String::new());
                        self.queue.push_back(AssistantMessageEvent::TextStart { idx, partial: String::new() });
                    }
                }
            }
            "response.output_text.delta" => {
                let idx = payload.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let chunk = payload.get("delta").and_then(Value::as_str).unwrap_or_default().to_string();
                self.text_buf.entry(idx).or_default().push_str(&chunk);
                self.queue.push_back(AssistantMessageEvent::TextDelta { idx, chunk });
            }
            "response.reasoning_summary_text.delta" | "response.reasoning.delta" => {
                let idx = payload.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let chunk = payload.get("delta").and_then(Value::as_str).unwrap_or_default().to_string();
                self.thinking_buf.entry(idx).or_default().push_str(&chunk);
                self.queue.push_back(AssistantMessageEvent::ThinkingDelta { idx, chunk });
            }
            "response.function_call_arguments.delta" => {
                let idx = payload.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let chunk = payload.get("delta").and_then(Value::as_str).unwrap_or_default().to_string();
                if let Some(call) = self.calls.get_mut(&idx) {
                    call.arguments_json.push_str(&chunk);
                }
                self.queue.push_back(AssistantMessageEvent::ToolCallDelta { idx, json_chunk: chunk });
            }
            "response.output_item.done" => {
                let idx = payload.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
                if let Some(text) = self.text_buf.remove(&idx) {
                    self.queue.push_back(AssistantMessageEvent::TextEnd { idx, text: text.clone() });
                    self.accumulator.set(idx, ContentBlock::Text { text });
                } else if let Some(thinking) = self.thinking_buf.remove(&idx) {
                    self.queue.push_back(AssistantMessageEvent::ThinkingEnd { idx, text: thinking.clone() });
                    self.accumulator.set(idx, ContentBlock::Thinking { text: thinking });
                } else if let Some(call) = self.calls.remove(&idx) {
                    let args: Value = serde_json::from_str(&call.arguments_json).unwrap_or(Value::Object(Default::default()));
                    let arguments: BTreeMap<String, Value> = args.as_object().cloned().map(|m| m.into_iter().collect()).unwrap_or_default();
                    let tool_call = ToolCall { id: call.id, name: call.name, arguments, thought_signature: None };
                    self.queue.push_back(AssistantMessageEvent::ToolCallEnd { idx, call: tool_call.clone() });
                    self.accumulator.set(idx, ContentBlock::ToolCall(tool_call));
                }
            }
            "response.completed" | "response.incomplete" | "response.failed" => {
                if let Some(u) = payload.pointer("/response/usage").and_then(parse_responses_usage) {
                    self.usage = Some(super::merge_usage(self.usage, u));
                }
                let stop_reason = match event_type {
                    "response.incomplete" => StopReason::Length,
                    "response.failed" => StopReason::Error,
                    _ => StopReason::Stop,
                };
                self.finish(stop_reason);
            }
            "error" => {
                let msg = payload.get("message").and_then(Value::as_str).unwrap_or("responses api error").to_string();
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
        let has_tools = blocks.iter().any(|b| matches!(b, ContentBlock::ToolCall(_)));
        let stop_reason = if has_tools && stop_reason == StopReason::Stop { StopReason::ToolUse } else { stop_reason };
        let message = Message::Assistant {
            id: self.message_id.clone(),
            content: blocks,
            api: Api::OpenAIResponses,
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
            api: Api::OpenAIResponses,
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

fn parse_responses_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = v.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    let cache_read = v.pointer("/input_tokens_details/cached_tokens").and_then(Value::as_u64).unwrap_or(0);
    let total = v.get("total_tokens").and_then(Value::as_u64).unwrap_or(input + output);
    Some(Usage { input, output, cache_read, cache_write: 0, total, cost: 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThinkingLevel;

    fn model() -> LLMModel {
        LLMModel {
            id: "o3".into(),
            name: "o3".into(),
            api: Api::OpenAIResponses,
            provider: "openai".into(),
            base_url: None,
            reasoning: true,
            modalities: vec![crate::model::Modality::Text],
            cost: Default::default(),
            context_window: 200_000,
            max_tokens: 4096,
            headers: None,
        }
    }

    fn options() -> RequestOptions {
        RequestOptions { api_key: "key".into(), base_url: None, max_tokens: None, temperature: Some(0.5), extra_headers: None }
    }

    #[test]
    fn system_prompt_becomes_instructions_field() {
        let ctx = Context { system_prompt: Some("be terse".into()), messages: vec![], tools: vec![], thinking: ThinkingLevel::Off };
        let body = build_request_body(&model(), &ctx, &options());
        assert_eq!(body["instructions"], json!("be terse"));
    }

    #[test]
    fn reasoning_effort_suppresses_temperature() {
        let ctx = Context { system_prompt: None, messages: vec![], tools: vec![], thinking: ThinkingLevel::High };
        let body = build_request_body(&model(), &ctx, &options());
        assert!(body.get("reasoning").is_some());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn tool_result_becomes_function_call_output_item() {
        let msg = Message::tool_result("call_1", "read_file", "contents");
        let items = message_to_input_items(&msg);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["type"], json!("function_call_output"));
        assert_eq!(items[0]["call_id"], json!("call_1"));
    }

    #[test]
    fn assistant_tool_call_becomes_function_call_item() {
        let call = ToolCall { id: "call_1".into(), name: "read_file".into(), arguments: [("path".to_string(), json!("/tmp"))].into(), thought_signature: None };
        let msg = Message::Assistant {
            id: "m1".into(),
            content: vec![ContentBlock::ToolCall(call)],
            api: Api::OpenAIResponses,
            provider: "openai".into(),
            model: "o3".into(),
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
            error: None,
            timestamp: chrono::Utc::now(),
        };
        let items = message_to_input_items(&msg);
        assert_eq!(items[0]["type"], json!("function_call"));
        assert_eq!(items[0]["name"], json!("read_file"));
    }

    #[test]
    fn usage_parses_cached_tokens() {
        let usage = parse_responses_usage(&json!({
            "input_tokens": 20, "output_tokens": 10,
            "input_tokens_details": { "cached_tokens": 4 },
        }))
        .unwrap();
        assert_eq!(usage.total, 30);
        assert_eq!(usage.cache_read, 4);
    }
}
