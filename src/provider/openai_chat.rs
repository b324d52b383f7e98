//! OpenAI Chat Completions adapter.
//!
//! Request shape is the flat `messages` role list with a `tool_calls` array
//! on assistant turns and `tool` role results keyed by `tool_call_id`.
//! Streaming tool-call arguments arrive as per-index JSON fragments in
//! `delta.tool_calls[].function.arguments`, accumulated in an index-keyed
//! buffer per stream.

use super::{
    AssistantMessageEvent, AssistantMessageEventStream, BlockAccumulator, Context, PartialMessage, PartialToolCall,
    Provider, RequestOptions,
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
pub struct OpenAIChatProvider {
    client: reqwest::Client,
}

impl OpenAIChatProvider {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

fn build_request_body(model: &LLMModel, ctx: &Context, options: &RequestOptions) -> Value {
    let mut messages = Vec::new();
    if let Some(sys) = &ctx.system_prompt {
        messages.push(json!({ "role": "system", "content": sys }));
    }
    for m in &ctx.messages {
        messages.push(message_to_openai_chat(m));
    }

    let mut body = json!({
        "model": model.id,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
    });
    let obj = body.as_object_mut().unwrap();

    if let Some(mt) = options.max_tokens {
        obj.insert("max_completion_tokens".into(), json!(mt));
    }
    if let Some(t) = options.temperature {
        if !ctx.thinking.is_enabled() {
            obj.insert("temperature".into(), json!(t));
        }
    }
    if let Some(effort) = ctx.thinking.openai_effort() {
        obj.insert("reasoning_effort".into(), json!(effort));
    }

    if !ctx.tools.is_empty() {
        let tools: Vec<Value> = ctx
            .tools
            .iter()
            .map(|t| json!({ "type": "function", "function": { "name": t.name, "description": t.description, "parameters": t.parameters } }))
            .collect();
        obj.insert("tools".into(), json!(tools));
    }

    body
}

fn message_to_openai_chat(message: &Message) -> Value {
    match message {
        Message::User { content, .. } => match content {
            UserContent::Text(t) => json!({ "role": "user", "content": t }),
            UserContent::Blocks(blocks) => {
                let parts: Vec<Value> = blocks
                    .iter()
                    .map(|b| match b {
                        UserBlock::Text { text } => json!({ "type": "text", "text": text }),
                        UserBlock::Image { media_type, data } => {
                            json!({ "type": "image_url", "image_url": { "url": format!("data:{media_type};base64,{data}") } })
                        }
                    })
                    .collect();
                json!({ "role": "user", "content": parts })
            }
        },
        Message::Assistant { content, .. } => {
            let text: String = content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("");
            let tool_calls: Vec<Value> = content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall(tc) => Some(json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": serde_json::to_string(&Value::Object(tc.arguments.clone().into_iter().collect())).unwrap_or_default(),
                        },
                    })),
                    _ => None,
                })
                .collect();
            let mut entry = json!({ "role": "assistant", "content": if text.is_empty() { Value::Null } else { json!(text) } });
            if !tool_calls.is_empty() {
                entry.as_object_mut().unwrap().insert("tool_calls".into(), json!(tool_calls));
            }
            entry
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
            json!({ "role": "tool", "tool_call_id": tool_call_id, "content": text })
        }
    }
}

#[async_trait]
impl Provider for OpenAIChatProvider {
    fn api(&self) -> Api {
        Api::OpenAIChat
    }

    async fn stream(&self, model: &LLMModel, context: Context, options: RequestOptions) -> Result<AssistantMessageEventStream> {
        let base = options.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let url = format!("{base}/chat/completions");
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

/// Per-index accumulator for a streaming tool call's incremental
/// name/arguments fragments, keyed by the index OpenAI assigns each call.
#[derive(Default)]
struct ToolCallBuf {
    id: String,
    name: String,
    arguments_json: String,
    started: bool,
    content_idx: usize,
}

struct DecodeState {
    model_id: String,
    provider_name: String,
    bytes: std::pin::Pin<Box<dyn futures::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send>>,
    decoder: SseDecoder,
    queue: VecDeque<AssistantMessageEvent>,
    done: bool,
    started: bool,
    text_started: bool,
    text_buf: String,
    tool_bufs: BTreeMap<usize, ToolCallBuf>,
    text_idx: usize,
    accumulator: BlockAccumulator,
    usage: Option<Usage>,
    terminal_seen: bool,
    message_id: String,
    finish_reason: Option<String>,
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
            text_started: false,
            text_buf: String::new(),
            tool_bufs: BTreeMap::new(),
            text_idx: 0,
            accumulator: BlockAccumulator::new(),
            usage: None,
            terminal_seen: false,
            message_id: uuid::Uuid::new_v4().to_string(),
            finish_reason: None,
        }
    }

    fn ensure_started(&mut self) {
        if !self.started {
            self.started = true;
            self.queue.push_back(AssistantMessageEvent::Start { partial: PartialMessage { id: self.message_id.clone() } });
        }
    }

    fn handle_frame(&mut self, data: &str) {
        if data.trim() == "[DONE]" {
            self.finalize();
            return;
        }
        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return,
        };

        if let Some(u) = payload.get("usage").and_then(parse_openai_usage) {
            self.usage = Some(super::merge_usage(self.usage, u));
        }

        let Some(choice) = payload.get("choices").and_then(|c| c.get(0)) else { return };
        self.ensure_started();

        let delta = choice.get("delta").cloned().unwrap_or_default();

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                if !self.text_started {
                    self.text_started = true;
                    self.queue.push_back(AssistantMessageEvent::TextStart { idx: self.text_idx, partial: String::new() });
                }
                self.text_buf.push_str(text);
                self.queue.push_back(AssistantMessageEvent::TextDelta { idx: self.text_idx, chunk: text.to_string() });
            }
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for tc in tool_calls {
                let idx = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let buf = self.tool_bufs.entry(idx).or_default();
                if let Some(id) = tc.get("id").and_then(Value::as_str) {
                    buf.id = id.to_string();
                }
                let func = tc.get("function").cloned().unwrap_or_default();
                if let Some(name) = func.get("name").and_then(Value::as_str) {
                    buf.name.push_str(name);
                }
                let arg_chunk = func.get("arguments").and_then(Value::as_str).unwrap_or_default().to_string();

                if !buf.started {
                    buf.started = true;
                    buf.content_idx = self.text_idx + 1 + idx;
                    self.queue.push_back(AssistantMessageEvent::ToolCallStart {
                        idx: buf.content_idx,
                        partial: PartialToolCall { id: buf.id.clone(), name: buf.name.clone() },
                    });
                }
                if !arg_chunk.is_empty() {
                    buf.arguments_json.push_str(&arg_chunk);
                    self.queue.push_back(AssistantMessageEvent::ToolCallDelta { idx: buf.content_idx, json_chunk: arg_chunk });
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }
    }

    fn finalize(&mut self) {
        if self.terminal_seen {
            return;
        }
        self.terminal_seen = true;

        if self.text_started {
            let text = std::mem::take(&mut self.text_buf);
            self.queue.push_back(AssistantMessageEvent::TextEnd { idx: self.text_idx, text: text.clone() });
            self.accumulator.set(self.text_idx, ContentBlock::Text { text });
        }

        let indices: Vec<usize> = self.tool_bufs.keys().copied().collect();
        for idx in indices {
            let buf = self.tool_bufs.remove(&idx).unwrap();
            let args: Value = serde_json::from_str(&buf.arguments_json).unwrap_or(Value::Object(Default::default()));
            let arguments: BTreeMap<String, Value> = args.as_object().cloned().map(|m| m.into_iter().collect()).unwrap_or_default();
            let call = ToolCall { id: buf.id, name: buf.name, arguments, thought_signature: None };
            let content_idx = buf.content_idx;
            self.queue.push_back(AssistantMessageEvent::ToolCallEnd { idx: content_idx, call: call.clone() });
            self.accumulator.set(content_idx, ContentBlock::ToolCall(call));
        }

        let blocks = std::mem::take(&mut self.accumulator).into_ordered();
        let stop_reason = map_finish_reason(self.finish_reason.as_deref(), !blocks.is_empty() && blocks.iter().any(|b| matches!(b, ContentBlock::ToolCall(_))));
        let message = Message::Assistant {
            id: self.message_id.clone(),
            content: blocks,
            api: Api::OpenAIChat,
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
        // Stream closed without a `[DONE]` sentinel: finalize with whatever
        // was accumulated so far.
        self.finalize();
    }
}

fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    match reason {
        Some("length") => StopReason::Length,
        Some("tool_calls") => StopReason::ToolUse,
        Some("stop") | None => {
            if has_tool_calls {
                StopReason::ToolUse
            } else {
                StopReason::Stop
            }
        }
        Some(_) => StopReason::Stop,
    }
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    let input = v.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = v.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
    let total = v.get("total_tokens").and_then(Value::as_u64).unwrap_or(input + output);
    let cache_read = v.pointer("/prompt_tokens_details/cached_tokens").and_then(Value::as_u64).unwrap_or(0);
    Some(Usage { input, output, cache_read, cache_write: 0, total, cost: 0.0 })
}
