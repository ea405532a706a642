//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together, and any other
//! endpoint that follows the OpenAI chat completions contract.

use serde_json::Value;

use crate::sse;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::from_reqwest;
use wv_domain::cancel::CancelToken;
use wv_domain::config::ProviderConfig;
use wv_domain::error::{Error, Result};
use wv_domain::stream::{BoxStream, StreamEvent, Usage};
use wv_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for any OpenAI-compatible API endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    known_models: Vec<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = cfg.resolve_api_key();
        if api_key.is_none() {
            // Local endpoints (Ollama etc.) run keyless; warn, don't fail.
            tracing::warn!(provider = %cfg.id, "no API key resolved, sending unauthenticated");
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.default_model.clone().unwrap_or_else(|| "gpt-4o".into()),
            known_models: cfg.models.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        Role::User => user_to_openai(msg),
        _ => {
            let text = msg.content.joined_text();
            serde_json::json!({
                "role": msg.role.as_str(),
                "content": text,
            })
        }
    }
}

fn user_to_openai(msg: &Message) -> Value {
    // Users with image parts get the content-array form.
    if let MessageContent::Parts(parts) = &msg.content {
        if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })) {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => {
                        Some(serde_json::json!({"type": "text", "text": text}))
                    }
                    ContentPart::Image { url, .. } => Some(serde_json::json!({
                        "type": "image_url",
                        "image_url": {"url": url}
                    })),
                    _ => None,
                })
                .collect();
            return serde_json::json!({"role": "user", "content": content});
        }
    }
    serde_json::json!({
        "role": "user",
        "content": msg.content.joined_text(),
    })
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => {
            text_parts.push(t.clone());
        }
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Parts(parts) => {
            for part in parts {
                if let ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = part
                {
                    return serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }
            serde_json::json!({"role": "tool", "tool_call_id": "", "content": ""})
        }
        MessageContent::Text(t) => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": t,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: "openai_compat".into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: "openai_compat".into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let tool_calls = parse_openai_tool_calls(message);
    let usage = body.get("usage").and_then(parse_openai_usage);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        model,
        finish_reason,
    })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the stateful parser for one streamed response.
///
/// OpenAI announces a tool call with its real id once, then streams the
/// argument fragments keyed only by array index; the parser keeps the
/// index → call_id mapping so downstream assembly sees one consistent key.
fn make_stream_parser() -> impl FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static {
    let mut index_to_call: std::collections::HashMap<String, String> = Default::default();

    move |data: &str| {
        if data.trim() == "[DONE]" {
            return vec![Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            })];
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage).
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
                return vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                })];
            }
            return Vec::new();
        };

        let delta = choice.get("delta").unwrap_or(&Value::Null);
        let mut events = Vec::new();

        // Tool call deltas.
        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let idx_str = tc
                    .get("index")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
                    .to_string();

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    let name = tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    index_to_call.insert(idx_str.clone(), id.to_string());
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: id.to_string(),
                        tool_name: name.to_string(),
                    }));
                }

                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    if !args.is_empty() {
                        let call_id = index_to_call
                            .get(&idx_str)
                            .cloned()
                            .unwrap_or_else(|| idx_str.clone());
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id,
                            delta: args.to_string(),
                        }));
                    }
                }
            }
        }

        // Finish reason.
        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            let usage = v.get("usage").and_then(parse_openai_usage);
            events.push(Ok(StreamEvent::Done {
                usage,
                finish_reason: Some(fr.to_string()),
            }));
            return events;
        }

        // Text content delta.
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token {
                    text: text.to_string(),
                }));
            }
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        cancel: &CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        Ok(sse::sse_response_stream(
            resp,
            make_stream_parser(),
            cancel.clone(),
        ))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn known_models(&self) -> &[String] {
        &self.known_models
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_message_gets_tool_role() {
        let msg = Message::tool_result("tc_1", "42");
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "tc_1");
        assert_eq!(v["content"], "42");
    }

    #[test]
    fn assistant_tool_calls_serialize_as_functions() {
        let calls = vec![ToolCall {
            call_id: "tc_1".into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({"query": "x"}),
        }];
        let msg = Message::assistant_with_tool_calls("checking", &calls);
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["content"], "checking");
        assert_eq!(v["tool_calls"][0]["function"]["name"], "web_search");
        // Arguments travel as a JSON string per the OpenAI contract.
        assert!(v["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn user_image_parts_use_content_array() {
        let msg = Message::user_with_parts(vec![
            ContentPart::Text { text: "what is this".into() },
            ContentPart::Image {
                url: "data:image/png;base64,AAAA".into(),
                media_type: Some("image/png".into()),
            },
        ]);
        let v = msg_to_openai(&msg);
        assert!(v["content"].is_array());
        assert_eq!(v["content"][1]["type"], "image_url");
    }

    #[test]
    fn stream_parse_token_delta() {
        let mut parse = make_stream_parser();
        let events = parse(r#"{"choices":[{"delta":{"content":"hel"}}]}"#);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Token { text } if text == "hel"
        ));
    }

    #[test]
    fn stream_parse_finish_reason() {
        let mut parse = make_stream_parser();
        let events = parse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { finish_reason: Some(fr), .. } if fr == "stop"
        ));
    }

    #[test]
    fn stream_parse_done_sentinel() {
        let mut parse = make_stream_parser();
        let events = parse("[DONE]");
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done { .. }));
    }

    #[test]
    fn stream_parser_maps_index_deltas_to_call_id() {
        let mut parse = make_stream_parser();
        let start = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"tc_1","function":{"name":"web_search"}}]}}]}"#;
        let events = parse(start);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::ToolCallStarted { call_id, tool_name }
                if call_id == "tc_1" && tool_name == "web_search"
        ));

        // Fragments arrive keyed only by index; the parser restores the id.
        let delta = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q"}}]}}]}"#;
        let events = parse(delta);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::ToolCallDelta { call_id, .. } if call_id == "tc_1"
        ));
    }

    #[test]
    fn usage_only_chunk_becomes_done() {
        let mut parse = make_stream_parser();
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let events = parse(data);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { usage: Some(u), .. } if u.total_tokens == 15
        ));
    }
}
