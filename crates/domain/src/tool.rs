use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Outcome of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub success: bool,
    /// Result content on success; error description on failure.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutcome {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            content: content.into(),
            metadata: None,
            duration_ms,
        }
    }

    pub fn err(call_id: impl Into<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            content: message.into(),
            metadata: None,
            duration_ms,
        }
    }

    /// A synthetic outcome for a call abandoned by cancellation.
    pub fn cancelled(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            content: "cancelled before completion".into(),
            metadata: None,
            duration_ms: 0,
        }
    }
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Set when this message records a tool result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Who authored a message. `Tool` messages answer a prior assistant
/// tool call and must carry its `tool_call_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Wire-format name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message body: plain text for the common case, structured parts once
/// tool calls, tool results, or images are involved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One structured block inside a message. Adapters translate these to
/// each provider's block format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    /// An assistant-issued tool invocation.
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The answer to a tool invocation, keyed back by `tool_use_id`.
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    /// An attached image as a data URL or remote URL.
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            created_at: chrono::Utc::now(),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            created_at: chrono::Utc::now(),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// User message with explicit content parts (text + images).
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
            tool_call_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        let id = tool_use_id.into();
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: id.clone(),
                content: content.into(),
                is_error: false,
            }]),
            tool_call_id: Some(id),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn tool_error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        let id = tool_use_id.into();
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: id.clone(),
                content: content.into(),
                is_error: true,
            }]),
            tool_call_id: Some(id),
            created_at: chrono::Utc::now(),
        }
    }

    /// Assistant message carrying text plus tool-use parts, built from the
    /// accumulated stream output of one LLM call.
    pub fn assistant_with_tool_calls(text: &str, tool_calls: &[ToolCall]) -> Self {
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.to_string() });
        }
        for tc in tool_calls {
            parts.push(ContentPart::ToolUse {
                id: tc.call_id.clone(),
                name: tc.tool_name.clone(),
                input: tc.arguments.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
            tool_call_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Tool calls carried by this message, if it is an assistant tool request.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        let MessageContent::Parts(parts) = &self.content else {
            return Vec::new();
        };
        parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

impl MessageContent {
    /// The first text block, when one exists. Tool-only and image-only
    /// bodies have none.
    pub fn first_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Every text block concatenated with newlines between them.
    ///
    /// ToolUse, ToolResult, and Image parts contribute nothing: this is
    /// the prose of the message, not its machine payloads.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_text_ignores_non_prose_parts() {
        // Tool results and images sit between the prose blocks; only the
        // prose comes out.
        let content = MessageContent::Parts(vec![
            ContentPart::ToolResult {
                tool_use_id: "tc_1".into(),
                content: "{\"hits\": 3}".into(),
                is_error: false,
            },
            ContentPart::Text { text: "found three".into() },
            ContentPart::Image {
                url: "data:image/png;base64,AAAA".into(),
                media_type: Some("image/png".into()),
            },
            ContentPart::Text { text: "see screenshot".into() },
        ]);
        assert_eq!(content.joined_text(), "found three\nsee screenshot");
        assert_eq!(content.first_text(), Some("found three"));
    }

    #[test]
    fn tool_only_body_has_no_prose() {
        let content = MessageContent::Parts(vec![ContentPart::ToolUse {
            id: "tc_1".into(),
            name: "web_search".into(),
            input: serde_json::json!({ "query": "rust" }),
        }]);
        assert!(content.first_text().is_none());
        assert_eq!(content.joined_text(), "");
    }

    #[test]
    fn image_part_serializes_with_type_tag() {
        let part = ContentPart::Image {
            url: "https://x.example/shot.png".into(),
            media_type: None,
        };
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v["type"], "image");
        assert_eq!(v["url"], "https://x.example/shot.png");
        // Absent media type stays off the wire entirely.
        assert!(v.get("media_type").is_none());
    }

    #[test]
    fn role_wire_names_match_serde() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(serde_json::to_value(role).unwrap(), role.as_str());
        }
    }

    #[test]
    fn tool_result_message_records_call_id() {
        let msg = Message::tool_result("tc_1", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("tc_1"));
    }

    #[test]
    fn assistant_with_tool_calls_roundtrips() {
        let calls = vec![ToolCall {
            call_id: "tc_9".into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({"query": "rust"}),
        }];
        let msg = Message::assistant_with_tool_calls("looking", &calls);
        let extracted = msg.tool_calls();
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].call_id, "tc_9");
        assert_eq!(extracted[0].tool_name, "web_search");
    }

    #[test]
    fn plain_assistant_has_no_tool_calls() {
        assert!(Message::assistant("hi").tool_calls().is_empty());
    }
}
