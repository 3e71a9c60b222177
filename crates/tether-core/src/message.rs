use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in the turn-loop conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
    pub timestamp: DateTime<Utc>,
    /// Tool calls requested by the assistant in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<super::tool::ToolCall>,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

impl Message {
    /// Create a simple text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![MessageContent::Text { text: text.into() }],
            timestamp: Utc::now(),
            tool_calls: vec![],
        }
    }

    /// Create a message carrying one tool result per executed call.
    pub fn tool_results(results: Vec<super::tool::ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            content: results
                .into_iter()
                .map(|r| MessageContent::ToolResult {
                    tool_call_id: r.tool_call_id,
                    content: r.content,
                    is_error: r.is_error,
                })
                .collect(),
            timestamp: Utc::now(),
            tool_calls: vec![],
        }
    }

    /// Extract all text content joined together.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_joins_blocks() {
        let mut msg = Message::text(Role::Assistant, "first");
        msg.content.push(MessageContent::Text {
            text: "second".into(),
        });
        assert_eq!(msg.text_content(), "first\nsecond");
    }

    #[test]
    fn test_tool_results_message_role() {
        let msg = Message::tool_results(vec![crate::tool::ToolResult {
            tool_call_id: "call_1".into(),
            content: "ok".into(),
            is_error: false,
        }]);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content.len(), 1);
    }
}
