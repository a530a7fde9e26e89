//! Conversation store: the append-only message log behind one turn engine.
//!
//! A [`Session`] is an ordered, append-only log of [`Message`]s. It is never
//! mutated in place and never reordered; insertion order is the only
//! synchronization mechanism between a tool call and its result. Growth is
//! unbounded for the lifetime of one store; the build supervisor bounds it
//! by discarding the store wholesale between attempts instead of pruning.
//!
//! Messages serialize to the OpenAI-compatible chat wire shape, so
//! [`Session::context`] can be handed to the model client directly.

use serde::{Deserialize, Serialize};

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The function half of a tool call: name plus the raw argument payload.
///
/// `arguments` is kept as raw text, not parsed JSON — the repair layer owns
/// interpretation of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// One tool call emitted by an assistant message.
///
/// Every `ToolCall` must be answered by exactly one subsequent tool message
/// carrying the same `id` before the next model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call id, echoed back in the answering tool message.
    pub id: String,
    /// Always "function" on the wire.
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Build a tool call with a synthetic unique id.
    ///
    /// Used by mock models in tests; real ids come from the model.
    #[must_use]
    pub fn synthetic(name: &str, arguments: &str) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            call_type: function_call_type(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }
}

/// One message in the conversation log.
///
/// `content` is text-or-empty (some providers send `null` for pure
/// tool-call messages; that deserializes to an empty string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "null_to_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn null_to_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create an assistant message with optional tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a tool-output message answering `call_id`.
    #[must_use]
    pub fn tool_output(call_id: &str, tool_name: &str, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: output.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.to_string()),
            name: Some(tool_name.to_string()),
        }
    }

    /// True if this message carries at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// Append-only ordered conversation log owned by one turn engine.
///
/// Invariants: the log always begins with exactly one system message, and
/// never contains a second one.
#[derive(Debug, Clone)]
pub struct Session {
    history: Vec<Message>,
}

impl Session {
    /// Create a session seeded with the system prompt.
    #[must_use]
    pub fn new(system_prompt: &str) -> Self {
        Self {
            history: vec![Message::system(system_prompt)],
        }
    }

    /// Append a user message.
    pub fn add_user(&mut self, content: &str) {
        self.history.push(Message::user(content));
    }

    /// Append an assistant message with optional tool calls.
    pub fn add_assistant(&mut self, content: &str, tool_calls: Option<Vec<ToolCall>>) {
        self.history.push(Message::assistant(content, tool_calls));
    }

    /// Append a tool-output message answering `call_id`.
    pub fn add_tool_output(&mut self, call_id: &str, tool_name: &str, output: &str) {
        self.history.push(Message::tool_output(call_id, tool_name, output));
    }

    /// The full ordered context in wire form.
    ///
    /// Preserves insertion order exactly; no deduplication, no truncation.
    #[must_use]
    pub fn context(&self) -> &[Message] {
        &self.history
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True only for a log that somehow lost its system message; a fresh
    /// session is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Render the history for operator inspection.
    #[must_use]
    pub fn render_history(&self) -> String {
        let mut out = String::from("=== Session History ===\n");
        for msg in &self.history {
            let role = match msg.role {
                Role::System => "SYSTEM",
                Role::User => "USER",
                Role::Assistant => "ASSISTANT",
                Role::Tool => "TOOL",
            };
            out.push_str(&format!("[{role}]: {}\n", msg.content));
            if let Some(calls) = &msg.tool_calls {
                for call in calls {
                    out.push_str(&format!(
                        "  -> Tool Call {} ({})\n",
                        call.function.name, call.id
                    ));
                }
            }
            if let Some(id) = &msg.tool_call_id {
                out.push_str(&format!("  -> For Call ID: {id}\n"));
            }
        }
        out.push_str("=======================\n");
        out
    }
}
