//! Chat model abstraction layer.
//!
//! This module provides a trait-based abstraction over the chat-completion
//! transport, so the turn engine and build supervisor never talk to a vendor
//! API directly.
//!
//! The [`ChatModel`] trait is:
//!
//! - **Object-safe**: supports dynamic dispatch via `Arc<dyn ChatModel>`
//! - **Thread-safe**: `Send + Sync` bounds for async contexts
//! - **Async-first**: the completion call is network-bound
//!
//! [`MockChatModel`] provides scripted responses for tests; the production
//! implementation is [`openai::OpenAiCompatClient`].

pub mod openai;

pub use openai::OpenAiCompatClient;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ForgeError, Result};
use crate::session::{Message, ToolCall};

/// Abstraction over one chat-completion call.
///
/// Takes the full ordered message context plus the fixed tool-schema
/// catalogue and returns exactly one assistant message with optional content
/// and optional ordered tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Ask the model for the next assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::ModelCommunication`] when the transport fails;
    /// the turn engine surfaces that as assistant content so the turn ends
    /// without tool calls instead of aborting the process.
    async fn complete(&self, context: &[Message], tools: &[Value]) -> Result<Message>;

    /// Human-readable model identifier.
    fn model_name(&self) -> &str;
}

/// Mock chat model for testing.
///
/// Replies are scripted as a queue of assistant messages; once the queue is
/// exhausted the mock returns an empty plain reply, which terminates any
/// turn. Thread-safe for use in async contexts.
///
/// # Example
///
/// ```rust,ignore
/// let model = MockChatModel::new()
///     .with_tool_reply("read_file", r#"{"path": "a.py"}"#)
///     .with_reply("all done");
/// ```
#[derive(Debug, Default)]
pub struct MockChatModel {
    script: Mutex<VecDeque<Message>>,
    /// Last user message content of each call, for prompt assertions.
    prompts: Mutex<Vec<String>>,
    call_count: AtomicU32,
    error: Option<String>,
}

impl MockChatModel {
    /// Create a mock with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text reply (no tool calls).
    #[must_use]
    pub fn with_reply(self, content: &str) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Message::assistant(content, None));
        self
    }

    /// Queue a reply carrying one tool call with a synthetic id.
    #[must_use]
    pub fn with_tool_reply(self, tool: &str, raw_arguments: &str) -> Self {
        let call = ToolCall::synthetic(tool, raw_arguments);
        self.script
            .lock()
            .expect("script lock")
            .push_back(Message::assistant("", Some(vec![call])));
        self
    }

    /// Queue a fully custom assistant message.
    #[must_use]
    pub fn with_message(self, message: Message) -> Self {
        self.script.lock().expect("script lock").push_back(message);
        self
    }

    /// Configure the mock to fail every call with a transport error.
    #[must_use]
    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }

    /// Number of completion calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Content of the most recent user message at each call.
    pub fn seen_prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, context: &[Message], _tools: &[Value]) -> Result<Message> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let last_user = context
            .iter()
            .rev()
            .find(|m| m.role == crate::session::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().expect("prompts lock").push(last_user);

        if let Some(message) = &self.error {
            return Err(ForgeError::model(message.clone()));
        }

        Ok(self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Message::assistant("", None)))
    }

    fn model_name(&self) -> &str {
        "mock-chat-model"
    }
}
