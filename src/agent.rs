//! Turn engine: the think → act → observe loop.
//!
//! An [`Agent`] owns one [`Session`] and one [`ToolSet`] for its lifetime
//! and alternates between two states: Awaiting Model and Awaiting Tool
//! Results. Each turn appends the user input, asks the model for the next
//! step, executes any requested tools strictly in the order they were
//! emitted (never concurrently), appends one tool-output message per call,
//! and repeats until the model produces a plain answer with no tool calls.
//!
//! The engine imposes no iteration cap; bounding total work is the build
//! supervisor's responsibility.
//!
//! Dispatch goes through a closed table mapping tool name to a typed
//! handler; unknown names are rejected at the table, and every tool-level
//! failure becomes a textual tool message the model can react to.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{ForgeError, Result};
use crate::llm::ChatModel;
use crate::session::{Session, ToolCall};
use crate::tools::repair::{repair_arguments, RepairedArgs};
use crate::tools::{catalogue, ToolSet};

/// Appended to a tool result when the arguments were synthetically closed
/// after truncation. Part (b) of the composite message: the real tool
/// result comes first.
const TRUNCATION_WARNING: &str = "\n\n[WARNING] The provided content appeared truncated and was \
closed automatically before writing. The file currently ends at the exact point your arguments \
were cut off. Continue the remaining content with append_file, starting from that exact point. \
Do not rewrite the whole file.";

/// One turn engine instance: a session, a sandbox, a model.
pub struct Agent {
    session: Session,
    tools: ToolSet,
    model: Arc<dyn ChatModel>,
}

impl Agent {
    /// Create an agent with a fresh session seeded by `system_prompt`.
    #[must_use]
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolSet, system_prompt: &str) -> Self {
        Self {
            session: Session::new(system_prompt),
            tools,
            model,
        }
    }

    /// The conversation log, for inspection and tests.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The sandbox this agent dispatches into.
    #[must_use]
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Run one full turn: user input through tool cycles to a plain answer.
    ///
    /// Model transport failures are surfaced as assistant content, ending
    /// the turn; they never abort the process.
    pub async fn run(&mut self, user_input: &str) -> Result<String> {
        self.session.add_user(user_input);
        let tools = catalogue();

        loop {
            // Awaiting Model: snapshot the full context, ask for the next step.
            let reply = match self.model.complete(self.session.context(), &tools).await {
                Ok(message) => message,
                Err(e) => {
                    info!(error = %e, "model call failed; ending turn");
                    crate::session::Message::assistant(
                        format!("Error communicating with model: {e}"),
                        None,
                    )
                }
            };

            self.session
                .add_assistant(&reply.content, reply.tool_calls.clone());

            let calls = match &reply.tool_calls {
                Some(calls) if !calls.is_empty() => calls.clone(),
                _ => return Ok(reply.content),
            };

            // Awaiting Tool Results: sequential, in emission order. Each
            // output is appended before the next model invocation.
            for call in &calls {
                let output = self.execute_tool(call);
                debug!(
                    tool = %call.function.name,
                    id = %call.id,
                    output_len = output.len(),
                    "tool executed"
                );
                self.session
                    .add_tool_output(&call.id, &call.function.name, &output);
            }
        }
    }

    /// Run one tool call through the repair layer and the dispatch table.
    ///
    /// Always returns text: failures are rendered as `Error: ...` so the
    /// model can recover within the conversation.
    fn execute_tool(&self, call: &ToolCall) -> String {
        let name = &call.function.name;
        info!(tool = %name, "executing tool");

        let repaired =
            match repair_arguments(self.tools.base_dir(), name, &call.function.arguments) {
                Ok(repaired) => repaired,
                Err(e) => return format!("Error: {e}"),
            };
        let truncated = repaired.is_truncated();

        // The continuation warning only makes sense when the partial
        // content actually landed on disk.
        match self.dispatch(name, repaired.arguments()) {
            Ok(mut text) => {
                if truncated {
                    text.push_str(TRUNCATION_WARNING);
                }
                text
            }
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Closed dispatch table. Must stay in sync with [`catalogue`].
    fn dispatch(&self, name: &str, args: &Map<String, Value>) -> Result<String> {
        match name {
            "read_file" => self.tools.read_file(required_str(name, args, "path")?),
            "write_file" => self.tools.write_file(
                required_str(name, args, "path")?,
                required_str(name, args, "content")?,
            ),
            "append_file" => self.tools.append_file(
                required_str(name, args, "path")?,
                required_str(name, args, "content")?,
            ),
            "edit_file" => self.tools.edit_file(
                required_str(name, args, "path")?,
                required_str(name, args, "old_string")?,
                required_str(name, args, "new_string")?,
            ),
            "list_files" => self
                .tools
                .list_files(optional_str(args, "path").unwrap_or(".")),
            "run_command" => self.tools.run_command(required_str(name, args, "command")?),
            other => Err(ForgeError::tool_not_found(other)),
        }
    }
}

fn required_str<'a>(tool: &str, args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        ForgeError::argument_parse(tool, format!("missing required string parameter '{key}'"))
    })
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}
