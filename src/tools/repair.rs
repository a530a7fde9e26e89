//! Malformed tool-argument repair.
//!
//! Models occasionally emit argument payloads that are wrapped in markdown
//! code fences or cut off mid-string by an output limit. This layer applies
//! a prioritized cascade of recovery heuristics before surfacing a hard
//! parse error:
//!
//! 1. Parse the payload as-is.
//! 2. Strip leading/trailing code-fence markers and re-parse.
//! 3. For content-writing tools (`write_file` / `append_file`), assume
//!    truncation: trim trailing whitespace, drop a single trailing escape
//!    character, close the string and the object, and re-parse. A success
//!    here is flagged so the dispatcher executes the partial content and
//!    tells the model to continue with `append_file`.
//! 4. Persist the raw payload to a fixed debug artifact in the workspace
//!    and return a structured parse error.
//!
//! Every path yields either usable arguments or an error the turn engine
//! converts to a textual tool message; nothing panics past this boundary.

use std::io::Write as _;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ForgeError, Result};

/// Fixed debug-artifact file for unparsable payloads, relative to the
/// workspace root. Appended per incident with a timestamped banner.
pub const DEBUG_ARTIFACT_FILE: &str = "unparsed_tool_args.log";

/// Outcome of the repair cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairedArgs {
    /// Parsed cleanly, possibly after fence stripping.
    Clean(Map<String, Value>),
    /// Parsed only after synthetic closure of a truncated payload; the
    /// content is incomplete and the caller must warn the model.
    Truncated(Map<String, Value>),
}

impl RepairedArgs {
    /// The parsed arguments, however they were recovered.
    #[must_use]
    pub fn arguments(&self) -> &Map<String, Value> {
        match self {
            Self::Clean(args) | Self::Truncated(args) => args,
        }
    }

    /// True when the payload was synthetically closed.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated(_))
    }
}

/// Tools whose dominant argument is large free-form content, and which are
/// therefore eligible for truncation repair.
fn is_content_tool(tool: &str) -> bool {
    matches!(tool, "write_file" | "append_file")
}

fn parse_object(raw: &str) -> std::result::Result<Map<String, Value>, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(serde::de::Error::custom(format!(
            "expected a JSON object, got {}",
            match other {
                Value::Null => "null",
                Value::Bool(_) => "a boolean",
                Value::Number(_) => "a number",
                Value::String(_) => "a string",
                Value::Array(_) => "an array",
                Value::Object(_) => unreachable!(),
            }
        ))),
    }
}

/// Strip a surrounding markdown code fence, with or without a language tag.
fn strip_code_fence(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let rest = trimmed.strip_prefix("```")?;
    // Drop the rest of the fence line (possible language tag).
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => return None,
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    Some(body.trim())
}

/// Synthetically close a payload truncated inside its final string value.
fn close_truncated(raw: &str) -> String {
    let mut candidate = raw.trim_end().to_string();
    // A dangling escape character would swallow the closing quote.
    if candidate.ends_with('\\') {
        candidate.pop();
    }
    candidate.push('"');
    candidate.push('}');
    candidate
}

/// Persist an unparsable payload for offline inspection. Best effort: a
/// failure here is logged and does not mask the parse error.
fn persist_debug_artifact(workspace: &Path, tool: &str, raw: &str) {
    let path = workspace.join(DEBUG_ARTIFACT_FILE);
    let banner = format!(
        "==== {} tool={tool} ====\n{raw}\n\n",
        chrono::Utc::now().to_rfc3339()
    );
    let written = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(banner.as_bytes()));
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "failed to persist debug artifact");
    }
}

/// Run the repair cascade over a tool call's raw argument payload.
///
/// # Errors
///
/// Returns [`ForgeError::ArgumentParse`] only after every heuristic has
/// failed; by then the raw payload has been persisted to
/// [`DEBUG_ARTIFACT_FILE`] under `workspace`.
pub fn repair_arguments(workspace: &Path, tool: &str, raw: &str) -> Result<RepairedArgs> {
    // 1. As-is.
    let original_error = match parse_object(raw) {
        Ok(args) => return Ok(RepairedArgs::Clean(args)),
        Err(e) => e,
    };

    // 2. Fence-stripped.
    let stripped = strip_code_fence(raw);
    if let Some(inner) = stripped {
        if let Ok(args) = parse_object(inner) {
            return Ok(RepairedArgs::Clean(args));
        }
    }

    // 3. Truncation closure, content tools only.
    if is_content_tool(tool) {
        let candidate = close_truncated(stripped.unwrap_or(raw));
        if let Ok(args) = parse_object(&candidate) {
            warn!(tool, "tool arguments looked truncated; synthetically closed");
            return Ok(RepairedArgs::Truncated(args));
        }
    }

    // 4. Give up: persist and report.
    persist_debug_artifact(workspace, tool, raw);
    Err(ForgeError::argument_parse(tool, original_error.to_string()))
}
