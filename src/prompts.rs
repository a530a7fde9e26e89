//! System prompts, agent modes and the sentinel protocol.
//!
//! Prompts are compiled in. The builder prompt defines the sentinel
//! protocol: when a module is unbuildable the model emits a line starting
//! with one of the [`ARCHITECT_SENTINEL`] / [`DEPENDENCY_SENTINEL`]
//! markers instead of guessing, and the supervisor aborts the whole build
//! rather than burning further attempts.

use clap::ValueEnum;
use std::path::Path;

/// Emitted when the module's own artifacts are contradictory or
/// unimplementable as specified.
pub const ARCHITECT_SENTINEL: &str = "ARCHITECT_ERROR:";

/// Emitted when a declared dependency is missing or broken.
pub const DEPENDENCY_SENTINEL: &str = "DEPENDENCY_ERROR:";

/// General-purpose coding assistant prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a coding assistant operating inside a sandboxed workspace.

You have tools to read, write, append, edit and list files, and to run shell
commands. All paths are relative to the workspace root; you cannot reach
outside it.

Guidelines:
- Read a file before editing it.
- Prefer edit_file for small changes and write_file for new files.
- After writing code, run it or its tests with run_command to verify.
- Keep answers short; the code is the deliverable.";

/// Architect mode: decompose a project into module directories, each with
/// instructions, a contract and a test oracle, then implement them.
pub const ARCHITECT_SYSTEM_PROMPT: &str = "\
You are a software architect and implementer operating inside a sandboxed
workspace.

Given a project description, decompose it into small modules. For each
module create a directory containing:
- PROMPT.md: precise build instructions for that module alone.
- interface.py: the public contract (signatures and docstrings, no bodies).
- test_spec.py: pytest tests that define done. Test against interface.py.

If modules depend on each other, write a dependency_graph.json at the
project root mapping each module name to the list of module names it
depends on.

After scaffolding every module, implement each one in implementation.py
and make its test_spec.py pass, building dependencies before dependents.";

/// Pure architect mode: scaffolding only, no implementations.
pub const PURE_ARCHITECT_SYSTEM_PROMPT: &str = "\
You are a software architect operating inside a sandboxed workspace.

Given a project description, decompose it into small modules. For each
module create a directory containing:
- PROMPT.md: precise build instructions for that module alone.
- interface.py: the public contract (signatures and docstrings, no bodies).
- test_spec.py: pytest tests that define done. Test against interface.py.

If modules depend on each other, write a dependency_graph.json at the
project root mapping each module name to the list of module names it
depends on.

Do NOT write any implementation.py files. Scaffolding is the entire job;
another process builds the implementations.";

/// Builder mode: implement exactly one module under supervision.
pub const BUILDER_SYSTEM_PROMPT: &str = "\
You are a module builder. You are given one module directory containing
PROMPT.md (instructions), interface.py (the contract) and test_spec.py
(the definition of done). Your job is to write implementation.py so that
every test in test_spec.py passes.

Rules:
- Write only implementation.py. PROMPT.md, interface.py and test_spec.py
  are readonly; do not attempt to modify them.
- Match interface.py exactly: same names, same signatures.
- Do not import pytest in implementation.py.

Escalation protocol. If the module cannot be built as specified, reply
with a single line and stop:
- `ARCHITECT_ERROR: <reason>` when the instructions, contract and tests
  contradict each other or the task is unimplementable as specified.
- `DEPENDENCY_ERROR: <reason>` when a module you are told to depend on is
  missing or does not provide what the contract requires.
Do not emit these markers in any other circumstance, and do not guess
around a broken specification.";

/// Retry prompt for a build attempt after a failing oracle run.
#[must_use]
pub fn render_retry_prompt(module_dir: &Path, failure_output: &str) -> String {
    format!(
        "The previous implementation for module '{}' failed its tests.\n\n\
Test output:\n```\n{}\n```\n\n\
Read the existing implementation.py, diagnose the failure and fix it. \
DO NOT modify `test_spec.py`.",
        crate::layout::module_name(module_dir),
        failure_output.trim_end()
    )
}

/// Which system prompt and sandbox posture the agent runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentMode {
    /// General coding assistant.
    Coder,
    /// Scaffold modules, then implement them.
    Architect,
    /// Scaffold modules only.
    PureArchitect,
    /// Build one module under supervision.
    Builder,
}

impl AgentMode {
    /// The system prompt for this mode.
    #[must_use]
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Coder => DEFAULT_SYSTEM_PROMPT,
            Self::Architect => ARCHITECT_SYSTEM_PROMPT,
            Self::PureArchitect => PURE_ARCHITECT_SYSTEM_PROMPT,
            Self::Builder => BUILDER_SYSTEM_PROMPT,
        }
    }
}

/// Scan a model reply for a sentinel line. Returns the sentinel marker and
/// the reason text (to end of line).
#[must_use]
pub fn detect_sentinel(reply: &str) -> Option<(&'static str, String)> {
    for line in reply.lines() {
        let line = line.trim().trim_start_matches('`');
        for sentinel in [ARCHITECT_SENTINEL, DEPENDENCY_SENTINEL] {
            if let Some(reason) = line.strip_prefix(sentinel) {
                return Some((sentinel, reason.trim().trim_end_matches('`').to_string()));
            }
        }
    }
    None
}
