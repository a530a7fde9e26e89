//! modforge: a sandboxed tool-calling agent with a supervised build loop.
//!
//! The crate wires an OpenAI-compatible chat model to a small catalogue of
//! filesystem and shell tools, confines every tool behind a workspace
//! sandbox, and layers a retry supervisor on top that builds test-defined
//! module directories until their pytest oracle passes.
//!
//! # Architecture
//!
//! - [`session`]: append-only conversation log in chat-completions wire
//!   shape.
//! - [`llm`]: the [`llm::ChatModel`] port, its HTTP implementation and a
//!   scriptable mock.
//! - [`tools`]: the sandboxed dispatcher ([`tools::ToolSet`]), path
//!   containment, write-permission constraints and the command approval
//!   gate; [`tools::repair`] recovers malformed tool arguments.
//! - [`agent`]: the turn engine looping model calls and sequential tool
//!   execution until a plain answer arrives.
//! - [`supervisor`]: the attempt-budgeted build loop with sentinel
//!   escalation, backed by [`oracle`] for verdicts and [`manifest`] for
//!   dependency context.
//! - [`prompts`], [`layout`], [`config`], [`error`]: system prompts and
//!   agent modes, module directory conventions, model configuration, and
//!   the crate-wide error type.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use modforge::agent::Agent;
//! use modforge::llm::MockChatModel;
//! use modforge::prompts::DEFAULT_SYSTEM_PROMPT;
//! use modforge::tools::{MockApproval, ToolSet};
//!
//! # async fn demo() -> modforge::Result<()> {
//! let model = Arc::new(MockChatModel::new().with_reply("hello"));
//! let tools = ToolSet::new("./workspace", Arc::new(MockApproval::new(true)))?;
//! let mut agent = Agent::new(model, tools, DEFAULT_SYSTEM_PROMPT);
//! let answer = agent.run("say hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod layout;
pub mod llm;
pub mod manifest;
pub mod oracle;
pub mod prompts;
pub mod session;
pub mod supervisor;
pub mod tools;

pub use agent::Agent;
pub use config::ModelConfig;
pub use error::{ForgeError, Result};
pub use llm::{ChatModel, MockChatModel, OpenAiCompatClient};
pub use oracle::{MockOracle, PytestOracle, TestOracle};
pub use prompts::AgentMode;
pub use session::{Message, Role, Session};
pub use supervisor::{BuildConfig, BuildOutcome, BuildReport, BuildSupervisor};
pub use tools::{ApprovalPort, MockApproval, SandboxConstraint, StdinApproval, ToolSet};
