//! Retry build supervisor.
//!
//! Drives a builder agent against one module directory until its test
//! oracle passes, an attempt budget is exhausted, or the agent escalates
//! via a sentinel line. Each attempt gets a completely fresh agent (empty
//! session) and a fresh sandbox rebuilt from the same constraint set, so
//! no conversational state leaks between attempts; the only carryover is
//! the retry prompt rendered from the previous oracle output, plus the
//! implementation files already on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::agent::Agent;
use crate::error::{ForgeError, Result};
use crate::layout::{self, READONLY_ARTIFACTS, TEST_SPEC_FILE};
use crate::llm::ChatModel;
use crate::manifest::{find_manifest, render_dependency_note, ResolvedManifest};
use crate::oracle::{OracleRun, TestOracle};
use crate::prompts::{detect_sentinel, render_retry_prompt, BUILDER_SYSTEM_PROMPT};
use crate::tools::{ApprovalPort, SandboxConstraint, ToolSet};

/// Supervisor tuning knobs.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Maximum build attempts before giving up.
    pub max_attempts: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Record of one attempt, for reporting.
#[derive(Debug, Clone)]
pub struct BuildAttempt {
    /// 1-based attempt number.
    pub index: u32,
    /// The prompt this attempt ran with.
    pub prompt: String,
    /// Oracle verdict; `false` for sentinel-aborted attempts.
    pub success: bool,
    /// Oracle output, or the sentinel reply.
    pub output: String,
    pub started_at: DateTime<Utc>,
}

/// Terminal state of a build.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// The oracle passed.
    Success { attempts: u32 },
    /// The attempt budget ran out with the oracle still failing.
    Failed { attempts: u32, last_output: String },
    /// The agent escalated; retrying would not help.
    Fatal {
        sentinel: &'static str,
        reason: String,
    },
}

/// Full build report: terminal state plus the per-attempt trail.
#[derive(Debug)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    pub attempts: Vec<BuildAttempt>,
}

impl BuildReport {
    /// Convert a non-success outcome into the matching error.
    ///
    /// # Errors
    ///
    /// [`ForgeError::BuildFailed`] on budget exhaustion,
    /// [`ForgeError::Architect`] / [`ForgeError::Dependency`] on sentinels.
    pub fn into_result(self) -> Result<()> {
        match self.outcome {
            BuildOutcome::Success { .. } => Ok(()),
            BuildOutcome::Failed {
                attempts,
                last_output,
            } => Err(ForgeError::BuildFailed {
                attempts,
                output: last_output,
            }),
            BuildOutcome::Fatal { sentinel, reason } => {
                if sentinel == crate::prompts::ARCHITECT_SENTINEL {
                    Err(ForgeError::Architect { reason })
                } else {
                    Err(ForgeError::Dependency { reason })
                }
            }
        }
    }
}

/// Supervises repeated builder-agent runs over one module.
pub struct BuildSupervisor {
    model: Arc<dyn ChatModel>,
    oracle: Arc<dyn TestOracle>,
    approval: Arc<dyn ApprovalPort>,
    workspace: PathBuf,
    config: BuildConfig,
}

impl BuildSupervisor {
    #[must_use]
    pub fn new(
        model: Arc<dyn ChatModel>,
        oracle: Arc<dyn TestOracle>,
        approval: Arc<dyn ApprovalPort>,
        workspace: impl Into<PathBuf>,
        config: BuildConfig,
    ) -> Self {
        Self {
            model,
            oracle,
            approval,
            workspace: workspace.into(),
            config,
        }
    }

    /// Build `module_dir` until its oracle passes or the budget runs out.
    ///
    /// `base_prompt` is the first attempt's instruction; later attempts run
    /// a retry prompt rendered from the previous failure. When a dependency
    /// manifest is discovered, a dependency context note is appended to
    /// every attempt's prompt.
    ///
    /// # Errors
    ///
    /// Returns an error only for setup problems (missing module or test
    /// oracle, sandbox construction). Build failures and sentinels are
    /// reported through [`BuildOutcome`], not as errors.
    pub async fn run(&self, module_dir: &Path, base_prompt: &str) -> Result<BuildReport> {
        if !module_dir.join(TEST_SPEC_FILE).is_file() {
            return Err(ForgeError::not_found(format!(
                "{} (not a module directory: no {TEST_SPEC_FILE})",
                module_dir.display()
            )));
        }
        let module_dir = module_dir.canonicalize()?;
        let module = layout::module_name(&module_dir);

        let resolved = find_manifest(&module_dir);
        let dep_note = resolved
            .as_ref()
            .and_then(|r| render_dependency_note(r, &module));
        let manifest_root = resolved.as_ref().map(|r: &ResolvedManifest| r.root.clone());

        let constraint = READONLY_ARTIFACTS.iter().fold(
            SandboxConstraint::unrestricted().with_allowed_dir(&module_dir),
            |c, name| c.with_readonly(*name),
        );

        let mut attempts: Vec<BuildAttempt> = Vec::new();
        let mut prompt = compose_prompt(base_prompt, dep_note.as_deref());

        for index in 1..=self.config.max_attempts {
            info!(module = %module, attempt = index, max = self.config.max_attempts, "build attempt");
            let started_at = Utc::now();

            // Fresh session and sandbox per attempt; only disk state and
            // the retry prompt carry over.
            let tools = ToolSet::with_constraint(
                &self.workspace,
                constraint.clone(),
                Arc::clone(&self.approval),
            )?;
            let mut agent = Agent::new(Arc::clone(&self.model), tools, BUILDER_SYSTEM_PROMPT);

            let reply = agent.run(&prompt).await?;

            if let Some((sentinel, reason)) = detect_sentinel(&reply) {
                warn!(module = %module, sentinel, %reason, "builder escalated");
                attempts.push(BuildAttempt {
                    index,
                    prompt,
                    success: false,
                    output: reply,
                    started_at,
                });
                return Ok(BuildReport {
                    outcome: BuildOutcome::Fatal { sentinel, reason },
                    attempts,
                });
            }

            // An oracle that cannot even run counts as a failed attempt;
            // the error text feeds the retry prompt like any test failure.
            let verdict = match self.oracle.run(&module_dir, manifest_root.as_deref()).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(module = %module, attempt = index, error = %e, "oracle did not run");
                    OracleRun {
                        passed: false,
                        output: format!("test run failed to execute: {e}"),
                    }
                }
            };
            attempts.push(BuildAttempt {
                index,
                prompt: prompt.clone(),
                success: verdict.passed,
                output: verdict.output.clone(),
                started_at,
            });

            if verdict.passed {
                info!(module = %module, attempt = index, "oracle passed");
                return Ok(BuildReport {
                    outcome: BuildOutcome::Success { attempts: index },
                    attempts,
                });
            }

            warn!(module = %module, attempt = index, "oracle failed");
            prompt = compose_prompt(
                &render_retry_prompt(&module_dir, &verdict.output),
                dep_note.as_deref(),
            );
        }

        let last_output = attempts
            .last()
            .map(|a| a.output.clone())
            .unwrap_or_default();
        Ok(BuildReport {
            outcome: BuildOutcome::Failed {
                attempts: self.config.max_attempts,
                last_output,
            },
            attempts,
        })
    }
}

fn compose_prompt(base: &str, dep_note: Option<&str>) -> String {
    match dep_note {
        Some(note) => format!("{base}\n\n{note}"),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChatModel;
    use crate::manifest::MANIFEST_FILE;
    use crate::oracle::MockOracle;
    use crate::tools::MockApproval;
    use tempfile::TempDir;

    fn module_fixture() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("Adder");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join(TEST_SPEC_FILE), "def test_add(): pass\n").unwrap();
        (temp, module)
    }

    fn supervisor(
        temp: &TempDir,
        model: Arc<MockChatModel>,
        oracle: Arc<MockOracle>,
        max_attempts: u32,
    ) -> BuildSupervisor {
        BuildSupervisor::new(
            model,
            oracle,
            Arc::new(MockApproval::new(true)),
            temp.path(),
            BuildConfig { max_attempts },
        )
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let (temp, module) = module_fixture();
        let model = Arc::new(MockChatModel::new().with_reply("implemented"));
        let oracle = Arc::new(MockOracle::passing());
        let sup = supervisor(&temp, model.clone(), oracle.clone(), 5);

        let report = sup.run(&module, "build it").await.unwrap();
        assert!(matches!(report.outcome, BuildOutcome::Success { attempts: 1 }));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(oracle.run_count(), 1);
        assert_eq!(model.call_count(), 1);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_retries_until_oracle_passes() {
        let (temp, module) = module_fixture();
        let model = Arc::new(
            MockChatModel::new()
                .with_reply("try 1")
                .with_reply("try 2")
                .with_reply("try 3"),
        );
        let oracle = Arc::new(MockOracle::failing_times(2).with_failure_output("FAILED test_add"));
        let sup = supervisor(&temp, model.clone(), oracle.clone(), 5);

        let report = sup.run(&module, "build it").await.unwrap();
        assert!(matches!(report.outcome, BuildOutcome::Success { attempts: 3 }));
        assert_eq!(oracle.run_count(), 3);

        // Each attempt started a fresh session: one user prompt per call.
        let prompts = model.seen_prompts();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[0], "build it");
        assert!(prompts[1].contains("failed its tests"));
        assert!(prompts[1].contains("FAILED test_add"));
        assert!(prompts[1].contains("DO NOT modify `test_spec.py`"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_reports_failed() {
        let (temp, module) = module_fixture();
        let model = Arc::new(
            MockChatModel::new()
                .with_reply("a")
                .with_reply("b")
                .with_reply("c"),
        );
        let oracle = Arc::new(MockOracle::failing_times(99).with_failure_output("still broken"));
        let sup = supervisor(&temp, model, oracle.clone(), 3);

        let report = sup.run(&module, "build it").await.unwrap();
        match &report.outcome {
            BuildOutcome::Failed {
                attempts,
                last_output,
            } => {
                assert_eq!(*attempts, 3);
                assert_eq!(last_output, "still broken");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(oracle.run_count(), 3);
        assert_eq!(report.attempts.len(), 3);

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, ForgeError::BuildFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_oracle_execution_error_is_a_failed_attempt_not_an_abort() {
        let (temp, module) = module_fixture();
        let model = Arc::new(
            MockChatModel::new()
                .with_reply("a")
                .with_reply("b")
                .with_reply("c"),
        );
        // A test runner that cannot even be spawned must burn attempts like
        // any failing oracle run, not terminate the loop.
        let oracle = Arc::new(crate::oracle::PytestOracle::new().with_python("no-such-python"));
        let sup = BuildSupervisor::new(
            model.clone(),
            oracle,
            Arc::new(MockApproval::new(true)),
            temp.path(),
            BuildConfig { max_attempts: 3 },
        );

        let report = sup.run(&module, "build it").await.unwrap();
        match &report.outcome {
            BuildOutcome::Failed {
                attempts,
                last_output,
            } => {
                assert_eq!(*attempts, 3);
                assert!(last_output.contains("test run failed to execute"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(report.attempts.len(), 3);
        // Retry prompts carried the execution error text.
        let prompts = model.seen_prompts();
        assert!(prompts[1].contains("test run failed to execute"));
    }

    #[tokio::test]
    async fn test_sentinel_aborts_before_oracle() {
        let (temp, module) = module_fixture();
        let model = Arc::new(
            MockChatModel::new().with_reply("ARCHITECT_ERROR: tests contradict the interface"),
        );
        let oracle = Arc::new(MockOracle::passing());
        let sup = supervisor(&temp, model, oracle.clone(), 5);

        let report = sup.run(&module, "build it").await.unwrap();
        match &report.outcome {
            BuildOutcome::Fatal { sentinel, reason } => {
                assert_eq!(*sentinel, crate::prompts::ARCHITECT_SENTINEL);
                assert_eq!(reason, "tests contradict the interface");
            }
            other => panic!("expected Fatal, got {other:?}"),
        }
        // The oracle never ran.
        assert_eq!(oracle.run_count(), 0);

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, ForgeError::Architect { .. }));
    }

    #[tokio::test]
    async fn test_dependency_sentinel_maps_to_dependency_error() {
        let (temp, module) = module_fixture();
        let model =
            Arc::new(MockChatModel::new().with_reply("DEPENDENCY_ERROR: Adder is missing"));
        let sup = supervisor(&temp, model, Arc::new(MockOracle::passing()), 5);

        let report = sup.run(&module, "build it").await.unwrap();
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, ForgeError::Dependency { .. }));
    }

    #[tokio::test]
    async fn test_rebuilt_sandbox_keeps_constraints_on_every_attempt() {
        use crate::session::{Message, ToolCall};

        let (temp, module) = module_fixture();
        let spec_before = std::fs::read_to_string(module.join(TEST_SPEC_FILE)).unwrap();

        // Attempt 1 tries to rewrite the locked test oracle; attempt 2, on a
        // freshly constructed sandbox, tries to escape the module directory
        // and also makes one legitimate write.
        let attempt2_calls = Message::assistant(
            "",
            Some(vec![
                ToolCall::synthetic(
                    "write_file",
                    r#"{"path": "elsewhere/steal.py", "content": "x"}"#,
                ),
                ToolCall::synthetic(
                    "write_file",
                    r#"{"path": "Adder/implementation.py", "content": "def add(a, b):\n    return a + b\n"}"#,
                ),
            ]),
        );
        let model = Arc::new(
            MockChatModel::new()
                .with_tool_reply(
                    "write_file",
                    r#"{"path": "Adder/test_spec.py", "content": "def test_x(): pass\n"}"#,
                )
                .with_reply("attempt one done")
                .with_message(attempt2_calls)
                .with_reply("attempt two done"),
        );
        let oracle = Arc::new(MockOracle::failing_times(1));
        let sup = supervisor(&temp, model, oracle.clone(), 5);

        let report = sup.run(&module, "build it").await.unwrap();
        assert!(matches!(report.outcome, BuildOutcome::Success { attempts: 2 }));
        assert_eq!(oracle.run_count(), 2);

        // The readonly artifact survived both attempts untouched.
        assert_eq!(
            std::fs::read_to_string(module.join(TEST_SPEC_FILE)).unwrap(),
            spec_before
        );
        // The out-of-module write was refused by the rebuilt sandbox.
        assert!(!temp.path().join("elsewhere").exists());
        // The confined write went through.
        assert_eq!(
            std::fs::read_to_string(module.join("implementation.py")).unwrap(),
            "def add(a, b):\n    return a + b\n"
        );
    }

    #[tokio::test]
    async fn test_dependency_note_appended_to_every_prompt() {
        let (temp, _) = module_fixture();
        std::fs::write(
            temp.path().join(MANIFEST_FILE),
            r#"{"Adder": ["Numbers"]}"#,
        )
        .unwrap();
        let module = temp.path().join("Adder");

        let model = Arc::new(MockChatModel::new().with_reply("a").with_reply("b"));
        let oracle = Arc::new(MockOracle::failing_times(1));
        let sup = supervisor(&temp, model.clone(), oracle.clone(), 5);

        sup.run(&module, "build it").await.unwrap();
        let prompts = model.seen_prompts();
        assert_eq!(prompts.len(), 2);
        for prompt in &prompts {
            assert!(prompt.contains("## Dependency Context"));
            assert!(prompt.contains("Numbers"));
        }

        // The oracle got the manifest root for PYTHONPATH composition.
        let calls = oracle.calls();
        assert_eq!(
            calls[0].1.as_deref(),
            Some(temp.path().canonicalize().unwrap().as_path())
        );
    }

    #[tokio::test]
    async fn test_missing_test_spec_is_setup_error() {
        let temp = TempDir::new().unwrap();
        let bare = temp.path().join("NotAModule");
        std::fs::create_dir_all(&bare).unwrap();
        let sup = supervisor(
            &temp,
            Arc::new(MockChatModel::new()),
            Arc::new(MockOracle::passing()),
            5,
        );

        let err = sup.run(&bare, "build it").await.unwrap_err();
        assert!(matches!(err, ForgeError::NotFound { .. }));
        assert!(err.to_string().contains(TEST_SPEC_FILE));
    }
}
