//! Pass/fail oracle for built modules.
//!
//! The supervisor never trusts the model's claim that a module works; it
//! asks an oracle. The production oracle shells out to pytest against the
//! module's `test_spec.py`; tests use [`MockOracle`] to script verdicts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ForgeError, Result};
use crate::layout::TEST_SPEC_FILE;

/// Outcome of one oracle invocation.
#[derive(Debug, Clone)]
pub struct OracleRun {
    /// Whether the verdict was a pass.
    pub passed: bool,
    /// Combined stdout/stderr of the run, fed back into retry prompts.
    pub output: String,
}

/// Source of truth for whether a built module satisfies its tests.
#[async_trait]
pub trait TestOracle: Send + Sync {
    /// Run the module's tests. `manifest_root`, when present, is added to
    /// the import path so dependency modules resolve.
    async fn run(&self, module_dir: &Path, manifest_root: Option<&Path>) -> Result<OracleRun>;
}

// ============================================================================
// Pytest oracle
// ============================================================================

/// Runs `python -m pytest <module>/test_spec.py` with the module directory
/// (and the manifest root, when known) on `PYTHONPATH`.
pub struct PytestOracle {
    python: String,
}

impl PytestOracle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            python: "python3".to_string(),
        }
    }

    /// Override the python interpreter, e.g. a venv binary.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

impl Default for PytestOracle {
    fn default() -> Self {
        Self::new()
    }
}

/// Compose the PYTHONPATH for a test run: module dir, then manifest root,
/// then whatever the environment already had.
pub(crate) fn python_path_env(module_dir: &Path, manifest_root: Option<&Path>) -> String {
    let mut entries: Vec<PathBuf> = vec![module_dir.to_path_buf()];
    if let Some(root) = manifest_root {
        if root != module_dir {
            entries.push(root.to_path_buf());
        }
    }
    let mut joined = entries
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":");
    if let Ok(existing) = std::env::var("PYTHONPATH") {
        if !existing.is_empty() {
            joined.push(':');
            joined.push_str(&existing);
        }
    }
    joined
}

#[async_trait]
impl TestOracle for PytestOracle {
    async fn run(&self, module_dir: &Path, manifest_root: Option<&Path>) -> Result<OracleRun> {
        let spec = module_dir.join(TEST_SPEC_FILE);
        if !spec.is_file() {
            return Err(ForgeError::not_found(spec.display().to_string()));
        }

        let python_path = python_path_env(module_dir, manifest_root);
        debug!(module = %module_dir.display(), %python_path, "running pytest");

        let output = tokio::process::Command::new(&self.python)
            .arg("-m")
            .arg("pytest")
            .arg(&spec)
            .arg("-x")
            .arg("--no-header")
            .current_dir(module_dir)
            .env("PYTHONPATH", python_path)
            .output()
            .await?;

        let passed = output.status.success();
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push('\n');
            combined.push_str(&stderr);
        }

        info!(module = %module_dir.display(), passed, "oracle verdict");
        Ok(OracleRun {
            passed,
            output: combined,
        })
    }
}

// ============================================================================
// Mock oracle
// ============================================================================

/// Scriptable oracle for supervisor tests: fails the first `fail_count`
/// runs with `failure_output`, then passes.
pub struct MockOracle {
    fail_count: u32,
    failure_output: String,
    run_count: AtomicU32,
    calls: Mutex<Vec<(PathBuf, Option<PathBuf>)>>,
}

impl MockOracle {
    #[must_use]
    pub fn passing() -> Self {
        Self::failing_times(0)
    }

    /// Fail the first `n` runs, then pass.
    #[must_use]
    pub fn failing_times(n: u32) -> Self {
        Self {
            fail_count: n,
            failure_output: "FAILED test_spec.py::test_example - AssertionError".to_string(),
            run_count: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_failure_output(mut self, output: impl Into<String>) -> Self {
        self.failure_output = output.into();
        self
    }

    #[must_use]
    pub fn run_count(&self) -> u32 {
        self.run_count.load(Ordering::SeqCst)
    }

    /// Arguments of every run, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(PathBuf, Option<PathBuf>)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl TestOracle for MockOracle {
    async fn run(&self, module_dir: &Path, manifest_root: Option<&Path>) -> Result<OracleRun> {
        let run = self.run_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().expect("calls lock").push((
            module_dir.to_path_buf(),
            manifest_root.map(Path::to_path_buf),
        ));

        if run < self.fail_count {
            Ok(OracleRun {
                passed: false,
                output: self.failure_output.clone(),
            })
        } else {
            Ok(OracleRun {
                passed: true,
                output: "3 passed in 0.04s".to_string(),
            })
        }
    }
}
