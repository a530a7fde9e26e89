//! Sandboxed tool dispatcher.
//!
//! A [`ToolSet`] exposes a fixed set of file and process capabilities scoped
//! to a workspace root. Two independent permission layers apply to writes:
//! a readonly-filename list (locked contract artifacts) and an optional
//! allowed-directory list. Reads are never restricted by write permissions.
//!
//! Constraints are supplied at construction time, not set afterwards: any
//! "reset agent state" operation recreates the `ToolSet` from the same
//! [`SandboxConstraint`], so a reset can never silently drop the sandbox.
//!
//! `run_command` is the only capability with an external side-effect gate:
//! it blocks on an injected [`ApprovalPort`] before executing anything.

pub mod repair;

use std::io::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{ForgeError, Result};

/// Permission constraints attached to one [`ToolSet`] instance.
///
/// `allowed_dirs: None` means unrestricted: any non-readonly path under the
/// workspace root is writable.
#[derive(Debug, Clone, Default)]
pub struct SandboxConstraint {
    /// Absolute directories writes are confined to, when set.
    pub allowed_dirs: Option<Vec<PathBuf>>,
    /// Bare filenames that may never be written, wherever they live.
    pub readonly_filenames: Vec<String>,
}

impl SandboxConstraint {
    /// No restrictions beyond workspace containment.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Confine writes to one directory.
    #[must_use]
    pub fn with_allowed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.allowed_dirs
            .get_or_insert_with(Vec::new)
            .push(dir.into());
        self
    }

    /// Lock a bare filename against writes.
    #[must_use]
    pub fn with_readonly(mut self, filename: impl Into<String>) -> Self {
        self.readonly_filenames.push(filename.into());
        self
    }
}

/// Synchronous human-approval gate for shell commands.
///
/// Modeled as an injected port so the dispatcher stays unit-testable
/// without a terminal.
pub trait ApprovalPort: Send + Sync {
    /// Block until the operator grants or denies execution of `command`.
    fn approve(&self, command: &str) -> bool;
}

/// Interactive approval on stdin, used by the binary.
pub struct StdinApproval;

impl ApprovalPort for StdinApproval {
    fn approve(&self, command: &str) -> bool {
        eprintln!("\n[SECURITY] The agent wants to execute: {command}");
        eprint!("Allow execution? (y/n): ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

/// Scripted approval for tests; records every command it was asked about.
#[derive(Debug)]
pub struct MockApproval {
    allow: bool,
    requests: Mutex<Vec<String>>,
}

impl MockApproval {
    /// Approval port that always answers `allow`.
    #[must_use]
    pub fn new(allow: bool) -> Self {
        Self {
            allow,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Commands that reached the gate, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ApprovalPort for MockApproval {
    fn approve(&self, command: &str) -> bool {
        self.requests
            .lock()
            .expect("requests lock")
            .push(command.to_string());
        self.allow
    }
}

/// The fixed tool-schema catalogue shown to the model.
///
/// Names and required parameters are part of the contract with the model;
/// the dispatch table in the turn engine must stay in sync with this list.
#[must_use]
pub fn catalogue() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "read_file",
                "description": "Read the contents of a file at the specified path.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The path to the file to read (relative to workspace)"
                        }
                    },
                    "required": ["path"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "write_file",
                "description": "Write content to a file. Overwrites existing files or creates new ones.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The path to the file to write (relative to workspace)"
                        },
                        "content": {
                            "type": "string",
                            "description": "The full content to write to the file"
                        }
                    },
                    "required": ["path", "content"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "append_file",
                "description": "Append content to an existing file. Useful for large files to avoid token limits. Fails if the file does not exist; use write_file to create new files.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The path to the file to append to (relative to workspace)"
                        },
                        "content": {
                            "type": "string",
                            "description": "The content to append to the file"
                        }
                    },
                    "required": ["path", "content"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "edit_file",
                "description": "Replace a specific string in a file with a new string.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The path to the file to edit (relative to workspace)"
                        },
                        "old_string": {
                            "type": "string",
                            "description": "The exact string to be replaced (must be unique in the file)"
                        },
                        "new_string": {
                            "type": "string",
                            "description": "The new string to replace with"
                        }
                    },
                    "required": ["path", "old_string", "new_string"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "list_files",
                "description": "List all files and directories in the specified path.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The directory path to list (default is root of workspace)",
                            "default": "."
                        }
                    }
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "run_command",
                "description": "Execute a shell command in the workspace root. Requires explicit user approval before anything runs.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The shell command to execute"
                        }
                    },
                    "required": ["command"]
                }
            }
        }),
    ]
}

/// Lexically normalize a path: fold `.` and `..` without touching the
/// filesystem, so nonexistent targets still resolve.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Pops nothing once we are at the filesystem root.
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// File and process capabilities scoped to one workspace root.
pub struct ToolSet {
    base_dir: PathBuf,
    constraint: SandboxConstraint,
    approval: Arc<dyn ApprovalPort>,
}

impl ToolSet {
    /// Create an unrestricted tool set rooted at `base_dir`.
    ///
    /// The directory is created if missing and canonicalized so containment
    /// checks compare real paths.
    ///
    /// # Errors
    ///
    /// Fails when the root cannot be created or canonicalized.
    pub fn new(base_dir: impl Into<PathBuf>, approval: Arc<dyn ApprovalPort>) -> Result<Self> {
        Self::with_constraint(base_dir, SandboxConstraint::unrestricted(), approval)
    }

    /// Create a tool set with a constraint set fixed for its lifetime.
    pub fn with_constraint(
        base_dir: impl Into<PathBuf>,
        constraint: SandboxConstraint,
        approval: Arc<dyn ApprovalPort>,
    ) -> Result<Self> {
        let base_dir: PathBuf = base_dir.into();
        if !base_dir.exists() {
            std::fs::create_dir_all(&base_dir)?;
        }
        let base_dir = base_dir.canonicalize()?;
        debug!(workspace = %base_dir.display(), "sandbox initialized");
        Ok(Self {
            base_dir,
            constraint,
            approval,
        })
    }

    /// The canonical workspace root.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The constraint set this instance was created with.
    #[must_use]
    pub fn constraint(&self) -> &SandboxConstraint {
        &self.constraint
    }

    /// Resolve a user-supplied path against the workspace root.
    ///
    /// The joined path is lexically normalized and must be the root itself
    /// or a true path-segment descendant of it. Containment is checked
    /// component-wise (`Path::starts_with`), never as a string prefix, so
    /// a sibling like `/work2` does not pass for root `/work`.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::PathTraversal`] for anything that escapes.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf> {
        let normalized = normalize_path(&self.base_dir.join(user_path));
        if normalized == self.base_dir || normalized.starts_with(&self.base_dir) {
            Ok(normalized)
        } else {
            Err(ForgeError::PathTraversal {
                path: user_path.to_string(),
                workspace: self.base_dir.clone(),
            })
        }
    }

    /// Check both write-permission layers for an already-resolved path.
    fn check_write_permission(&self, abs_path: &Path) -> Result<()> {
        if let Some(filename) = abs_path.file_name().map(|f| f.to_string_lossy()) {
            if self
                .constraint
                .readonly_filenames
                .iter()
                .any(|locked| locked == filename.as_ref())
            {
                return Err(ForgeError::permission_denied(format!(
                    "{filename} is read-only"
                )));
            }
        }

        if let Some(allowed) = &self.constraint.allowed_dirs {
            let inside = allowed.iter().any(|dir| abs_path.starts_with(dir));
            if !inside {
                return Err(ForgeError::permission_denied(format!(
                    "write operations are restricted to: {}",
                    allowed
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Read a file. Never restricted by write permissions.
    pub fn read_file(&self, path: &str) -> Result<String> {
        let safe_path = self.resolve(path)?;
        if !safe_path.exists() {
            return Err(ForgeError::not_found(path));
        }
        if !safe_path.is_file() {
            return Err(ForgeError::NotAFile {
                path: path.to_string(),
            });
        }
        Ok(std::fs::read_to_string(&safe_path)?)
    }

    /// Write a file, creating parent directories as needed. Fully overwrites.
    pub fn write_file(&self, path: &str, content: &str) -> Result<String> {
        let safe_path = self.resolve(path)?;
        self.check_write_permission(&safe_path)?;
        if let Some(parent) = safe_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&safe_path, content)?;
        Ok(format!("Successfully wrote to {path}"))
    }

    /// Append to an existing file. Never creates.
    pub fn append_file(&self, path: &str, content: &str) -> Result<String> {
        let safe_path = self.resolve(path)?;
        self.check_write_permission(&safe_path)?;
        if !safe_path.exists() {
            return Err(ForgeError::not_found(path));
        }
        let mut file = std::fs::OpenOptions::new().append(true).open(&safe_path)?;
        file.write_all(content.as_bytes())?;
        Ok(format!("Successfully appended to {path}"))
    }

    /// Replace exactly one occurrence of `old_string` with `new_string`.
    ///
    /// # Errors
    ///
    /// `EditTargetNotFound` when `old_string` is absent; `AmbiguousEdit`
    /// when it occurs more than once. The file is untouched in both cases.
    pub fn edit_file(&self, path: &str, old_string: &str, new_string: &str) -> Result<String> {
        let safe_path = self.resolve(path)?;
        self.check_write_permission(&safe_path)?;
        if !safe_path.exists() {
            return Err(ForgeError::not_found(path));
        }
        let content = std::fs::read_to_string(&safe_path)?;

        let occurrences = content.matches(old_string).count();
        match occurrences {
            0 => Err(ForgeError::EditTargetNotFound {
                path: path.to_string(),
            }),
            1 => {
                let new_content = content.replacen(old_string, new_string, 1);
                std::fs::write(&safe_path, new_content)?;
                Ok(format!("Successfully edited {path}"))
            }
            n => Err(ForgeError::AmbiguousEdit {
                path: path.to_string(),
                occurrences: n,
            }),
        }
    }

    /// List immediate entries of a directory, directories suffixed with `/`.
    pub fn list_files(&self, path: &str) -> Result<String> {
        let safe_path = self.resolve(path)?;
        if !safe_path.exists() {
            return Err(ForgeError::not_found(path));
        }
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&safe_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                entries.push(format!("{name}/"));
            } else {
                entries.push(name);
            }
        }
        entries.sort();
        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }

    /// Execute a shell command in the workspace root, gated on approval.
    ///
    /// Blocks until the approval port answers. On denial nothing executes
    /// and [`ForgeError::UserDenied`] is returned.
    pub fn run_command(&self, command: &str) -> Result<String> {
        if !self.approval.approve(command) {
            warn!(command, "command execution denied by user");
            return Err(ForgeError::UserDenied);
        }

        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.base_dir)
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(format!(
            "Exit Code: {}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}",
            output.status.code().unwrap_or(-1)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn toolset(root: &Path) -> ToolSet {
        ToolSet::new(root, Arc::new(MockApproval::new(true))).unwrap()
    }

    // =========================================================================
    // resolve
    // =========================================================================

    #[test]
    fn test_resolve_stays_inside_workspace() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        let resolved = tools.resolve("sub/dir/file.py").unwrap();
        assert!(resolved.starts_with(tools.base_dir()));
    }

    #[test]
    fn test_resolve_root_itself_is_allowed() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        assert_eq!(tools.resolve(".").unwrap(), tools.base_dir());
    }

    #[test]
    fn test_resolve_rejects_parent_traversal() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        let err = tools.resolve("../outside.txt").unwrap_err();
        assert!(matches!(err, ForgeError::PathTraversal { .. }));
        let err = tools.resolve("a/../../outside.txt").unwrap_err();
        assert!(matches!(err, ForgeError::PathTraversal { .. }));
    }

    #[test]
    fn test_resolve_rejects_sibling_with_extended_name() {
        // Root "work" must not admit a sibling named "work2": containment is
        // segment-wise, not a string-prefix test.
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("work");
        let sibling = temp.path().join("work2");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&sibling).unwrap();

        let tools = toolset(&root);
        let err = tools.resolve("../work2/file.txt").unwrap_err();
        assert!(matches!(err, ForgeError::PathTraversal { .. }));
    }

    #[test]
    fn test_resolve_interior_dotdot_is_fine() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        let resolved = tools.resolve("a/b/../c.txt").unwrap();
        assert_eq!(resolved, tools.base_dir().join("a/c.txt"));
    }

    #[test]
    fn test_normalize_path_folds_components() {
        assert_eq!(
            normalize_path(Path::new("/w/a/./b/../c")),
            PathBuf::from("/w/a/c")
        );
        // Excess parent components clamp at the filesystem root.
        assert_eq!(normalize_path(Path::new("/../../x")), PathBuf::from("/x"));
    }

    // =========================================================================
    // read / write / append
    // =========================================================================

    #[test]
    fn test_write_then_read_roundtrip() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        let confirmation = tools.write_file("pkg/mod.py", "x = 1\n").unwrap();
        assert!(confirmation.contains("pkg/mod.py"));
        assert_eq!(tools.read_file("pkg/mod.py").unwrap(), "x = 1\n");
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        assert!(matches!(
            tools.read_file("missing.py").unwrap_err(),
            ForgeError::NotFound { .. }
        ));
    }

    #[test]
    fn test_read_directory_is_not_a_file() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        std::fs::create_dir(temp.path().join("subdir")).unwrap();
        assert!(matches!(
            tools.read_file("subdir").unwrap_err(),
            ForgeError::NotAFile { .. }
        ));
    }

    #[test]
    fn test_append_never_creates() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        assert!(matches!(
            tools.append_file("new.py", "line\n").unwrap_err(),
            ForgeError::NotFound { .. }
        ));
        assert!(!temp.path().join("new.py").exists());

        tools.write_file("new.py", "first\n").unwrap();
        tools.append_file("new.py", "second\n").unwrap();
        assert_eq!(tools.read_file("new.py").unwrap(), "first\nsecond\n");
    }

    // =========================================================================
    // edit_file
    // =========================================================================

    #[test]
    fn test_edit_replaces_unique_occurrence() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        tools.write_file("impl.py", "def add(a, b):\n    return 0\n").unwrap();
        tools
            .edit_file("impl.py", "return 0", "return a + b")
            .unwrap();
        assert_eq!(
            tools.read_file("impl.py").unwrap(),
            "def add(a, b):\n    return a + b\n"
        );
    }

    #[test]
    fn test_edit_missing_target_leaves_file_unchanged() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        tools.write_file("impl.py", "x = 1\n").unwrap();
        let err = tools.edit_file("impl.py", "y = 2", "y = 3").unwrap_err();
        assert!(matches!(err, ForgeError::EditTargetNotFound { .. }));
        assert_eq!(tools.read_file("impl.py").unwrap(), "x = 1\n");
    }

    #[test]
    fn test_edit_ambiguous_target_leaves_file_unchanged() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        tools.write_file("impl.py", "pass\npass\n").unwrap();
        let err = tools.edit_file("impl.py", "pass", "return").unwrap_err();
        match err {
            ForgeError::AmbiguousEdit { occurrences, .. } => assert_eq!(occurrences, 2),
            other => panic!("expected AmbiguousEdit, got {other:?}"),
        }
        assert_eq!(tools.read_file("impl.py").unwrap(), "pass\npass\n");
    }

    // =========================================================================
    // list_files
    // =========================================================================

    #[test]
    fn test_list_files_marks_directories() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        tools.write_file("a.py", "").unwrap();
        std::fs::create_dir(temp.path().join("pkg")).unwrap();

        let listing = tools.list_files(".").unwrap();
        assert!(listing.contains("a.py"));
        assert!(listing.contains("pkg/"));
    }

    #[test]
    fn test_list_files_missing_dir_and_empty_dir() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        assert!(matches!(
            tools.list_files("nope").unwrap_err(),
            ForgeError::NotFound { .. }
        ));
        std::fs::create_dir(temp.path().join("empty")).unwrap();
        assert_eq!(tools.list_files("empty").unwrap(), "(empty directory)");
    }

    // =========================================================================
    // permissions
    // =========================================================================

    #[test]
    fn test_readonly_filename_blocks_all_write_paths() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("test_spec.py"), "def test(): pass\n").unwrap();
        let constraint = SandboxConstraint::unrestricted().with_readonly("test_spec.py");
        let tools = ToolSet::with_constraint(
            temp.path(),
            constraint,
            Arc::new(MockApproval::new(true)),
        )
        .unwrap();

        assert!(matches!(
            tools.write_file("test_spec.py", "x").unwrap_err(),
            ForgeError::PermissionDenied { .. }
        ));
        assert!(matches!(
            tools.append_file("test_spec.py", "x").unwrap_err(),
            ForgeError::PermissionDenied { .. }
        ));
        assert!(matches!(
            tools.edit_file("test_spec.py", "pass", "fail").unwrap_err(),
            ForgeError::PermissionDenied { .. }
        ));
        // Reads stay open.
        assert!(tools.read_file("test_spec.py").is_ok());
    }

    #[test]
    fn test_allowed_dirs_confine_writes() {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("proj/Adder");
        std::fs::create_dir_all(&module).unwrap();
        let module = module.canonicalize().unwrap();

        let constraint = SandboxConstraint::unrestricted().with_allowed_dir(&module);
        let tools = ToolSet::with_constraint(
            temp.path(),
            constraint,
            Arc::new(MockApproval::new(true)),
        )
        .unwrap();

        assert!(tools
            .write_file("proj/Adder/implementation.py", "pass\n")
            .is_ok());
        assert!(matches!(
            tools.write_file("proj/Other/implementation.py", "x").unwrap_err(),
            ForgeError::PermissionDenied { .. }
        ));
        assert!(matches!(
            tools.write_file("stray.txt", "x").unwrap_err(),
            ForgeError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn test_unrestricted_writes_anywhere_under_root() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        assert!(tools.write_file("anywhere/at/all.txt", "ok").is_ok());
    }

    // =========================================================================
    // run_command
    // =========================================================================

    #[test]
    fn test_run_command_denied_executes_nothing() {
        let temp = TempDir::new().unwrap();
        let approval = Arc::new(MockApproval::new(false));
        let tools = ToolSet::new(temp.path(), approval.clone()).unwrap();

        let err = tools.run_command("touch should_not_exist").unwrap_err();
        assert!(matches!(err, ForgeError::UserDenied));
        assert!(!temp.path().join("should_not_exist").exists());
        assert_eq!(approval.requests(), vec!["touch should_not_exist"]);
    }

    #[test]
    fn test_run_command_approved_runs_in_workspace() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());

        let output = tools.run_command("echo hello && pwd").unwrap();
        assert!(output.contains("Exit Code: 0"));
        assert!(output.contains("hello"));
        assert!(output.contains(&tools.base_dir().display().to_string()));
    }

    #[test]
    fn test_run_command_reports_nonzero_exit() {
        let temp = TempDir::new().unwrap();
        let tools = toolset(temp.path());
        let output = tools.run_command("exit 3").unwrap();
        assert!(output.contains("Exit Code: 3"));
    }

    // =========================================================================
    // catalogue
    // =========================================================================

    #[test]
    fn test_catalogue_names_and_required_params() {
        let tools = catalogue();
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "read_file",
                "write_file",
                "append_file",
                "edit_file",
                "list_files",
                "run_command"
            ]
        );

        let edit = &tools[3]["function"]["parameters"]["required"];
        assert_eq!(
            edit.as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect::<Vec<_>>(),
            vec!["path", "old_string", "new_string"]
        );
    }
}
