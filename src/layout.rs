//! Module directory layout conventions.
//!
//! An architect-produced module directory contains an instructions artifact,
//! a contract artifact and a test oracle, all readonly during the build
//! phase, plus exactly one writable implementation artifact produced by the
//! build loop.

use std::path::Path;

/// Authoritative pass/fail source; readonly during builds.
pub const TEST_SPEC_FILE: &str = "test_spec.py";

/// Human/agent-readable build brief; readonly during builds.
pub const PROMPT_FILE: &str = "PROMPT.md";

/// Contract the implementation must satisfy; readonly during builds.
pub const INTERFACE_FILE: &str = "interface.py";

/// The one artifact the build loop is allowed to produce.
pub const IMPLEMENTATION_FILE: &str = "implementation.py";

/// Artifacts locked against writes while a module is being built.
pub const READONLY_ARTIFACTS: [&str; 3] = [TEST_SPEC_FILE, PROMPT_FILE, INTERFACE_FILE];

/// Module name as used in the dependency manifest: the directory name.
#[must_use]
pub fn module_name(module_dir: &Path) -> String {
    module_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// True if `path` looks like a buildable module directory (has a test oracle).
#[must_use]
pub fn is_module_dir(path: &Path) -> bool {
    path.join(TEST_SPEC_FILE).is_file()
}
