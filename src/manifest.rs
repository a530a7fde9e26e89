//! Dependency-manifest discovery and context rendering.
//!
//! A project that splits work into module directories can carry a
//! `dependency_graph.json` at its root mapping module names to the modules
//! they depend on:
//!
//! ```json
//! {
//!   "Calculator": ["Adder", "Multiplier"],
//!   "Adder": [],
//!   "Multiplier": ["Adder"]
//! }
//! ```
//!
//! Before a build the supervisor searches the module directory and a
//! bounded number of parent directories for this file. When found, the
//! dependencies of the module under construction are rendered into a
//! context note appended to the build prompt, pointing the model at each
//! dependency's contract file. An absent manifest is the normal case and
//! never an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::layout::INTERFACE_FILE;

/// Manifest file name, searched upward from the module directory.
pub const MANIFEST_FILE: &str = "dependency_graph.json";

/// How many parent directories above the module to search, in addition to
/// the module directory itself.
pub const MANIFEST_SEARCH_HOPS: usize = 3;

/// Parsed manifest: module name to the names of its dependencies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencyManifest {
    #[serde(flatten)]
    modules: BTreeMap<String, Vec<String>>,
}

impl DependencyManifest {
    /// Dependencies of `module`, or an empty slice for unknown modules.
    #[must_use]
    pub fn dependencies_of(&self, module: &str) -> &[String] {
        self.modules.get(module).map_or(&[], Vec::as_slice)
    }

    /// All module names the manifest knows about.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

/// A manifest together with the directory it was found in. Dependency
/// module directories are siblings under this root.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub root: PathBuf,
    pub manifest: DependencyManifest,
}

/// Search `module_dir` and up to [`MANIFEST_SEARCH_HOPS`] parents for a
/// manifest. An unreadable or malformed manifest is logged and skipped,
/// never fatal.
#[must_use]
pub fn find_manifest(module_dir: &Path) -> Option<ResolvedManifest> {
    let mut dir = module_dir;
    for _ in 0..=MANIFEST_SEARCH_HOPS {
        let candidate = dir.join(MANIFEST_FILE);
        if candidate.is_file() {
            match read_manifest(&candidate) {
                Ok(manifest) => {
                    debug!(path = %candidate.display(), "found dependency manifest");
                    return Some(ResolvedManifest {
                        root: dir.to_path_buf(),
                        manifest,
                    });
                }
                Err(e) => {
                    warn!(path = %candidate.display(), error = %e, "skipping unreadable manifest");
                }
            }
        }
        dir = dir.parent()?;
    }
    None
}

fn read_manifest(path: &Path) -> std::io::Result<DependencyManifest> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(std::io::Error::other)
}

/// Render the dependency context note for `module`, or `None` when the
/// module has no dependencies listed.
#[must_use]
pub fn render_dependency_note(resolved: &ResolvedManifest, module: &str) -> Option<String> {
    let deps = resolved.manifest.dependencies_of(module);
    if deps.is_empty() {
        return None;
    }

    let mut note = String::from("## Dependency Context\n\n");
    note.push_str(&format!(
        "The module '{module}' depends on the following already-built modules. \
Import from them rather than reimplementing their behavior. \
Their contracts are:\n\n"
    ));
    for dep in deps {
        let contract = resolved.root.join(dep).join(INTERFACE_FILE);
        note.push_str(&format!("- {dep}: see `{}`\n", contract.display()));
    }
    Some(note)
}
