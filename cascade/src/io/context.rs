//! Explicit per-project context passed to the controller.

use std::path::{Path, PathBuf};

use anyhow::Result;

use super::config::{CascadeConfig, load_config};
use super::init::WorkflowPaths;

/// Paths and configuration for one project.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub paths: WorkflowPaths,
    pub config: CascadeConfig,
}

impl WorkflowContext {
    pub fn new(paths: WorkflowPaths, config: CascadeConfig) -> Self {
        Self { paths, config }
    }

    /// Resolve paths for `root` and load `.cascade/config.toml` (defaults when missing).
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let paths = WorkflowPaths::new(root);
        let config = load_config(&paths.config_path)?;
        Ok(Self { paths, config })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Plan file resolved against the project root.
    pub fn plan_path(&self) -> PathBuf {
        self.paths.root.join(&self.config.plan_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_resolves_plan_file_from_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkflowPaths::new(temp.path());
        fs::create_dir_all(&paths.cascade_dir).expect("mkdir");
        fs::write(&paths.config_path, "plan_file = \"docs/PLAN.md\"\n").expect("write");

        let ctx = WorkflowContext::load(temp.path()).expect("load");
        assert_eq!(ctx.plan_path(), temp.path().join("docs/PLAN.md"));
    }
}
