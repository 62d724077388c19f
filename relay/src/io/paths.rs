//! Canonical locations inside `.relay/`.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

/// Name of the per-project relay directory.
pub const RELAY_DIR: &str = ".relay";
/// Workflow used when neither `--workflow` nor config names one.
pub const DEFAULT_WORKFLOW: &str = "default";

/// Project-level paths within `.relay/`.
#[derive(Debug, Clone)]
pub struct RelayPaths {
    pub root: PathBuf,
    pub relay_dir: PathBuf,
    pub config_path: PathBuf,
    pub workflows_dir: PathBuf,
}

impl RelayPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let relay_dir = root.join(RELAY_DIR);
        Self {
            root: root.clone(),
            config_path: relay_dir.join("relay.toml"),
            workflows_dir: relay_dir.join("workflows"),
            relay_dir,
        }
    }

    /// Paths rooted at the nearest ancestor of `start` containing `.relay/`,
    /// falling back to `start` itself.
    pub fn discover(start: &Path) -> Self {
        let root = find_relay_root(start).unwrap_or_else(|| start.to_path_buf());
        Self::new(root)
    }

    pub fn workflow(&self, name: &str) -> WorkflowPaths {
        WorkflowPaths::new(self.workflows_dir.join(name), name).with_root(&self.root)
    }
}

/// Walk up from `start` looking for a directory that holds `.relay/`.
pub fn find_relay_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(RELAY_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// Files belonging to one named workflow.
#[derive(Debug, Clone)]
pub struct WorkflowPaths {
    pub name: String,
    /// Project root; agents run here.
    pub root: PathBuf,
    pub dir: PathBuf,
    pub workflow_path: PathBuf,
    pub state_path: PathBuf,
    pub roles_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl WorkflowPaths {
    /// Paths for a workflow stored in `dir`. The project root defaults to `dir`.
    pub fn new(dir: impl Into<PathBuf>, name: &str) -> Self {
        let dir = dir.into();
        Self {
            name: name.to_string(),
            root: dir.clone(),
            workflow_path: dir.join("workflow.yml"),
            state_path: dir.join("state.yml"),
            roles_dir: dir.join("roles"),
            artifacts_dir: dir.join("artifacts"),
            logs_dir: dir.join("logs"),
            dir,
        }
    }

    pub fn with_root(mut self, root: &Path) -> Self {
        self.root = root.to_path_buf();
        self
    }

    /// Resolve a role's `rules` entry, which is relative to the workflow directory.
    pub fn rules_path(&self, rules: &str) -> PathBuf {
        self.dir.join(rules)
    }

    /// Fail with a pointer to `relay init` when the workflow has not been created.
    pub fn ensure_exists(&self) -> Result<()> {
        if self.workflow_path.is_file() {
            return Ok(());
        }
        Err(anyhow!(
            "no workflow '{}' found at {} (run `relay init` first)",
            self.name,
            self.dir.display()
        ))
    }
}

/// Workflow names become directory names: `[A-Za-z0-9._-]`, no leading dot.
pub fn validate_workflow_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("workflow name must not be empty"));
    }
    if name.starts_with('.') {
        return Err(anyhow!("workflow name must not start with '.' (got '{name}')"));
    }
    if name
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!(
            "workflow name must be [A-Za-z0-9._-] only (got '{name}')"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discover_walks_up_to_relay_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(RELAY_DIR)).expect("mkdir relay");
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir nested");

        let paths = RelayPaths::discover(&nested);
        assert_eq!(paths.root, temp.path());
    }

    #[test]
    fn discover_falls_back_to_start() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RelayPaths::discover(temp.path());
        assert_eq!(paths.root, temp.path());
        assert_eq!(
            paths.workflow("default").state_path,
            temp.path().join(".relay/workflows/default/state.yml")
        );
    }

    #[test]
    fn workflow_names_are_path_safe() {
        assert!(validate_workflow_name("review-loop_2").is_ok());
        for bad in ["", "a/b", "..", "has space"] {
            assert!(validate_workflow_name(bad).is_err(), "{bad:?} accepted");
        }
    }
}
