//! Run state storage (`state.yml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use super::write_atomic;
use crate::protocol::RunState;

/// Load run state from disk.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    if !path.exists() {
        return Err(anyhow!(
            "state file not found: {}\nRun `relay init` to create a workflow, or `relay reset` to restore its state.",
            path.display()
        ));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let value: serde_yaml::Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    if !value.is_mapping() {
        return Err(anyhow!(
            "malformed run state {}: expected a YAML mapping",
            path.display()
        ));
    }
    let state: RunState = serde_yaml::from_value(value)
        .with_context(|| format!("malformed run state {}", path.display()))?;
    debug!(stage = state.stage(), "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), stage = state.stage(), "writing run state");
    let buf = serde_yaml::to_string(state).context("serialize run state")?;
    write_atomic(path, &buf)
}
