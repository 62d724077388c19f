//! Project configuration stored at `.relay/relay.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::paths::{DEFAULT_WORKFLOW, validate_workflow_name};
use super::write_atomic;

/// Which agent backend `relay run` drives.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Print the prompt and wait for a human to run the agent.
    #[default]
    Manual,
    /// Pipe the prompt into `[command].program`.
    Command,
}

/// Relay configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Workflow used when `--workflow` is not given.
    pub default_workflow: String,

    pub backend: BackendKind,

    /// Artifacts longer than this many characters are truncated in prompts.
    pub max_artifact_chars: usize,

    /// Upper bound on steps executed by `relay run --loop`.
    pub max_loop_steps: u32,

    /// Wall-clock budget for one command-backend invocation.
    pub agent_timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub command: CommandConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Agent command line (e.g. `["codex", "exec", "-"]`); receives the prompt on stdin.
    pub program: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_workflow: DEFAULT_WORKFLOW.to_string(),
            backend: BackendKind::Manual,
            max_artifact_chars: 50_000,
            max_loop_steps: 50,
            agent_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            command: CommandConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        validate_workflow_name(&self.default_workflow).context("default_workflow")?;
        if self.max_artifact_chars == 0 {
            return Err(anyhow!("max_artifact_chars must be > 0"));
        }
        if self.max_loop_steps == 0 {
            return Err(anyhow!("max_loop_steps must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.backend == BackendKind::Command {
            self.command_program()?;
        }
        Ok(())
    }

    /// The configured agent command, or an error if it is unset.
    pub fn command_program(&self) -> Result<&[String]> {
        match self.command.program.first() {
            Some(program) if !program.trim().is_empty() => Ok(&self.command.program),
            _ => Err(anyhow!(
                "command.program must be a non-empty array when backend = \"command\""
            )),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RelayConfig::default()`.
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(RelayConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RelayConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RelayConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RelayConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("relay.toml");
        let cfg = RelayConfig {
            backend: BackendKind::Command,
            command: CommandConfig {
                program: vec!["codex".to_string(), "exec".to_string()],
            },
            ..RelayConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("relay.toml");
        fs::write(&path, "max_loop_steps = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_loop_steps, 5);
        assert_eq!(cfg.max_artifact_chars, 50_000);
        assert_eq!(cfg.backend, BackendKind::Manual);
    }

    #[test]
    fn command_backend_requires_program() {
        let cfg = RelayConfig {
            backend: BackendKind::Command,
            ..RelayConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("command.program"));
    }
}
