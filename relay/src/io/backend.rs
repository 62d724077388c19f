//! Agent backends: how a rendered prompt turns into artifact files.
//!
//! The orchestrator only depends on the [`Backend`] trait. `manual` hands the
//! prompt to a human; `command` pipes it into a configured agent CLI.

use std::fs;
use std::io::{BufRead, Stdout, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use super::artifacts::concrete_writes;
use super::config::{BackendKind, RelayConfig};
use super::process::run_with_deadline;
use super::{ConsoleInput, console_input, write_atomic};

/// One agent turn at one stage.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub stage: String,
    pub role_name: String,
    pub prompt: String,
    /// Role's declared outputs, globs included.
    pub writes: Vec<String>,
    pub artifact_dir: PathBuf,
    pub workdir: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// What the backend reports after the agent finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOutcome {
    /// First declared output that now exists, if any.
    pub output_file: Option<PathBuf>,
}

pub trait Backend {
    fn name(&self) -> &'static str;

    /// Run the agent to completion. Errors mean the turn produced nothing usable.
    fn invoke(&mut self, request: &InvokeRequest) -> Result<InvokeOutcome>;
}

/// First concrete write of `request` that exists in the artifact directory.
pub fn locate_output(request: &InvokeRequest) -> Option<PathBuf> {
    concrete_writes(&request.writes)
        .into_iter()
        .map(|name| request.artifact_dir.join(name))
        .find(|path| path.is_file())
}

/// Build the backend selected by `kind`.
pub fn backend_for(kind: BackendKind, config: &RelayConfig) -> Result<Box<dyn Backend>> {
    Ok(match kind {
        BackendKind::Manual => Box::new(ManualBackend::console()),
        BackendKind::Command => {
            Box::new(CommandBackend::new(config.command_program()?.to_vec())?)
        }
    })
}

/// Prints the prompt and waits for a human to confirm the agent is done.
pub struct ManualBackend<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ManualBackend<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl ManualBackend<ConsoleInput, Stdout> {
    pub fn console() -> Self {
        Self::new(console_input(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> Backend for ManualBackend<R, W> {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn invoke(&mut self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        let out = &mut self.output;
        writeln!(out, "=== {} ({}) ===", request.role_name, request.stage)?;
        writeln!(out)?;
        writeln!(out, "{}", request.prompt)?;
        writeln!(out)?;
        let targets = concrete_writes(&request.writes);
        if !targets.is_empty() {
            writeln!(
                out,
                "Save the agent's output in {}: {}",
                request.artifact_dir.display(),
                targets.join(", ")
            )?;
        }
        write!(out, "Press Enter when the agent has finished... ")?;
        out.flush()?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("read confirmation")?;
        if read == 0 {
            return Err(anyhow!("input closed before the agent finished"));
        }
        Ok(InvokeOutcome {
            output_file: locate_output(request),
        })
    }
}

/// Pipes the prompt into an agent command line.
///
/// The child runs in the project root with `RELAY_STAGE`, `RELAY_ROLE`,
/// `RELAY_ARTIFACT_DIR` and `RELAY_OUTPUT` set. Its transcript is written to
/// the request's log path. Non-zero exit and timeout are errors.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: Vec<String>) -> Result<Self> {
        match program.first() {
            Some(first) if !first.trim().is_empty() => Ok(Self { program }),
            _ => Err(anyhow!("agent command must not be empty")),
        }
    }
}

impl Backend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    #[instrument(skip_all, fields(stage = %request.stage, role = %request.role_name))]
    fn invoke(&mut self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        let (program, args) = self
            .program
            .split_first()
            .ok_or_else(|| anyhow!("agent command must not be empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&request.workdir)
            .env("RELAY_STAGE", &request.stage)
            .env("RELAY_ROLE", &request.role_name)
            .env("RELAY_ARTIFACT_DIR", &request.artifact_dir);
        if let Some(primary) = concrete_writes(&request.writes).first() {
            cmd.env("RELAY_OUTPUT", request.artifact_dir.join(primary));
        }

        info!(program = %program, "invoking agent command");
        let output = run_with_deadline(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run agent command '{program}'"))?;

        write_atomic(&request.log_path, &output.transcript())?;

        if output.timed_out {
            return Err(anyhow!(
                "agent command '{program}' timed out after {}s (log: {})",
                request.timeout.as_secs(),
                request.log_path.display()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "agent command '{program}' failed with {} (log: {})\n{}",
                output.status,
                request.log_path.display(),
                output.stderr_tail(20)
            ));
        }
        Ok(InvokeOutcome {
            output_file: locate_output(request),
        })
    }
}

/// Log file name for one invocation: `<stage>-<n>.log`.
pub fn log_file_name(stage: &str, iteration: u32) -> String {
    format!("{stage}-{iteration}.log")
}

/// Remove invocation logs; used by `relay reset --clean`.
pub fn clear_logs(logs_dir: &Path) -> Result<()> {
    if logs_dir.is_dir() {
        fs::remove_dir_all(logs_dir)
            .with_context(|| format!("remove {}", logs_dir.display()))?;
    }
    Ok(())
}
