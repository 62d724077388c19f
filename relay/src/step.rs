//! Orchestration for a single workflow step.
//!
//! `relay run` invokes the current stage's agent, then resolves and persists
//! the transition. `relay advance` does only the second half, after an agent
//! was run by hand. Branch verdicts come from, in order: an explicit
//! `--verdict`, the agent's output files, or a [`VerdictPrompt`].

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, Stdout, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::artifacts::concrete_writes;
use crate::io::backend::{Backend, InvokeRequest, log_file_name};
use crate::io::config::RelayConfig;
use crate::io::paths::WorkflowPaths;
use crate::io::prompt::compose_prompt;
use crate::io::state_store::{load_run_state, write_run_state};
use crate::io::workflow_store::{load_role, load_workflow};
use crate::io::{ConsoleInput, console_input};
use crate::protocol::{RoleSpec, RunState, StateMachine, WorkflowDefinition, extract_with_rule};

/// Asks someone to pick a branch when no verdict could be detected.
pub trait VerdictPrompt {
    /// Return a verdict token for `stage`; `branches` are its accepted tokens.
    fn choose(&mut self, stage: &str, branches: &[&str]) -> Result<String>;
}

/// Interactive [`VerdictPrompt`] over a reader/writer pair.
///
/// Accepts a full token or, when unambiguous, its first letter.
pub struct ConsoleVerdictPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleVerdictPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl ConsoleVerdictPrompt<ConsoleInput, Stdout> {
    pub fn stdio() -> Self {
        Self::new(console_input(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> VerdictPrompt for ConsoleVerdictPrompt<R, W> {
    fn choose(&mut self, stage: &str, branches: &[&str]) -> Result<String> {
        writeln!(
            self.output,
            "Could not detect a verdict for stage '{stage}'. Choose manually:"
        )?;
        for branch in branches {
            let key = branch.chars().next().unwrap_or('?');
            writeln!(self.output, "  [{key}] {branch}")?;
        }
        write!(self.output, "Verdict: ")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line).context("read verdict")? == 0 {
            return Err(anyhow!("no verdict given for stage '{stage}'"));
        }
        let answer = line.trim().to_lowercase();
        let single_letter = answer.chars().count() == 1;
        let mut by_initial = branches
            .iter()
            .filter(|branch| single_letter && branch.to_lowercase().starts_with(&answer));
        match (by_initial.next(), by_initial.next()) {
            (Some(branch), None) => Ok(branch.to_string()),
            _ => Ok(answer),
        }
    }
}

/// Where a branch verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Explicit,
    Extracted,
    Prompted,
}

/// A persisted stage transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitioned {
    pub from: String,
    pub to: String,
    /// Role credited with the transition.
    pub actor: String,
    /// Verdict token and its source; `None` for linear stages.
    pub verdict: Option<(String, VerdictSource)>,
    /// Role assigned to the new stage; `None` if it is terminal.
    pub next_role: Option<String>,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The run was already at a terminal stage; nothing was done.
    AlreadyComplete,
    Advanced(Transitioned),
}

/// The current stage reached an iteration limit and the step was not run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct IterationLimitError {
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOptions {
    /// Run the agent even if the stage reached an iteration limit.
    pub ignore_limits: bool,
}

/// What `relay next` shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPrompt {
    Complete,
    Prompt { stage: String, role: String, prompt: String },
}

/// Render the prompt for the current stage's agent without running anything.
pub fn next_prompt(paths: &WorkflowPaths, config: &RelayConfig) -> Result<NextPrompt> {
    let loaded = Loaded::load(paths)?;
    let machine = loaded.machine()?;
    if machine.is_terminal()? {
        return Ok(NextPrompt::Complete);
    }
    let role_name = active_role(&machine)?;
    let role = load_role(paths, &loaded.definition, role_name)?;
    let prompt = compose_prompt(
        &machine,
        &role,
        &paths.artifacts_dir,
        config.max_artifact_chars,
    )?;
    Ok(NextPrompt::Prompt {
        stage: machine.current_stage_name().to_string(),
        role: role_name.to_string(),
        prompt,
    })
}

/// Invoke the current stage's agent through `backend`, then advance.
///
/// Fails with [`IterationLimitError`] before invoking anything when the stage
/// reached a limit, unless `options.ignore_limits` is set. Verdicts are only
/// read from outputs the agent created or changed during this step; otherwise
/// `verdicts` is asked.
#[instrument(skip_all, fields(workflow = %paths.name, backend = backend.name()))]
pub fn run_step<B, P>(
    paths: &WorkflowPaths,
    config: &RelayConfig,
    backend: &mut B,
    verdicts: &mut P,
    options: StepOptions,
) -> Result<StepOutcome>
where
    B: Backend + ?Sized,
    P: VerdictPrompt + ?Sized,
{
    let loaded = Loaded::load(paths)?;
    let machine = loaded.machine()?;
    if machine.is_terminal()? {
        return Ok(StepOutcome::AlreadyComplete);
    }

    let stage = machine.current_stage_name().to_string();
    let limit = machine.check_iteration_limit()?;
    if limit.reached {
        let message = limit.message.unwrap_or_default();
        if !options.ignore_limits {
            return Err(IterationLimitError { stage, message }.into());
        }
        warn!(%stage, %message, "iteration limit reached, continuing");
    }

    let role_name = active_role(&machine)?;
    let role = load_role(paths, &loaded.definition, role_name)?;
    let writes = loaded
        .definition
        .role(role_name)
        .map(|role_ref| role_ref.writes.clone())
        .unwrap_or_default();

    fs::create_dir_all(&paths.artifacts_dir)
        .with_context(|| format!("create {}", paths.artifacts_dir.display()))?;
    let before: Vec<(PathBuf, Option<FileStamp>)> = output_paths(paths, &writes)
        .into_iter()
        .map(|path| {
            let stamp = FileStamp::read(&path);
            (path, stamp)
        })
        .collect();
    let prompt = compose_prompt(
        &machine,
        &role,
        &paths.artifacts_dir,
        config.max_artifact_chars,
    )?;
    let request = InvokeRequest {
        log_path: paths
            .logs_dir
            .join(log_file_name(&stage, machine.iteration_count(&stage))),
        stage: stage.clone(),
        role_name: role_name.to_string(),
        prompt,
        writes,
        artifact_dir: paths.artifacts_dir.clone(),
        workdir: paths.root.clone(),
        timeout: Duration::from_secs(config.agent_timeout_secs),
        output_limit_bytes: config.output_limit_bytes,
    };

    info!(%stage, role = role_name, "invoking agent");
    let outcome = backend
        .invoke(&request)
        .with_context(|| format!("{} backend failed for role '{role_name}'", backend.name()))?;

    // Only files this invocation wrote can carry this round's verdict.
    let mut candidates: Vec<PathBuf> = outcome.output_file.into_iter().collect();
    for (path, _) in &before {
        if !candidates.contains(path) {
            candidates.push(path.clone());
        }
    }
    candidates.retain(|path| {
        let fresh = written_since(path, &before);
        if !fresh && path.is_file() {
            debug!(path = %path.display(), "output unchanged by agent, ignoring");
        }
        fresh
    });
    let resolution = resolve(&machine, Some(&role), &candidates, None, verdicts)?;
    commit(paths, machine, role_name, resolution)
}

/// Advance after an agent finished outside relay.
#[instrument(skip_all, fields(workflow = %paths.name))]
pub fn advance_workflow<P>(
    paths: &WorkflowPaths,
    explicit_verdict: Option<&str>,
    verdicts: &mut P,
) -> Result<StepOutcome>
where
    P: VerdictPrompt + ?Sized,
{
    let loaded = Loaded::load(paths)?;
    let machine = loaded.machine()?;
    if machine.is_terminal()? {
        return Ok(StepOutcome::AlreadyComplete);
    }
    let role_name = active_role(&machine)?;

    // The role file only matters when a verdict has to be read from output.
    let needs_extraction = machine.is_branching()? && explicit_verdict.is_none();
    let role = if needs_extraction {
        Some(load_role(paths, &loaded.definition, role_name)?)
    } else {
        None
    };
    let writes = loaded
        .definition
        .role(role_name)
        .map(|role_ref| role_ref.writes.as_slice())
        .unwrap_or_default();
    let candidates = output_paths(paths, writes);

    let resolution = resolve(&machine, role.as_ref(), &candidates, explicit_verdict, verdicts)?;
    commit(paths, machine, role_name, resolution)
}

/// Definition and state read fresh from disk for one command.
struct Loaded {
    definition: WorkflowDefinition,
    state: RunState,
}

impl Loaded {
    fn load(paths: &WorkflowPaths) -> Result<Self> {
        paths.ensure_exists()?;
        Ok(Self {
            definition: load_workflow(&paths.workflow_path)?,
            state: load_run_state(&paths.state_path)?,
        })
    }

    fn machine(&self) -> Result<StateMachine<'_>> {
        let machine = StateMachine::new(&self.definition, self.state.clone());
        machine.current_stage()?;
        Ok(machine)
    }
}

fn active_role<'a>(machine: &StateMachine<'a>) -> Result<&'a str> {
    machine.current_role_name()?.ok_or_else(|| {
        anyhow!(
            "stage '{}' has no agent assigned",
            machine.current_stage_name()
        )
    })
}

fn output_paths(paths: &WorkflowPaths, writes: &[String]) -> Vec<PathBuf> {
    concrete_writes(writes)
        .into_iter()
        .map(|name| paths.artifacts_dir.join(name))
        .collect()
}

/// Identity of a file's contents at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    hash: u64,
}

impl FileStamp {
    /// `None` if the file does not exist or cannot be read.
    fn read(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        let bytes = fs::read(path).ok()?;
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            hash: hasher.finish(),
        })
    }
}

/// True if `path` exists now and was created or changed after `before` was taken.
///
/// Paths missing from `before` count as new.
fn written_since(path: &Path, before: &[(PathBuf, Option<FileStamp>)]) -> bool {
    let Some(now) = FileStamp::read(path) else {
        return false;
    };
    before
        .iter()
        .find(|(seen, _)| seen == path)
        .is_none_or(|(_, stamp)| stamp.as_ref() != Some(&now))
}

struct Resolution {
    target: String,
    verdict: Option<(String, VerdictSource)>,
}

fn resolve<P: VerdictPrompt + ?Sized>(
    machine: &StateMachine<'_>,
    role: Option<&RoleSpec>,
    candidates: &[PathBuf],
    explicit_verdict: Option<&str>,
    verdicts: &mut P,
) -> Result<Resolution> {
    if !machine.is_branching()? {
        return Ok(Resolution {
            target: machine.resolve_linear_transition()?.to_string(),
            verdict: None,
        });
    }

    let (verdict, source) = match explicit_verdict {
        Some(verdict) => (verdict.to_string(), VerdictSource::Explicit),
        None => match extract_from_outputs(machine, role, candidates)? {
            Some(token) => (token, VerdictSource::Extracted),
            None => {
                let branches = machine.branch_tokens()?;
                let chosen = verdicts.choose(machine.current_stage_name(), &branches)?;
                (chosen, VerdictSource::Prompted)
            }
        },
    };
    let target = machine.resolve_branching_transition(&verdict)?;
    Ok(Resolution {
        target: target.to_string(),
        verdict: Some((verdict.trim().to_lowercase(), source)),
    })
}

/// First verdict found in `candidates` that names a branch of the current stage.
fn extract_from_outputs(
    machine: &StateMachine<'_>,
    role: Option<&RoleSpec>,
    candidates: &[PathBuf],
) -> Result<Option<String>> {
    let Some(rule) = role.and_then(RoleSpec::verdict) else {
        return Ok(None);
    };
    for path in candidates.iter().filter(|path| path.is_file()) {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read output {}", path.display()))?;
        match extract_with_rule(&content, rule).token() {
            Some(token) if machine.resolve_branching_transition(token).is_ok() => {
                debug!(path = %path.display(), token, "verdict extracted");
                return Ok(Some(token.to_string()));
            }
            Some(token) => {
                warn!(path = %path.display(), token, "extracted verdict names no branch");
            }
            None => debug!(path = %path.display(), "no verdict in output"),
        }
    }
    Ok(None)
}

fn commit(
    paths: &WorkflowPaths,
    mut machine: StateMachine<'_>,
    actor: &str,
    resolution: Resolution,
) -> Result<StepOutcome> {
    let from = machine.current_stage_name().to_string();
    machine.advance(&resolution.target, actor)?;
    write_run_state(&paths.state_path, machine.state())?;

    let next = machine.current_stage()?;
    info!(%from, to = %resolution.target, actor, "advanced");
    Ok(StepOutcome::Advanced(Transitioned {
        from,
        to: resolution.target,
        actor: actor.to_string(),
        verdict: resolution.verdict,
        next_role: next.agent.clone(),
        complete: next.terminal,
    }))
}
