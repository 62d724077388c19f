//! Test-only helpers: canned workflow documents, temp workspaces, scripted agents.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::backend::{Backend, InvokeOutcome, InvokeRequest, locate_output};
use crate::io::init::{InitOptions, Template, init_workflow};
use crate::io::paths::{RelayPaths, WorkflowPaths};
use crate::io::state_store::load_run_state;
use crate::protocol::{RoleRef, RunState, Stage, WorkflowDocument};
use crate::step::VerdictPrompt;

/// Build a role entry with deterministic fields.
pub fn role_ref(description: &str, writes: &[&str], reads: &[&str], rules: &str) -> RoleRef {
    RoleRef {
        description: description.to_string(),
        writes: writes.iter().map(|s| s.to_string()).collect(),
        reads: reads.iter().map(|s| s.to_string()).collect(),
        rules: rules.to_string(),
    }
}

/// `working` (worker) -> `done`, no limits.
pub fn linear_document() -> WorkflowDocument {
    WorkflowDocument {
        name: "linear".to_string(),
        version: 1,
        roles: BTreeMap::from([(
            "worker".to_string(),
            role_ref("Does the work", &["output.md"], &[], "roles/worker.yml"),
        )]),
        stages: BTreeMap::from([
            ("working".to_string(), Stage::linear("worker", "done")),
            ("done".to_string(), Stage::terminal()),
        ]),
        initial_stage: "working".to_string(),
        limits: BTreeMap::new(),
    }
}

/// `drafting` -> `review` -> {approve: `done`, reject: `drafting`}, with
/// `max_drafting: 2`.
pub fn review_document() -> WorkflowDocument {
    WorkflowDocument {
        name: "review".to_string(),
        version: 1,
        roles: BTreeMap::from([
            (
                "drafter".to_string(),
                role_ref(
                    "Writes drafts",
                    &["draft.md"],
                    &["context.md"],
                    "roles/drafter.yml",
                ),
            ),
            (
                "reviewer".to_string(),
                role_ref(
                    "Reviews drafts",
                    &["review.md"],
                    &["draft.md"],
                    "roles/reviewer.yml",
                ),
            ),
        ]),
        stages: BTreeMap::from([
            ("drafting".to_string(), Stage::linear("drafter", "review")),
            (
                "review".to_string(),
                Stage::branching("reviewer", &[("approve", "done"), ("reject", "drafting")]),
            ),
            ("done".to_string(), Stage::terminal()),
        ]),
        initial_stage: "drafting".to_string(),
        limits: BTreeMap::from([("max_drafting".to_string(), 2)]),
    }
}

/// A temp directory holding an initialized `.relay/` workflow.
pub struct TestWorkspace {
    temp: TempDir,
    paths: WorkflowPaths,
}

impl TestWorkspace {
    pub fn new(template: Template) -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let paths = init_workflow(
            temp.path(),
            &InitOptions {
                name: "default".to_string(),
                template,
                force: false,
            },
        )?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn relay_paths(&self) -> RelayPaths {
        RelayPaths::new(self.temp.path())
    }

    pub fn paths(&self) -> &WorkflowPaths {
        &self.paths
    }

    pub fn write_artifact(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.paths.artifacts_dir.join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read_artifact(&self, name: &str) -> Result<String> {
        let path = self.paths.artifacts_dir.join(name);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn state(&self) -> Result<RunState> {
        load_run_state(&self.paths.state_path)
    }
}

/// One scripted agent turn: files written into the artifact directory.
pub type ScriptedTurn = Vec<(String, String)>;

/// Backend that replays canned outputs instead of running an agent.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    turns: VecDeque<ScriptedTurn>,
    /// `(stage, role)` for every invocation, in order.
    pub invocations: Vec<(String, String)>,
    /// Prompts received, in order.
    pub prompts: Vec<String>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: turns.into(),
            ..Self::default()
        }
    }
}

/// Shorthand for a turn that writes a single file.
pub fn turn(file: &str, contents: &str) -> ScriptedTurn {
    vec![(file.to_string(), contents.to_string())]
}

impl Backend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn invoke(&mut self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        self.invocations
            .push((request.stage.clone(), request.role_name.clone()));
        self.prompts.push(request.prompt.clone());
        let files = self
            .turns
            .pop_front()
            .ok_or_else(|| anyhow!("scripted backend exhausted at stage '{}'", request.stage))?;
        for (name, contents) in files {
            let path = request.artifact_dir.join(&name);
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(InvokeOutcome {
            output_file: locate_output(request),
        })
    }
}

/// Verdict prompt that answers from a queue and records what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedVerdicts {
    answers: VecDeque<String>,
    /// `(stage, offered tokens)` per question.
    pub asked: Vec<(String, Vec<String>)>,
}

impl ScriptedVerdicts {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|s| s.to_string()).collect(),
            asked: Vec::new(),
        }
    }
}

impl VerdictPrompt for ScriptedVerdicts {
    fn choose(&mut self, stage: &str, branches: &[&str]) -> Result<String> {
        self.asked.push((
            stage.to_string(),
            branches.iter().map(|s| s.to_string()).collect(),
        ));
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted verdict left for stage '{stage}'"))
    }
}
