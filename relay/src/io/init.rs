//! Scaffolding for new workflows under `.relay/workflows/<name>/`, and reset.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::artifacts::{PRESERVED_INPUTS, clean_artifacts};
use super::backend::clear_logs;
use super::config::{RelayConfig, write_config};
use super::paths::{RelayPaths, WorkflowPaths, validate_workflow_name};
use super::state_store::write_run_state;
use super::workflow_store::{load_workflow, write_role, write_workflow};
use super::write_atomic;
use crate::protocol::{RoleDocument, RoleRef, RunState, Stage, WorkflowDocument};

/// Built-in workflow shapes for `relay init --template`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Template {
    /// One worker stage, then done.
    #[default]
    Minimal,
    /// Drafter and reviewer looping until the reviewer approves.
    Review,
}

/// Options for `init_workflow`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub name: String,
    pub template: Template,
    /// If true, overwrite an existing workflow directory's files.
    pub force: bool,
}

/// Files a template writes, relative to the workflow directory.
struct Scaffold {
    workflow: WorkflowDocument,
    roles: Vec<(String, RoleDocument)>,
    artifacts: Vec<(&'static str, &'static str)>,
}

/// Create a workflow from `options.template` under `root/.relay/`.
///
/// Writes `workflow.yml`, role files, seed artifacts and a fresh `state.yml`,
/// plus `relay.toml` if the project has none yet.
pub fn init_workflow(root: &Path, options: &InitOptions) -> Result<WorkflowPaths> {
    validate_workflow_name(&options.name)?;
    let relay = RelayPaths::new(root);
    let paths = relay.workflow(&options.name);

    if paths.dir.exists() && !options.force {
        return Err(anyhow!(
            "workflow '{}' already exists at {} (use --force to overwrite)",
            options.name,
            paths.dir.display()
        ));
    }

    for dir in [&paths.dir, &paths.roles_dir, &paths.artifacts_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let scaffold = scaffold(options.template, &options.name);
    write_workflow(&paths.workflow_path, &scaffold.workflow)?;
    for (rules, role) in &scaffold.roles {
        write_role(&paths.rules_path(rules), role)?;
    }
    for (name, contents) in scaffold.artifacts {
        let path = paths.artifacts_dir.join(name);
        if options.force || !path.exists() {
            write_atomic(&path, contents)?;
        }
    }

    // Written files go back through the full loader before state exists.
    let definition = load_workflow(&paths.workflow_path)?;
    write_run_state(&paths.state_path, &RunState::new(definition.initial_stage()))?;

    if !relay.config_path.exists() {
        let config = RelayConfig {
            default_workflow: options.name.clone(),
            ..RelayConfig::default()
        };
        write_config(&relay.config_path, &config)?;
    }

    info!(workflow = %options.name, template = ?options.template, "workflow initialized");
    Ok(paths)
}

/// Result of `reset_workflow`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    pub initial_stage: String,
    /// Artifacts deleted by `clean`.
    pub removed: Vec<PathBuf>,
}

/// Put the run back at the initial stage; with `clean`, also wipe generated
/// artifacts (human inputs are kept) and invocation logs.
pub fn reset_workflow(paths: &WorkflowPaths, clean: bool) -> Result<ResetOutcome> {
    paths.ensure_exists()?;
    let definition = load_workflow(&paths.workflow_path)?;
    write_run_state(&paths.state_path, &RunState::new(definition.initial_stage()))?;

    let removed = if clean {
        clear_logs(&paths.logs_dir)?;
        clean_artifacts(&paths.artifacts_dir, PRESERVED_INPUTS)?
    } else {
        Vec::new()
    };
    info!(workflow = %paths.name, clean, removed = removed.len(), "workflow reset");
    Ok(ResetOutcome {
        initial_stage: definition.initial_stage().to_string(),
        removed,
    })
}

fn scaffold(template: Template, name: &str) -> Scaffold {
    match template {
        Template::Minimal => minimal_scaffold(name),
        Template::Review => review_scaffold(name),
    }
}

fn role(description: &str, writes: &[&str], reads: &[&str], rules: &str) -> RoleRef {
    RoleRef {
        description: description.to_string(),
        writes: writes.iter().map(|s| s.to_string()).collect(),
        reads: reads.iter().map(|s| s.to_string()).collect(),
        rules: rules.to_string(),
    }
}

fn minimal_scaffold(name: &str) -> Scaffold {
    Scaffold {
        workflow: WorkflowDocument {
            name: name.to_string(),
            version: 1,
            roles: BTreeMap::from([(
                "worker".to_string(),
                role(
                    "Executes the task",
                    &["output.md"],
                    &["context.md"],
                    "roles/worker.yml",
                ),
            )]),
            stages: BTreeMap::from([
                ("working".to_string(), Stage::linear("worker", "done")),
                ("done".to_string(), Stage::terminal()),
            ]),
            initial_stage: "working".to_string(),
            limits: BTreeMap::new(),
        },
        roles: vec![(
            "roles/worker.yml".to_string(),
            RoleDocument {
                name: "worker".to_string(),
                system_prompt:
                    "You are a helpful assistant. Complete the task described in context.md."
                        .to_string(),
                ..RoleDocument::default()
            },
        )],
        artifacts: vec![("context.md", "# Context\n\nDescribe your task here.\n")],
    }
}

fn review_scaffold(name: &str) -> Scaffold {
    Scaffold {
        workflow: WorkflowDocument {
            name: name.to_string(),
            version: 1,
            roles: BTreeMap::from([
                (
                    "drafter".to_string(),
                    role(
                        "Writes and revises the draft",
                        &["draft.md"],
                        &["context.md", "review.md"],
                        "roles/drafter.yml",
                    ),
                ),
                (
                    "reviewer".to_string(),
                    role(
                        "Reviews the draft and decides whether it is ready",
                        &["review.md"],
                        &["context.md", "draft.md"],
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
            limits: BTreeMap::from([("max_drafting_iterations".to_string(), 3)]),
        },
        roles: vec![
            (
                "roles/drafter.yml".to_string(),
                RoleDocument {
                    name: "drafter".to_string(),
                    system_prompt: "Write the deliverable described in context.md. If review.md \
                                    exists, address every point it raises."
                        .to_string(),
                    ..RoleDocument::default()
                },
            ),
            (
                "roles/reviewer.yml".to_string(),
                RoleDocument {
                    name: "reviewer".to_string(),
                    system_prompt: "Review draft.md against context.md. Be specific about what \
                                    must change before it can ship."
                        .to_string(),
                    output_format: Some(
                        "# Review\n\n## Findings\n- ...\n\n## Verdict: APPROVE | REQUEST_CHANGES"
                            .to_string(),
                    ),
                    verdict_field: Some("Verdict".to_string()),
                    approve_value: Some("APPROVE".to_string()),
                    reject_value: Some("REQUEST_CHANGES".to_string()),
                },
            ),
        ],
        artifacts: vec![(
            "context.md",
            "# Context\n\nDescribe the deliverable and what a good result looks like.\n",
        )],
    }
}
