//! `relay` command-line entry point.
//!
//! Every command works on one workflow under the nearest `.relay/` directory,
//! chosen by `--workflow` or `default_workflow` in `.relay/relay.toml`.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use relay::exit_codes;
use relay::io::backend::backend_for;
use relay::io::config::{BackendKind, RelayConfig, load_config};
use relay::io::init::{InitOptions, Template, init_workflow, reset_workflow};
use relay::io::paths::{DEFAULT_WORKFLOW, RelayPaths, WorkflowPaths, validate_workflow_name};
use relay::logging;
use relay::looping::{LoopStop, run_loop};
use relay::status::workflow_status;
use relay::step::{
    ConsoleVerdictPrompt, IterationLimitError, NextPrompt, StepOptions, StepOutcome, Transitioned,
    advance_workflow, next_prompt, run_step,
};
use relay::validate::validate_workflow_dir;

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "File-based protocol for handing work between AI agents"
)]
struct Cli {
    /// Workflow to operate on (defaults to `default_workflow` in relay.toml).
    #[arg(short, long, global = true)]
    workflow: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a workflow under `.relay/workflows/<name>/`.
    Init {
        /// Workflow name (default: `default`).
        #[arg(short, long)]
        name: Option<String>,
        /// Built-in workflow shape.
        #[arg(short, long, value_enum, default_value_t = Template::Minimal)]
        template: Template,
        /// Overwrite an existing workflow's files.
        #[arg(short, long)]
        force: bool,
    },
    /// Show the current stage, active role and iteration counts.
    Status,
    /// Print the prompt for the agent that should act next.
    Next,
    /// Move to the next stage after an agent finished.
    Advance {
        /// Verdict for a branching stage (e.g. approve, reject).
        #[arg(short, long)]
        verdict: Option<String>,
    },
    /// Run the next agent through a backend, then advance.
    Run {
        /// Keep running until the workflow completes or a limit is hit.
        #[arg(long = "loop")]
        repeat: bool,
        /// Backend to use (overrides relay.toml).
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,
        /// Run stages that have reached their iteration limit.
        #[arg(long)]
        ignore_limits: bool,
    },
    /// Put the workflow back at its initial stage.
    Reset {
        /// Also delete generated artifacts and logs (context.md and
        /// acceptance_checklist.md are kept).
        #[arg(long)]
        clean: bool,
    },
    /// Check the workflow, its role files and its state for errors.
    Validate,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = env::current_dir().context("read current directory")?;

    let workflow = cli.workflow.as_deref();

    match cli.command {
        Command::Init {
            name,
            template,
            force,
        } => {
            let name = name
                .or_else(|| workflow.map(str::to_string))
                .unwrap_or_else(|| DEFAULT_WORKFLOW.to_string());
            cmd_init(&cwd, name, template, force)
        }
        Command::Status => {
            let (_, paths) = resolve_workflow(&cwd, workflow)?;
            cmd_status(&paths)
        }
        Command::Next => {
            let (config, paths) = resolve_workflow(&cwd, workflow)?;
            cmd_next(&paths, &config)
        }
        Command::Advance { verdict } => {
            let (_, paths) = resolve_workflow(&cwd, workflow)?;
            cmd_advance(&paths, verdict.as_deref())
        }
        Command::Run {
            repeat,
            backend,
            ignore_limits,
        } => {
            let (config, paths) = resolve_workflow(&cwd, workflow)?;
            let kind = backend.unwrap_or(config.backend);
            cmd_run(&paths, &config, kind, repeat, StepOptions { ignore_limits })
        }
        Command::Reset { clean } => {
            let (_, paths) = resolve_workflow(&cwd, workflow)?;
            cmd_reset(&paths, clean)
        }
        Command::Validate => {
            let (_, paths) = resolve_workflow(&cwd, workflow)?;
            cmd_validate(&paths)
        }
    }
}

/// Find the project's `.relay/`, load its config and pick the workflow.
fn resolve_workflow(cwd: &Path, workflow: Option<&str>) -> Result<(RelayConfig, WorkflowPaths)> {
    let relay = RelayPaths::discover(cwd);
    let config = load_config(&relay.config_path)?;
    let name = workflow.unwrap_or(&config.default_workflow);
    validate_workflow_name(name)?;
    let paths = relay.workflow(name);
    Ok((config, paths))
}

fn cmd_init(root: &Path, name: String, template: Template, force: bool) -> Result<i32> {
    let paths = init_workflow(
        root,
        &InitOptions {
            name,
            template,
            force,
        },
    )?;
    println!("Workflow '{}' initialized at {}", paths.name, paths.dir.display());
    println!("Next: run `relay status` to see the current state");
    Ok(exit_codes::OK)
}

fn cmd_status(paths: &WorkflowPaths) -> Result<i32> {
    let report = workflow_status(paths)?;
    println!("{}", report.render());
    Ok(exit_codes::OK)
}

fn cmd_next(paths: &WorkflowPaths, config: &RelayConfig) -> Result<i32> {
    match next_prompt(paths, config)? {
        NextPrompt::Complete => println!("Workflow is complete. Nothing to do."),
        NextPrompt::Prompt {
            stage,
            role,
            prompt,
        } => {
            println!("=== Prompt for: {role} (stage: {stage}) ===\n");
            println!("{prompt}");
            println!("\nAfter the agent finishes, run `relay advance` to move to the next stage.");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_advance(paths: &WorkflowPaths, verdict: Option<&str>) -> Result<i32> {
    let mut verdicts = ConsoleVerdictPrompt::stdio();
    match advance_workflow(paths, verdict, &mut verdicts)? {
        StepOutcome::AlreadyComplete => println!("Workflow is already complete."),
        StepOutcome::Advanced(step) => print_transition(&step),
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    paths: &WorkflowPaths,
    config: &RelayConfig,
    kind: BackendKind,
    repeat: bool,
    options: StepOptions,
) -> Result<i32> {
    paths.ensure_exists()?;
    let mut backend = backend_for(kind, config)?;
    let mut verdicts = ConsoleVerdictPrompt::stdio();

    if repeat {
        let outcome = run_loop(
            paths,
            config,
            backend.as_mut(),
            &mut verdicts,
            options,
            print_transition,
        )?;
        return Ok(match outcome.stop {
            LoopStop::Complete => {
                println!("Workflow complete after {} step(s).", outcome.steps.len());
                exit_codes::OK
            }
            LoopStop::LimitReached { message, .. } => {
                println!("Warning: {message}");
                println!("Stopping loop due to iteration limit.");
                exit_codes::LIMIT_REACHED
            }
            LoopStop::StepBudgetExhausted { max_steps } => {
                println!("Stopped after {max_steps} step(s) (max_loop_steps).");
                exit_codes::LIMIT_REACHED
            }
        });
    }

    match run_step(paths, config, backend.as_mut(), &mut verdicts, options) {
        Ok(StepOutcome::AlreadyComplete) => println!("Workflow is already complete."),
        Ok(StepOutcome::Advanced(step)) => print_transition(&step),
        Err(err) => {
            if let Some(limit) = err.downcast_ref::<IterationLimitError>() {
                println!("Warning: {}", limit.message);
                println!("Re-run with --ignore-limits to continue anyway.");
                return Ok(exit_codes::LIMIT_REACHED);
            }
            return Err(err);
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_reset(paths: &WorkflowPaths, clean: bool) -> Result<i32> {
    let outcome = reset_workflow(paths, clean)?;
    if clean {
        println!(
            "Workflow reset to '{}' ({} artifact(s) removed).",
            outcome.initial_stage,
            outcome.removed.len()
        );
    } else {
        println!("Workflow reset to initial stage '{}'.", outcome.initial_stage);
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(paths: &WorkflowPaths) -> Result<i32> {
    let errors = validate_workflow_dir(paths);
    if errors.is_empty() {
        println!("Workflow is valid.");
        return Ok(exit_codes::OK);
    }
    println!("Found {} error(s):", errors.len());
    for err in &errors {
        println!("  • {err}");
    }
    Ok(exit_codes::INVALID)
}

fn print_transition(step: &Transitioned) {
    match &step.verdict {
        Some((verdict, source)) => println!(
            "Advanced: {} → {} (verdict: {verdict}, {source:?})",
            step.actor, step.to
        ),
        None => println!("Advanced: {} → {}", step.actor, step.to),
    }
    if step.complete {
        println!("Workflow complete!");
    } else if let Some(role) = &step.next_role {
        println!("Next agent: {role}. Run `relay next` to see the prompt.");
    }
}
