//! Multi-step driver for `relay run --loop`.

use anyhow::Result;
use tracing::{info, warn};

use crate::io::backend::Backend;
use crate::io::config::RelayConfig;
use crate::io::paths::WorkflowPaths;
use crate::step::{
    IterationLimitError, StepOptions, StepOutcome, Transitioned, VerdictPrompt, run_step,
};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// A terminal stage was reached.
    Complete,
    /// The current stage hit an iteration limit.
    LimitReached { stage: String, message: String },
    /// `max_loop_steps` steps ran without reaching a terminal stage.
    StepBudgetExhausted { max_steps: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub steps: Vec<Transitioned>,
    pub stop: LoopStop,
}

/// Run steps until the workflow completes, a limit is hit, or the step budget
/// runs out.
///
/// Any other error (backend failure, bad verdict, invalid files) stops the loop
/// immediately; transitions already made stay persisted.
pub fn run_loop<B, P, F>(
    paths: &WorkflowPaths,
    config: &RelayConfig,
    backend: &mut B,
    verdicts: &mut P,
    options: StepOptions,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    B: Backend + ?Sized,
    P: VerdictPrompt + ?Sized,
    F: FnMut(&Transitioned),
{
    let mut steps = Vec::new();
    while steps.len() < config.max_loop_steps as usize {
        let outcome = match run_step(paths, config, backend, verdicts, options) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(limit) = err.downcast_ref::<IterationLimitError>() {
                    info!(stage = %limit.stage, "loop stopped at iteration limit");
                    return Ok(LoopOutcome {
                        steps,
                        stop: LoopStop::LimitReached {
                            stage: limit.stage.clone(),
                            message: limit.message.clone(),
                        },
                    });
                }
                return Err(err);
            }
        };
        match outcome {
            StepOutcome::AlreadyComplete => {
                return Ok(LoopOutcome {
                    steps,
                    stop: LoopStop::Complete,
                });
            }
            StepOutcome::Advanced(step) => {
                on_step(&step);
                let complete = step.complete;
                steps.push(step);
                if complete {
                    return Ok(LoopOutcome {
                        steps,
                        stop: LoopStop::Complete,
                    });
                }
            }
        }
    }
    warn!(max_steps = config.max_loop_steps, "loop step budget exhausted");
    Ok(LoopOutcome {
        steps,
        stop: LoopStop::StepBudgetExhausted {
            max_steps: config.max_loop_steps,
        },
    })
}
