//! Transition logic over a (definition, run state) pair.

use chrono::Utc;

use super::error::ProtocolError;
use super::limits::applicable_limits;
use super::state::RunState;
use super::workflow::{Stage, StageKind, Transition, WorkflowDefinition};

/// Outcome of an advisory iteration-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitCheck {
    pub reached: bool,
    /// Human-readable description when `reached` is true.
    pub message: Option<String>,
}

impl LimitCheck {
    fn clear() -> Self {
        Self {
            reached: false,
            message: None,
        }
    }
}

/// Stage introspection and transition resolution for one workflow run.
///
/// Every query fails with [`ProtocolError::UnknownStage`] when the state
/// points at a stage the definition does not declare. Only [`Self::advance`]
/// mutates the state; persisting it is the caller's job.
#[derive(Debug)]
pub struct StateMachine<'a> {
    definition: &'a WorkflowDefinition,
    state: RunState,
}

impl<'a> StateMachine<'a> {
    pub fn new(definition: &'a WorkflowDefinition, state: RunState) -> Self {
        Self { definition, state }
    }

    /// Machine over a fresh state at the definition's initial stage.
    pub fn start(definition: &'a WorkflowDefinition) -> Self {
        Self::new(definition, RunState::new(definition.initial_stage()))
    }

    pub fn definition(&self) -> &'a WorkflowDefinition {
        self.definition
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    pub fn current_stage_name(&self) -> &str {
        self.state.stage()
    }

    pub fn current_stage(&self) -> Result<&'a Stage, ProtocolError> {
        self.definition
            .stage(self.state.stage())
            .ok_or_else(|| ProtocolError::UnknownStage {
                stage: self.state.stage().to_string(),
                known: self.definition.stage_names(),
            })
    }

    /// Role assigned to the current stage; `None` for terminal stages.
    pub fn current_role_name(&self) -> Result<Option<&'a str>, ProtocolError> {
        Ok(self.current_stage()?.agent.as_deref())
    }

    pub fn stage_kind(&self) -> Result<StageKind, ProtocolError> {
        Ok(self.current_stage()?.kind())
    }

    pub fn is_terminal(&self) -> Result<bool, ProtocolError> {
        Ok(self.current_stage()?.terminal)
    }

    pub fn is_branching(&self) -> Result<bool, ProtocolError> {
        Ok(matches!(
            self.current_stage()?.next,
            Some(Transition::Branching(_))
        ))
    }

    pub fn iteration_count(&self, stage: &str) -> u32 {
        self.state.iteration_count(stage)
    }

    /// Check the current stage's entry count against every applicable limit.
    ///
    /// Advisory only: the machine never refuses a transition because of it.
    /// Reports the first reached limit in label order.
    pub fn check_iteration_limit(&self) -> Result<LimitCheck, ProtocolError> {
        self.current_stage()?;
        let stage = self.state.stage();
        let count = self.iteration_count(stage);
        for (label, threshold) in applicable_limits(self.definition.limits(), stage) {
            if count >= threshold {
                return Ok(LimitCheck {
                    reached: true,
                    message: Some(format!(
                        "Iteration limit reached for '{stage}': {count}/{threshold} (limit: {label})"
                    )),
                });
            }
        }
        Ok(LimitCheck::clear())
    }

    /// First limit that applies to `stage`, as `(label, threshold)`.
    pub fn iteration_limit_for(&self, stage: &str) -> Option<(&'a str, u32)> {
        applicable_limits(self.definition.limits(), stage).next()
    }

    /// Target of the current stage's single outgoing edge.
    pub fn resolve_linear_transition(&self) -> Result<&'a str, ProtocolError> {
        let stage = self.current_stage()?;
        match &stage.next {
            Some(Transition::Linear(target)) => Ok(target.as_str()),
            Some(Transition::Branching(_)) => Err(ProtocolError::BranchingStage {
                stage: self.state.stage().to_string(),
            }),
            None => Err(ProtocolError::TerminalStage {
                stage: self.state.stage().to_string(),
            }),
        }
    }

    /// Target chosen by `verdict`, matched trimmed and case-insensitively.
    pub fn resolve_branching_transition(&self, verdict: &str) -> Result<&'a str, ProtocolError> {
        let stage = self.current_stage()?;
        let branches = match &stage.next {
            Some(Transition::Branching(branches)) => branches,
            Some(Transition::Linear(_)) => {
                return Err(ProtocolError::LinearStage {
                    stage: self.state.stage().to_string(),
                });
            }
            None => {
                return Err(ProtocolError::TerminalStage {
                    stage: self.state.stage().to_string(),
                });
            }
        };

        let wanted = verdict.trim().to_lowercase();
        branches
            .iter()
            .find(|(token, _)| token.trim().to_lowercase() == wanted)
            .map(|(_, target)| target.as_str())
            .ok_or_else(|| ProtocolError::UnmatchedVerdict {
                stage: self.state.stage().to_string(),
                verdict: verdict.to_string(),
                available: branches.keys().cloned().collect(),
            })
    }

    /// Verdict tokens accepted by the current branching stage.
    pub fn branch_tokens(&self) -> Result<Vec<&'a str>, ProtocolError> {
        match &self.current_stage()?.next {
            Some(Transition::Branching(branches)) => {
                Ok(branches.keys().map(String::as_str).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Move to `target`, crediting `actor`. Fails without mutating on unknown targets.
    pub fn advance(&mut self, target: &str, actor: &str) -> Result<(), ProtocolError> {
        if !self.definition.has_stage(target) {
            return Err(ProtocolError::UnknownTarget(target.to_string()));
        }
        self.state.enter(target, actor, Utc::now());
        Ok(())
    }
}
