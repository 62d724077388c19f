//! `relay status`: a read-only snapshot of where a workflow run stands.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::io::paths::WorkflowPaths;
use crate::io::state_store::load_run_state;
use crate::io::workflow_store::load_workflow;
use crate::protocol::{ProtocolError, StageKind, StateMachine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub workflow: String,
    pub stage: String,
    pub kind: StageKind,
    /// Active role; `None` once the run is complete.
    pub role: Option<String>,
    pub iteration_counts: BTreeMap<String, u32>,
    pub last_updated_by: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub limit_warning: Option<String>,
}

impl StatusReport {
    pub fn from_machine(machine: &StateMachine<'_>) -> Result<Self, ProtocolError> {
        let state = machine.state();
        Ok(Self {
            workflow: machine.definition().name().to_string(),
            stage: state.stage().to_string(),
            kind: machine.stage_kind()?,
            role: machine.current_role_name()?.map(str::to_string),
            iteration_counts: state.iteration_counts().clone(),
            last_updated_by: state.last_updated_by().map(str::to_string),
            last_updated_at: state.last_updated_at(),
            limit_warning: machine.check_iteration_limit()?.message,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.kind == StageKind::Terminal
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Workflow: {}", self.workflow),
            format!("Stage: {}", self.stage),
        ];
        match self.kind {
            StageKind::Terminal => lines.push("Status: DONE".to_string()),
            StageKind::Linear | StageKind::Branching => {
                lines.push(format!(
                    "Active Role: {}",
                    self.role.as_deref().unwrap_or("unknown")
                ));
                lines.push(if self.kind == StageKind::Branching {
                    "Type: Branching (verdict required)".to_string()
                } else {
                    "Type: Linear".to_string()
                });
            }
        }
        if !self.iteration_counts.is_empty() {
            let counts: Vec<String> = self
                .iteration_counts
                .iter()
                .map(|(stage, count)| format!("{stage}: {count}"))
                .collect();
            lines.push(format!("Iterations: {}", counts.join(", ")));
        }
        if let Some(actor) = &self.last_updated_by {
            lines.push(format!("Last Updated By: {actor}"));
        }
        if let Some(at) = &self.last_updated_at {
            lines.push(format!("Last Updated: {}", at.to_rfc3339()));
        }
        if let Some(warning) = &self.limit_warning {
            lines.push(format!("Warning: {warning}"));
        }
        lines.join("\n")
    }
}

/// Load the workflow and its state and summarize them.
pub fn workflow_status(paths: &WorkflowPaths) -> Result<StatusReport> {
    paths.ensure_exists()?;
    let definition = load_workflow(&paths.workflow_path)?;
    let state = load_run_state(&paths.state_path)?;
    let machine = StateMachine::new(&definition, state);
    Ok(StatusReport::from_machine(&machine)?)
}
