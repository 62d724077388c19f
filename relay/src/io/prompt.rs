//! Prompt assembly for the agent at the current stage.

use std::path::Path;

use anyhow::{Result, anyhow};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

use super::artifacts::{Artifact, concrete_writes, read_artifacts};
use crate::protocol::{RoleSpec, StateMachine, VerdictRule};

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");

/// Everything the agent template renders.
#[derive(Debug, Clone, Serialize)]
pub struct PromptInputs {
    pub role_name: String,
    /// From the workflow's role entry; absent if the role is undeclared.
    pub role_description: Option<String>,
    pub system_prompt: String,
    pub stage: String,
    pub iteration: u32,
    pub iteration_limit: Option<u32>,
    pub artifacts: Vec<Artifact>,
    pub primary_output: Option<String>,
    pub additional_outputs: Vec<String>,
    pub output_format: Option<String>,
    pub verdict: Option<VerdictRule>,
}

impl PromptInputs {
    /// Collect inputs for `role` at the machine's current stage.
    pub fn gather(
        machine: &StateMachine<'_>,
        role: &RoleSpec,
        artifact_dir: &Path,
        max_artifact_chars: usize,
    ) -> Result<Self> {
        let stage = machine.current_stage_name().to_string();
        let role_ref = machine
            .current_role_name()?
            .and_then(|name| machine.definition().role(name));

        let (reads, writes) = match role_ref {
            Some(role_ref) => (role_ref.reads.as_slice(), role_ref.writes.as_slice()),
            None => (&[][..], &[][..]),
        };
        let artifacts = read_artifacts(artifact_dir, reads, max_artifact_chars)?;
        let mut outputs = concrete_writes(writes).into_iter().map(str::to_string);
        let primary_output = outputs.next();
        let additional_outputs: Vec<String> = outputs.collect();

        let iteration = machine.iteration_count(&stage);
        let iteration_limit = machine
            .iteration_limit_for(&stage)
            .map(|(_, threshold)| threshold);

        Ok(Self {
            role_name: role.name().to_string(),
            role_description: role_ref.map(|r| r.description.clone()),
            system_prompt: role.system_prompt().trim().to_string(),
            stage,
            iteration,
            iteration_limit,
            artifacts,
            primary_output,
            additional_outputs,
            output_format: role.output_format().map(|f| f.trim().to_string()),
            verdict: role.verdict().cloned(),
        })
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("agent", AGENT_TEMPLATE)
            .map_err(|err| anyhow!("agent template: {err}"))?;
        Ok(Self { env })
    }

    fn render(&self, inputs: &PromptInputs) -> Result<String> {
        let template = self.env.get_template("agent")?;
        Ok(template.render(inputs)?)
    }
}

/// Render the agent prompt from already gathered inputs.
pub fn render_prompt(inputs: &PromptInputs) -> Result<String> {
    let rendered = PromptEngine::new()?.render(inputs)?;
    debug!(
        stage = %inputs.stage,
        role = %inputs.role_name,
        artifacts = inputs.artifacts.len(),
        bytes = rendered.len(),
        "prompt rendered"
    );
    Ok(rendered)
}

/// Gather and render the prompt for `role` at the machine's current stage.
pub fn compose_prompt(
    machine: &StateMachine<'_>,
    role: &RoleSpec,
    artifact_dir: &Path,
    max_artifact_chars: usize,
) -> Result<String> {
    let inputs = PromptInputs::gather(machine, role, artifact_dir, max_artifact_chars)?;
    render_prompt(&inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::protocol::{RoleDocument, WorkflowDefinition};
    use crate::test_support::review_document;

    fn reviewer() -> RoleSpec {
        RoleSpec::from_document(RoleDocument {
            name: "reviewer".to_string(),
            system_prompt: "  Review the draft carefully.\n".to_string(),
            output_format: Some("# Review\n## Verdict: ...".to_string()),
            verdict_field: Some("Verdict".to_string()),
            approve_value: Some("APPROVE".to_string()),
            reject_value: Some("REQUEST_CHANGES".to_string()),
        })
        .expect("valid role")
    }

    fn drafter() -> RoleSpec {
        RoleSpec::from_document(RoleDocument {
            name: "drafter".to_string(),
            system_prompt: "Write the draft.".to_string(),
            ..RoleDocument::default()
        })
        .expect("valid role")
    }

    #[test]
    fn reviewer_prompt_has_every_section() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("draft.md"), "The draft body.").expect("write");
        let definition = WorkflowDefinition::from_document(review_document()).expect("valid");
        let mut machine = StateMachine::start(&definition);
        machine.advance("review", "drafter").expect("advance");

        let prompt = compose_prompt(&machine, &reviewer(), temp.path(), 1_000).expect("prompt");

        assert!(prompt.starts_with("You are: reviewer\nRole: Reviews drafts\n"));
        assert!(prompt.contains("\nReview the draft carefully.\n"));
        assert!(prompt.contains("## Current State\n- Stage: review\n- Iteration: 1\n"));
        assert!(prompt.contains("## Input Files\n--- draft.md ---\nThe draft body.\n---\n"));
        assert!(prompt.contains("## Your Task\nWrite your output to: review.md"));
        assert!(prompt.contains("Use this format:\n# Review\n## Verdict: ..."));
        assert!(prompt.contains(
            "IMPORTANT: Your output MUST include a line: ## Verdict: APPROVE or REQUEST_CHANGES"
        ));
    }

    #[test]
    fn limited_stage_shows_threshold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let definition = WorkflowDefinition::from_document(review_document()).expect("valid");
        let machine = StateMachine::start(&definition);

        let prompt = compose_prompt(&machine, &drafter(), temp.path(), 1_000).expect("prompt");

        assert!(prompt.contains("- Iteration: 0 / 2"));
        assert!(!prompt.contains("## Input Files"), "no inputs exist yet");
        assert!(!prompt.contains("Use this format"));
        assert!(!prompt.contains("IMPORTANT"));
    }

    #[test]
    fn additional_outputs_skip_globs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut document = review_document();
        if let Some(role) = document.roles.get_mut("drafter") {
            role.writes = vec![
                "draft.md".to_string(),
                "notes/*.md".to_string(),
                "summary.md".to_string(),
            ];
        }
        let definition = WorkflowDefinition::from_document(document).expect("valid");
        let machine = StateMachine::start(&definition);

        let inputs =
            PromptInputs::gather(&machine, &drafter(), temp.path(), 1_000).expect("inputs");
        assert_eq!(inputs.primary_output.as_deref(), Some("draft.md"));
        assert_eq!(inputs.additional_outputs, vec!["summary.md".to_string()]);

        let prompt = render_prompt(&inputs).expect("render");
        assert!(prompt.contains("Additional output files: summary.md"));
    }
}
