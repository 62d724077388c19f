//! Workflow and role load/save helpers with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::paths::WorkflowPaths;
use super::write_atomic;
use crate::protocol::{
    ProtocolError, RoleDocument, RoleSpec, WorkflowDefinition, WorkflowDocument,
};

const WORKFLOW_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/workflow/v1.schema.json"
));

/// Parse `workflow.yml` contents into a validated definition.
///
/// Stops at the first failing layer (YAML, schema shape, graph checks) and
/// returns every error found in that layer.
pub fn parse_workflow(contents: &str) -> Result<WorkflowDefinition, Vec<String>> {
    let value = parse_yaml(contents)?;
    let shape_errors = schema_errors(&value);
    if !shape_errors.is_empty() {
        return Err(shape_errors);
    }
    WorkflowDefinition::from_value(value).map_err(error_list)
}

/// Parse a role file into a validated role specification.
pub fn parse_role(contents: &str) -> Result<RoleSpec, Vec<String>> {
    let value = parse_yaml(contents)?;
    RoleSpec::from_value(value).map_err(error_list)
}

/// Load and validate `workflow.yml`.
pub fn load_workflow(path: &Path) -> Result<WorkflowDefinition> {
    debug!(path = %path.display(), "loading workflow");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read workflow {}", path.display()))?;
    parse_workflow(&contents).map_err(|errors| {
        anyhow!(
            "invalid workflow {}:\n- {}",
            path.display(),
            errors.join("\n- ")
        )
    })
}

/// Load the role specification that `role_name` points at in `definition`.
pub fn load_role(
    paths: &WorkflowPaths,
    definition: &WorkflowDefinition,
    role_name: &str,
) -> Result<RoleSpec> {
    let role_ref = definition
        .role(role_name)
        .ok_or_else(|| anyhow!("role '{role_name}' is not declared in the workflow"))?;
    let path = paths.rules_path(&role_ref.rules);
    debug!(role = role_name, path = %path.display(), "loading role");
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("read rules for role '{role_name}' at {}", path.display()))?;
    parse_role(&contents).map_err(|errors| {
        anyhow!(
            "invalid role '{role_name}' ({}):\n- {}",
            path.display(),
            errors.join("\n- ")
        )
    })
}

pub fn write_workflow(path: &Path, document: &WorkflowDocument) -> Result<()> {
    write_yaml(path, document)
}

pub fn write_role(path: &Path, document: &RoleDocument) -> Result<()> {
    write_yaml(path, document)
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let buf = serde_yaml::to_string(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    write_atomic(path, &buf)
}

fn parse_yaml(contents: &str) -> Result<Value, Vec<String>> {
    serde_yaml::from_str::<Value>(contents).map_err(|err| vec![format!("invalid YAML: {err}")])
}

fn schema_errors(value: &Value) -> Vec<String> {
    let schema: Value = match serde_json::from_str(WORKFLOW_SCHEMA) {
        Ok(schema) => schema,
        Err(err) => return vec![format!("workflow schema is not valid JSON: {err}")],
    };
    let compiled = match validator_for(&schema) {
        Ok(compiled) => compiled,
        Err(err) => return vec![format!("invalid workflow schema: {err}")],
    };
    compiled.iter_errors(value).map(|err| err.to_string()).collect()
}

fn error_list(err: ProtocolError) -> Vec<String> {
    match err {
        ProtocolError::InvalidDefinition(errors) | ProtocolError::InvalidRole(errors) => errors,
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::review_document;

    const REVIEW_YAML: &str = "\
name: review
roles:
  drafter:
    description: Writes drafts
    writes: [draft.md]
    rules: roles/drafter.yml
  reviewer:
    description: Reviews drafts
    writes: [review.md]
    reads: [draft.md]
    rules: roles/reviewer.yml
stages:
  drafting:
    agent: drafter
    next: review
  review:
    agent: reviewer
    next:
      approve: done
      reject: drafting
  done:
    terminal: true
initial_stage: drafting
limits:
  max_drafting: 2
";

    #[test]
    fn parses_linear_and_branching_next() {
        let definition = parse_workflow(REVIEW_YAML).expect("valid");
        assert_eq!(definition.name(), "review");
        assert_eq!(definition.version(), 1);
        assert_eq!(
            definition.stage("review").expect("review").targets(),
            vec!["done", "drafting"]
        );
    }

    /// Keys relay does not know about are ignored at every level.
    #[test]
    fn unknown_keys_are_accepted() {
        let yaml = REVIEW_YAML
            .replace("name: review\n", "name: review\ndescription: extra\n")
            .replace(
                "    rules: roles/drafter.yml\n",
                "    rules: roles/drafter.yml\n    model: fast\n",
            )
            .replace("    terminal: true\n", "    terminal: true\n    note: shipped\n");
        let definition = parse_workflow(&yaml).expect("valid");
        assert_eq!(definition.initial_stage(), "drafting");
    }

    #[test]
    fn limit_values_must_be_integers() {
        let yaml = REVIEW_YAML.replace("max_drafting: 2", "max_drafting: lots");
        let errors = parse_workflow(&yaml).unwrap_err();
        assert!(
            errors.iter().any(|e| e.contains("lots")),
            "errors: {errors:?}"
        );
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let errors = parse_workflow("name: [unclosed").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("invalid YAML"));
    }

    /// Shape errors stop validation before the graph checks run.
    #[test]
    fn schema_errors_short_circuit() {
        let errors = parse_workflow("name: x\nroles: {}\nstages: {}\n").unwrap_err();
        assert!(
            errors.iter().any(|e| e.contains("initial_stage")),
            "errors: {errors:?}"
        );
        assert!(!errors.iter().any(|e| e.contains("not found in stages")));
    }

    #[test]
    fn graph_errors_are_collected() {
        let yaml = REVIEW_YAML.replace("reject: drafting", "reject: nowhere");
        let errors = parse_workflow(&yaml).unwrap_err();
        assert_eq!(
            errors,
            vec!["stage 'review' transitions to unknown stage 'nowhere'".to_string()]
        );
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workflow.yml");
        write_workflow(&path, &review_document()).expect("write");
        let loaded = load_workflow(&path).expect("load");
        assert_eq!(loaded.document(), &review_document());
    }

    #[test]
    fn load_role_resolves_rules_relative_to_workflow_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkflowPaths::new(temp.path(), "review");
        let definition = WorkflowDefinition::from_document(review_document()).expect("valid");
        write_role(
            &paths.rules_path("roles/reviewer.yml"),
            &RoleDocument {
                name: "reviewer".to_string(),
                system_prompt: "Review it.".to_string(),
                verdict_field: Some("Verdict".to_string()),
                approve_value: Some("APPROVE".to_string()),
                reject_value: Some("REQUEST_CHANGES".to_string()),
                ..RoleDocument::default()
            },
        )
        .expect("write role");

        let role = load_role(&paths, &definition, "reviewer").expect("load");
        assert_eq!(role.name(), "reviewer");
        assert!(role.verdict().is_some());

        let err = load_role(&paths, &definition, "drafter").unwrap_err();
        assert!(format!("{err:#}").contains("drafter"));
    }

    #[test]
    fn invalid_role_lists_errors() {
        let errors = parse_role("name: worker\nsystem_prompt: ''\nverdict_field: Verdict\n")
            .unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
