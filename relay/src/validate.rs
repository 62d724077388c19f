//! `relay validate`: check a workflow directory without running anything.

use std::fs;

use crate::io::paths::WorkflowPaths;
use crate::io::state_store::load_run_state;
use crate::io::workflow_store::{parse_role, parse_workflow};
use crate::protocol::StateMachine;

/// Validate `workflow.yml`, every referenced role file, and `state.yml` if present.
///
/// Returns every problem found; an empty list means the workflow is valid.
/// Role files are only checked once `workflow.yml` itself is valid.
pub fn validate_workflow_dir(paths: &WorkflowPaths) -> Vec<String> {
    let mut errors = Vec::new();

    if !paths.workflow_path.exists() {
        errors.push(format!("Missing workflow.yml in {}", paths.dir.display()));
        return errors;
    }
    let contents = match fs::read_to_string(&paths.workflow_path) {
        Ok(contents) => contents,
        Err(err) => {
            errors.push(format!("workflow.yml: cannot read: {err}"));
            return errors;
        }
    };
    let definition = match parse_workflow(&contents) {
        Ok(definition) => definition,
        Err(found) => {
            errors.extend(found.into_iter().map(|err| format!("workflow.yml: {err}")));
            return errors;
        }
    };

    for (role_name, role_ref) in definition.roles() {
        let path = paths.rules_path(&role_ref.rules);
        if !path.exists() {
            errors.push(format!(
                "Role '{role_name}': rules file not found: {}",
                role_ref.rules
            ));
            continue;
        }
        let role_errors = match fs::read_to_string(&path) {
            Ok(contents) => parse_role(&contents).err().unwrap_or_default(),
            Err(err) => vec![format!("cannot read {}: {err}", role_ref.rules)],
        };
        errors.extend(
            role_errors
                .into_iter()
                .map(|err| format!("Role '{role_name}': {err}")),
        );
    }

    if paths.state_path.exists() {
        match load_run_state(&paths.state_path) {
            Ok(state) => {
                if let Err(err) = StateMachine::new(&definition, state).current_stage() {
                    errors.push(format!("state.yml: {err}"));
                }
            }
            Err(err) => errors.push(format!("state.yml: {err:#}")),
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::init::{InitOptions, Template, init_workflow};
    use crate::io::paths::RelayPaths;
    use crate::io::state_store::write_run_state;
    use crate::protocol::RunState;

    fn init(template: Template) -> (tempfile::TempDir, WorkflowPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workflow(
            temp.path(),
            &InitOptions {
                name: "default".to_string(),
                template,
                force: false,
            },
        )
        .expect("init");
        (temp, paths)
    }

    #[test]
    fn scaffolded_workflows_are_valid() {
        for template in [Template::Minimal, Template::Review] {
            let (_temp, paths) = init(template);
            assert_eq!(validate_workflow_dir(&paths), Vec::<String>::new());
        }
    }

    #[test]
    fn missing_workflow_file_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RelayPaths::new(temp.path()).workflow("default");
        let errors = validate_workflow_dir(&paths);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Missing workflow.yml"));
    }

    #[test]
    fn definition_errors_are_prefixed() {
        let (_temp, paths) = init(Template::Minimal);
        let contents = fs::read_to_string(&paths.workflow_path).expect("read");
        fs::write(
            &paths.workflow_path,
            contents.replace("initial_stage: working", "initial_stage: nowhere"),
        )
        .expect("write");

        let errors = validate_workflow_dir(&paths);
        assert!(
            errors.contains(&"workflow.yml: initial_stage 'nowhere' not found in stages".to_string()),
            "errors: {errors:?}"
        );
    }

    #[test]
    fn role_problems_are_collected_per_role() {
        let (_temp, paths) = init(Template::Review);
        fs::remove_file(paths.rules_path("roles/drafter.yml")).expect("remove");
        fs::write(
            paths.rules_path("roles/reviewer.yml"),
            "name: reviewer\nsystem_prompt: Review.\nverdict_field: Verdict\n",
        )
        .expect("write");

        let errors = validate_workflow_dir(&paths);
        assert_eq!(
            errors,
            vec![
                "Role 'drafter': rules file not found: roles/drafter.yml".to_string(),
                "Role 'reviewer': verdict_field, approve_value, and reject_value must all be set or all be unset"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn state_pointing_at_unknown_stage_is_reported() {
        let (_temp, paths) = init(Template::Minimal);
        write_run_state(&paths.state_path, &RunState::new("ghost")).expect("state");
        let errors = validate_workflow_dir(&paths);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("state.yml:"));
        assert!(errors[0].contains("ghost"));
    }
}
