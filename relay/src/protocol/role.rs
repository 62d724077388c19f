//! Role specifications: the behavioral contract handed to an agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ProtocolError;

/// Raw role document as read from `roles/<name>.yml`; not yet validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDocument {
    pub name: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_value: Option<String>,
}

/// Heading a verdict-producing role must emit, and the tokens that decide it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerdictRule {
    pub field: String,
    pub approve_value: String,
    pub reject_value: String,
}

/// A validated role specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    name: String,
    system_prompt: String,
    output_format: Option<String>,
    verdict: Option<VerdictRule>,
}

impl RoleSpec {
    pub fn from_document(document: RoleDocument) -> Result<Self, ProtocolError> {
        let errors = validate_role(&document);
        if !errors.is_empty() {
            return Err(ProtocolError::InvalidRole(errors));
        }
        let verdict = match (
            present(document.verdict_field),
            present(document.approve_value),
            present(document.reject_value),
        ) {
            (Some(field), Some(approve_value), Some(reject_value)) => Some(VerdictRule {
                field,
                approve_value,
                reject_value,
            }),
            _ => None,
        };
        Ok(Self {
            name: document.name,
            system_prompt: document.system_prompt,
            output_format: present(document.output_format),
            verdict,
        })
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let document: RoleDocument = serde_json::from_value(value)
            .map_err(|err| ProtocolError::InvalidRole(vec![format!("role document: {err}")]))?;
        Self::from_document(document)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn output_format(&self) -> Option<&str> {
        self.output_format.as_deref()
    }

    /// Verdict configuration, present only for roles that decide a branch.
    pub fn verdict(&self) -> Option<&VerdictRule> {
        self.verdict.as_ref()
    }
}

/// Check role invariants, collecting every violation.
///
/// `verdict_field`, `approve_value` and `reject_value` must be all set or all
/// unset; blank strings count as unset.
pub fn validate_role(document: &RoleDocument) -> Vec<String> {
    let mut errors = Vec::new();
    if document.name.trim().is_empty() {
        errors.push("name must not be empty".to_string());
    }
    if document.system_prompt.trim().is_empty() {
        errors.push("system_prompt must not be empty".to_string());
    }
    let set = [
        &document.verdict_field,
        &document.approve_value,
        &document.reject_value,
    ]
    .iter()
    .filter(|value| is_present(value))
    .count();
    if set != 0 && set != 3 {
        errors.push(
            "verdict_field, approve_value, and reject_value must all be set or all be unset"
                .to_string(),
        );
    }
    errors
}

fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
