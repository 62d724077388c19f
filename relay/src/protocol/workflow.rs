//! Workflow definition model and its structural validator.
//!
//! A [`WorkflowDocument`] is the raw, deserialized shape of `workflow.yml`.
//! A [`WorkflowDefinition`] can only be obtained by validating a document, so
//! holding one proves the graph is well-formed:
//!
//! - terminal stages have neither `agent` nor `next`
//! - non-terminal stages have both
//! - every `agent` names a declared role
//! - `initial_stage` names a declared stage
//! - every transition target names a declared stage
//! - every stage is reachable from `initial_stage`

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ProtocolError;

/// Role entry in the workflow: what it reads, writes, and where its rules live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub description: String,
    /// Artifact filename patterns; entries containing `*` are globs.
    pub writes: Vec<String>,
    #[serde(default)]
    pub reads: Vec<String>,
    /// Path to the role specification, relative to the workflow directory.
    pub rules: String,
}

/// Outgoing edges of a non-terminal stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Transition {
    /// Exactly one successor.
    Linear(String),
    /// Successor chosen by verdict token.
    Branching(BTreeMap<String, String>),
}

impl Transition {
    /// All target stage names, in map order for branching transitions.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Transition::Linear(target) => vec![target.as_str()],
            Transition::Branching(branches) => branches.values().map(String::as_str).collect(),
        }
    }
}

/// Structural kind of a stage, derived from its transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Terminal,
    Linear,
    Branching,
}

impl StageKind {
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Terminal => "terminal",
            StageKind::Linear => "linear",
            StageKind::Branching => "branching",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Transition>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminal: bool,
}

impl Stage {
    pub fn linear(agent: &str, next: &str) -> Self {
        Self {
            agent: Some(agent.to_string()),
            next: Some(Transition::Linear(next.to_string())),
            terminal: false,
        }
    }

    pub fn branching(agent: &str, branches: &[(&str, &str)]) -> Self {
        let branches = branches
            .iter()
            .map(|(verdict, target)| (verdict.to_string(), target.to_string()))
            .collect();
        Self {
            agent: Some(agent.to_string()),
            next: Some(Transition::Branching(branches)),
            terminal: false,
        }
    }

    pub fn terminal() -> Self {
        Self {
            agent: None,
            next: None,
            terminal: true,
        }
    }

    /// Kind of this stage. Only meaningful once the stage invariants hold.
    pub fn kind(&self) -> StageKind {
        match &self.next {
            None => StageKind::Terminal,
            Some(Transition::Linear(_)) => StageKind::Linear,
            Some(Transition::Branching(_)) => StageKind::Branching,
        }
    }

    /// Target stage names of this stage's transition (empty for terminal stages).
    pub fn targets(&self) -> Vec<&str> {
        self.next.as_ref().map(Transition::targets).unwrap_or_default()
    }

    /// Check the per-stage invariants that do not depend on the rest of the graph.
    ///
    /// Returns stable error messages (empty on success).
    pub fn invariant_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let has_agent = self
            .agent
            .as_deref()
            .is_some_and(|agent| !agent.trim().is_empty());
        let has_next = self.next.is_some();

        if self.terminal {
            if has_agent || has_next {
                errors.push("terminal stages cannot have 'agent' or 'next'".to_string());
            }
            return errors;
        }

        if !has_agent {
            errors.push("non-terminal stages must have an 'agent'".to_string());
        }
        match &self.next {
            None => errors.push("non-terminal stages must have 'next'".to_string()),
            Some(Transition::Branching(branches)) => {
                if branches.is_empty() {
                    errors.push("branching 'next' must map at least one verdict".to_string());
                }
                errors.extend(colliding_branch_tokens(branches));
            }
            Some(Transition::Linear(_)) => {}
        }
        errors
    }
}

/// Verdict lookup is case-insensitive, so tokens differing only in case are ambiguous.
fn colliding_branch_tokens(branches: &BTreeMap<String, String>) -> Vec<String> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    let mut errors = Vec::new();
    for token in branches.keys() {
        let normalized = token.trim().to_lowercase();
        if let Some(previous) = seen.get(&normalized) {
            errors.push(format!(
                "branch tokens '{previous}' and '{token}' collide case-insensitively"
            ));
            continue;
        }
        seen.insert(normalized, token);
    }
    errors
}

fn default_version() -> u32 {
    1
}

/// Raw workflow document as read from `workflow.yml`; not yet validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub roles: BTreeMap<String, RoleRef>,
    pub stages: BTreeMap<String, Stage>,
    pub initial_stage: String,
    /// Advisory iteration thresholds keyed by free-text label.
    #[serde(default)]
    pub limits: BTreeMap<String, u32>,
}

/// A structurally valid workflow graph. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WorkflowDefinition {
    document: WorkflowDocument,
}

impl WorkflowDefinition {
    /// Validate a document, reporting every structural error found.
    pub fn from_document(document: WorkflowDocument) -> Result<Self, ProtocolError> {
        let errors = validate_definition(&document);
        if !errors.is_empty() {
            return Err(ProtocolError::InvalidDefinition(errors));
        }
        Ok(Self { document })
    }

    /// Build from loosely structured input (e.g. parsed YAML).
    ///
    /// Shape failures (not a mapping, missing keys, wrong types) stop early
    /// with a single error; structural checks then run to completion.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let document: WorkflowDocument = serde_json::from_value(value).map_err(|err| {
            ProtocolError::InvalidDefinition(vec![format!("workflow document: {err}")])
        })?;
        Self::from_document(document)
    }

    pub fn name(&self) -> &str {
        &self.document.name
    }

    pub fn version(&self) -> u32 {
        self.document.version
    }

    pub fn initial_stage(&self) -> &str {
        &self.document.initial_stage
    }

    pub fn roles(&self) -> &BTreeMap<String, RoleRef> {
        &self.document.roles
    }

    pub fn role(&self, name: &str) -> Option<&RoleRef> {
        self.document.roles.get(name)
    }

    pub fn stages(&self) -> &BTreeMap<String, Stage> {
        &self.document.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.document.stages.get(name)
    }

    pub fn has_stage(&self, name: &str) -> bool {
        self.document.stages.contains_key(name)
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.document.stages.keys().cloned().collect()
    }

    pub fn limits(&self) -> &BTreeMap<String, u32> {
        &self.document.limits
    }

    pub fn document(&self) -> &WorkflowDocument {
        &self.document
    }
}

impl TryFrom<WorkflowDocument> for WorkflowDefinition {
    type Error = ProtocolError;

    fn try_from(document: WorkflowDocument) -> Result<Self, Self::Error> {
        Self::from_document(document)
    }
}

/// Check every structural invariant of a workflow document.
///
/// All checks run even when earlier ones fail. Messages are emitted in a
/// deterministic order (stage name order within each check).
pub fn validate_definition(document: &WorkflowDocument) -> Vec<String> {
    let mut errors = Vec::new();

    for (name, stage) in &document.stages {
        for err in stage.invariant_errors() {
            errors.push(format!("stage '{name}': {err}"));
        }
        if let Some(agent) = &stage.agent
            && !agent.trim().is_empty()
            && !document.roles.contains_key(agent)
        {
            errors.push(format!(
                "stage '{name}' references unknown role '{agent}'. Available roles: {}",
                join_keys(&document.roles)
            ));
        }
    }

    let initial_known = document.stages.contains_key(&document.initial_stage);
    if !initial_known {
        errors.push(format!(
            "initial_stage '{}' not found in stages",
            document.initial_stage
        ));
    }

    for (name, stage) in &document.stages {
        for target in stage.targets() {
            if !document.stages.contains_key(target) {
                errors.push(format!(
                    "stage '{name}' transitions to unknown stage '{target}'"
                ));
            }
        }
    }

    // Reachability is only meaningful from a known starting point.
    if initial_known {
        let reachable = reachable_stages(&document.stages, &document.initial_stage);
        let unreachable: Vec<&str> = document
            .stages
            .keys()
            .map(String::as_str)
            .filter(|name| !reachable.contains(name))
            .collect();
        if !unreachable.is_empty() {
            errors.push(format!("unreachable stages: {}", unreachable.join(", ")));
        }
    }

    errors
}

/// Breadth-first walk of the transition graph from `initial`.
///
/// Targets that are not declared stages are skipped.
pub fn reachable_stages<'a>(
    stages: &'a BTreeMap<String, Stage>,
    initial: &'a str,
) -> BTreeSet<&'a str> {
    let mut reachable = BTreeSet::new();
    let mut queue = VecDeque::new();
    if stages.contains_key(initial) {
        reachable.insert(initial);
        queue.push_back(initial);
    }
    while let Some(current) = queue.pop_front() {
        let Some(stage) = stages.get(current) else {
            continue;
        };
        for target in stage.targets() {
            if stages.contains_key(target) && reachable.insert(target) {
                queue.push_back(target);
            }
        }
    }
    reachable
}

fn join_keys<V>(map: &BTreeMap<String, V>) -> String {
    map.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}
