//! Persisted run state for one execution of a workflow.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a workflow run currently stands (`state.yml`).
///
/// `stage`, `iteration_counts`, `last_updated_by` and `last_updated_at` only
/// change through [`crate::protocol::machine::StateMachine::advance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    stage: String,
    /// Times each stage has been entered via an advance; absent means zero.
    #[serde(default)]
    iteration_counts: BTreeMap<String, u32>,
    #[serde(default)]
    last_updated_by: Option<String>,
    #[serde(default)]
    last_updated_at: Option<DateTime<Utc>>,
    /// Caller extensions; never interpreted by the protocol.
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl RunState {
    /// Fresh state placed at `initial_stage`. The placement is not an entry.
    pub fn new(initial_stage: impl Into<String>) -> Self {
        Self {
            stage: initial_stage.into(),
            iteration_counts: BTreeMap::new(),
            last_updated_by: None,
            last_updated_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn iteration_counts(&self) -> &BTreeMap<String, u32> {
        &self.iteration_counts
    }

    pub fn iteration_count(&self, stage: &str) -> u32 {
        self.iteration_counts.get(stage).copied().unwrap_or(0)
    }

    pub fn last_updated_by(&self) -> Option<&str> {
        self.last_updated_by.as_deref()
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.metadata
    }

    /// Record entry into `stage` by `actor`. Callers must have validated `stage`.
    pub(crate) fn enter(&mut self, stage: &str, actor: &str, at: DateTime<Utc>) {
        self.stage = stage.to_string();
        *self.iteration_counts.entry(stage.to_string()).or_insert(0) += 1;
        self.last_updated_by = Some(actor.to_string());
        self.last_updated_at = Some(at);
    }
}
