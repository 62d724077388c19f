//! Error taxonomy for the workflow protocol.
//!
//! Structural errors carry every violation found in one pass. Referential and
//! resolver errors carry enough context (stage, verdict, alternatives) for a
//! caller to render a precise message without re-deriving it.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The workflow definition failed shape or structural validation.
    #[error("invalid workflow definition:\n- {}", .0.join("\n- "))]
    InvalidDefinition(Vec<String>),

    /// A role specification failed validation.
    #[error("invalid role specification:\n- {}", .0.join("\n- "))]
    InvalidRole(Vec<String>),

    /// The run state points at a stage the definition does not declare.
    #[error("state references unknown stage '{stage}' (known stages: {})", .known.join(", "))]
    UnknownStage { stage: String, known: Vec<String> },

    /// `advance` was asked to move to a stage the definition does not declare.
    #[error("unknown target stage '{0}'")]
    UnknownTarget(String),

    /// Linear resolution was requested on a branching stage.
    #[error(
        "stage '{stage}' has branching transitions; use resolve_branching_transition() instead"
    )]
    BranchingStage { stage: String },

    /// Branching resolution was requested on a linear stage.
    #[error("stage '{stage}' has a linear transition; use resolve_linear_transition() instead")]
    LinearStage { stage: String },

    /// A transition was requested from a terminal stage.
    #[error("stage '{stage}' is terminal and has no outgoing transitions")]
    TerminalStage { stage: String },

    /// The verdict does not name any branch of the current stage.
    #[error(
        "verdict '{verdict}' doesn't match any branch of stage '{stage}'. Available branches: {}",
        .available.join(", ")
    )]
    UnmatchedVerdict {
        stage: String,
        verdict: String,
        available: Vec<String>,
    },
}
