//! The workflow protocol: definitions, run state, transitions, verdicts.
//!
//! Everything here is pure and synchronous. Modules operate on in-memory data
//! only; loading, persisting, logging and agent invocation live in [`crate::io`]
//! and the orchestration modules.

pub mod error;
pub mod limits;
pub mod machine;
pub mod role;
pub mod state;
pub mod verdict;
pub mod workflow;

pub use error::ProtocolError;
pub use machine::{LimitCheck, StateMachine};
pub use role::{RoleDocument, RoleSpec, VerdictRule};
pub use state::RunState;
pub use verdict::{Verdict, extract_verdict, extract_with_rule};
pub use workflow::{RoleRef, Stage, StageKind, Transition, WorkflowDefinition, WorkflowDocument};
