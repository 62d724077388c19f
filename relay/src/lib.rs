//! Relay: a file-based protocol for handing work between AI agents.
//!
//! A workflow is a graph of stages, each owned by a role. Agents exchange
//! markdown artifacts; relay tracks which stage is active, who acts next and
//! how many times each stage has run. The architecture keeps a strict split:
//!
//! - **[`protocol`]**: Pure, deterministic logic (definitions, run state,
//!   transition resolution, verdict extraction). No I/O.
//! - **[`io`]**: Side-effecting operations (`.relay/` files, prompt rendering,
//!   agent backends). Isolated so tests can substitute fakes.
//!
//! Orchestration modules ([`step`], [`looping`], [`status`], [`validate`])
//! coordinate the two to implement CLI commands.

pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod protocol;
pub mod status;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
