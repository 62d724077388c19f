//! Loop-level tests for a draft/review workflow driven through the public API.
//!
//! A scripted backend stands in for the agents, so these tests cover prompt
//! composition, verdict resolution, iteration limits, and state persistence
//! across a whole run.

use relay::io::config::RelayConfig;
use relay::io::init::{Template, reset_workflow};
use relay::io::state_store::load_run_state;
use relay::looping::{LoopStop, run_loop};
use relay::step::{
    IterationLimitError, StepOptions, StepOutcome, VerdictSource, advance_workflow, run_step,
};
use relay::test_support::{ScriptedBackend, ScriptedVerdicts, TestWorkspace, turn};

/// Workflow: `drafting` → `review` → {approve: `done`, reject: `drafting`}.
///
/// Execution sequence:
/// 1. Drafter writes v1.
/// 2. Reviewer requests changes (extracted from `review.md`).
/// 3. Drafter writes v2; the prompt carries the previous review.
/// 4. Reviewer writes no verdict line; the console choice approves.
#[test]
fn review_run_revises_once_then_completes() {
    let ws = TestWorkspace::new(Template::Review).expect("workspace");
    let config = RelayConfig::default();
    let mut backend = ScriptedBackend::new(vec![
        turn("draft.md", "v1"),
        turn(
            "review.md",
            "# Review\n\n- tighten the intro\n\n## Verdict: REQUEST_CHANGES\n",
        ),
        turn("draft.md", "v2"),
        turn("review.md", "# Review\n\nLooks good.\n"),
    ]);
    let mut verdicts = ScriptedVerdicts::new(&["approve"]);
    let mut seen = Vec::new();

    let outcome = run_loop(
        ws.paths(),
        &config,
        &mut backend,
        &mut verdicts,
        StepOptions::default(),
        |step| seen.push((step.from.clone(), step.to.clone(), step.verdict.clone())),
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(
        seen,
        vec![
            ("drafting".to_string(), "review".to_string(), None),
            (
                "review".to_string(),
                "drafting".to_string(),
                Some(("reject".to_string(), VerdictSource::Extracted)),
            ),
            ("drafting".to_string(), "review".to_string(), None),
            (
                "review".to_string(),
                "done".to_string(),
                Some(("approve".to_string(), VerdictSource::Prompted)),
            ),
        ]
    );

    assert!(backend.prompts[2].contains("tighten the intro"));
    assert!(backend.prompts[2].contains("- Iteration: 1 / 3"));
    assert!(backend.prompts[1].contains("## Verdict: APPROVE or REQUEST_CHANGES"));
    assert_eq!(verdicts.asked.len(), 1);
    assert_eq!(ws.read_artifact("draft.md").expect("draft"), "v2");

    let state = ws.state().expect("state");
    assert_eq!(state.stage(), "done");
    assert_eq!(state.last_updated_by(), Some("reviewer"));
    assert!(state.last_updated_at().is_some());
}

/// The second reviewer turn writes nothing, so the first round's
/// `REQUEST_CHANGES` is still on disk. The operator decides instead.
#[test]
fn review_turn_without_output_asks_for_verdict() {
    let ws = TestWorkspace::new(Template::Review).expect("workspace");
    let mut backend = ScriptedBackend::new(vec![
        turn("draft.md", "v1"),
        turn("review.md", "## Verdict: REQUEST_CHANGES\n"),
        turn("draft.md", "v2"),
        Vec::new(),
    ]);
    let mut verdicts = ScriptedVerdicts::new(&["approve"]);
    let mut last = None;

    let outcome = run_loop(
        ws.paths(),
        &RelayConfig::default(),
        &mut backend,
        &mut verdicts,
        StepOptions::default(),
        |step| last = Some(step.clone()),
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(outcome.steps.len(), 4);
    let last = last.expect("a transition");
    assert_eq!(last.to, "done");
    assert_eq!(
        last.verdict,
        Some(("approve".to_string(), VerdictSource::Prompted))
    );
    assert_eq!(verdicts.asked.len(), 1);
}

#[test]
fn limit_blocks_until_ignored_or_reset() {
    let ws = TestWorkspace::new(Template::Review).expect("workspace");
    let config = RelayConfig::default();
    let mut verdicts = ScriptedVerdicts::default();
    for _ in 0..3 {
        advance_workflow(ws.paths(), None, &mut verdicts).expect("drafting");
        advance_workflow(ws.paths(), Some("reject"), &mut verdicts).expect("review");
    }

    let mut backend = ScriptedBackend::new(vec![turn("draft.md", "v4")]);
    let err = run_step(
        ws.paths(),
        &config,
        &mut backend,
        &mut verdicts,
        StepOptions::default(),
    )
    .unwrap_err();
    let limit = err
        .downcast_ref::<IterationLimitError>()
        .expect("iteration limit error");
    assert_eq!(limit.stage, "drafting");
    assert!(backend.invocations.is_empty());

    let outcome = run_step(
        ws.paths(),
        &config,
        &mut backend,
        &mut verdicts,
        StepOptions {
            ignore_limits: true,
        },
    )
    .expect("step past limit");
    let StepOutcome::Advanced(step) = outcome else {
        panic!("expected a transition");
    };
    assert_eq!(step.to, "review");

    let reset = reset_workflow(ws.paths(), false).expect("reset");
    assert_eq!(reset.initial_stage, "drafting");
    let state = load_run_state(&ws.paths().state_path).expect("state");
    assert!(state.iteration_counts().is_empty());
    assert_eq!(ws.read_artifact("draft.md").expect("draft"), "v4");
}
