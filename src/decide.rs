use crate::checklist::ChecklistSections;
use crate::config::BodyOverrides;
use crate::prompt;
use crate::state::KeepaliveState;
use crate::types::{
    Action, CiVerdict, IterationDecision, PromptMode, PrSnapshot, Reason,
};

/// Everything the decision engine looks at. All inputs are gathered by the
/// evaluator before this runs; the engine itself performs no I/O.
pub struct DecisionInputs<'a> {
    pub pr: &'a PrSnapshot,
    pub sections: &'a ChecklistSections,
    pub state: &'a KeepaliveState,
    pub ci: CiVerdict,
    pub overrides: &'a BodyOverrides,
    /// Agent runs currently in flight for this PR, reported by the caller.
    pub active_runs: u32,
    /// Run cap when no `agents:max-*` label overrides it.
    pub default_run_cap: u32,
}

/// Decide what to do with the PR this invocation.
///
/// This is a pure function — no I/O, no async, trivially testable.
///
/// Selection rules, first match wins:
/// 1. No `agent:*` label → wait (the PR is not enrolled)
/// 2. Disabled in config / `agents:pause` / `needs-human` → skip
/// 3. Concurrent runs at or over the cap → skip
/// 4. Checklist empty → wait; all items checked → stop
/// 5. Iteration budget exhausted: stop if the previous round was
///    unproductive, otherwise keep running in extended mode
/// 6. Gate pending or cancelled → wait; failing → fix (lint failures wait
///    for the external autofix pipeline instead)
/// 7. Otherwise → run
pub fn decide(inputs: &DecisionInputs) -> IterationDecision {
    let counts = inputs.sections.counts();
    let appendix = prompt::build_task_appendix(
        inputs.sections,
        counts,
        inputs.state.needs_task_reconciliation,
    );
    let agent_type = inputs.pr.agent_type().unwrap_or("").to_string();
    let has_agent_label = !agent_type.is_empty();

    let outcome = select(inputs, counts.total, counts.unchecked);

    IterationDecision {
        action: outcome.0,
        reason: outcome.1,
        prompt_mode: outcome.2,
        checkbox_counts: counts,
        task_appendix: appendix,
        agent_type,
        has_agent_label,
    }
}

fn select(
    inputs: &DecisionInputs,
    total: u32,
    unchecked: u32,
) -> (Action, Reason, Option<PromptMode>) {
    let pr = inputs.pr;
    let state = inputs.state;

    // (1) Not enrolled.
    if pr.agent_type().is_none() {
        return (Action::Wait, Reason::MissingAgentLabel, None);
    }

    // (2) Explicitly disabled or handed to a human.
    if inputs.overrides.keepalive_enabled == Some(false) {
        return (Action::Skip, Reason::KeepaliveDisabled, None);
    }
    if pr.has_label("agents:pause") {
        return (Action::Skip, Reason::Paused, None);
    }
    if pr.has_label("needs-human") {
        return (Action::Skip, Reason::NeedsHuman, None);
    }

    // (3) Capacity.
    let cap = pr.run_cap_override().unwrap_or(inputs.default_run_cap);
    if inputs.active_runs >= cap {
        return (Action::Skip, Reason::RunCapReached, None);
    }

    // (4) Checklist completion. An empty checklist is a wait, never a stop:
    // there is nothing to have completed.
    if total == 0 {
        return (Action::Wait, Reason::MissingSections, None);
    }
    if unchecked == 0 {
        return (Action::Stop, Reason::TasksComplete, None);
    }

    // (5) Iteration budget. The persisted iteration wins over a stale
    // caller-supplied value; a larger override is honored.
    let max_iterations = inputs
        .overrides
        .max_iterations
        .unwrap_or(state.max_iterations);
    let iteration = state.iteration.max(inputs.overrides.iteration.unwrap_or(0));
    if iteration >= max_iterations {
        if state.previous_round_unproductive() {
            return (Action::Stop, Reason::MaxIterationsUnproductive, None);
        }
        // Measurable progress: keep going past the nominal max. Bounded,
        // because the unproductive rule above fires once progress stops.
        return (Action::Run, Reason::ReadyExtended, Some(PromptMode::Normal));
    }

    // (6) Gate verdict.
    match inputs.ci {
        CiVerdict::Pending => (Action::Wait, Reason::GatePending, None),
        CiVerdict::Cancelled => (Action::Wait, Reason::GateCancelled, None),
        CiVerdict::FailureTests => (Action::Fix, Reason::FixTest, Some(PromptMode::FixCi)),
        CiVerdict::FailureTypes => (Action::Fix, Reason::FixMypy, Some(PromptMode::FixCi)),
        CiVerdict::FailureUnknown => (Action::Fix, Reason::FixUnknown, Some(PromptMode::FixCi)),
        // Lint failures are the autofix pipeline's job; we just wait for it.
        CiVerdict::FailureLint => (Action::Wait, Reason::GateNotSuccess, None),
        // (7) Ready.
        CiVerdict::Success => (Action::Run, Reason::Ready, Some(PromptMode::Normal)),
    }
}
