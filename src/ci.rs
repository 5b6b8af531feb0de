use crate::types::{CiVerdict, RunConclusion, WorkflowJob, WorkflowRun};

// --- Gate reduction ---

/// Intermediate gate status. `Failed` carries the run id so the caller can
/// fetch that run's jobs before refining the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Pending,
    Success,
    Cancelled,
    Failed { run_id: u64 },
}

/// Reduce the workflow runs for a head commit to a gate outcome.
///
/// Rules, first match wins:
/// 1. No run for the head yet: pending.
/// 2. Any run still executing while the gate has not succeeded: pending.
/// 3. Gate run succeeded: success.
/// 4. Gate run cancelled: cancelled.
/// 5. Gate run failed: failed (jobs decide the failure flavor).
/// 6. Gate run absent or inconclusive: pending.
pub fn gate_outcome(runs: &[WorkflowRun], gate_workflow: &str, head_sha: &str) -> GateOutcome {
    let relevant: Vec<&WorkflowRun> = runs.iter().filter(|r| r.head_sha == head_sha).collect();

    if relevant.is_empty() {
        return GateOutcome::Pending;
    }

    // Latest gate run for this head, by creation time.
    let gate = relevant
        .iter()
        .filter(|r| r.name.eq_ignore_ascii_case(gate_workflow))
        .max_by(|a, b| a.created_at.cmp(&b.created_at));

    let gate_succeeded = matches!(
        gate,
        Some(run) if run.conclusion == Some(RunConclusion::Success)
    );

    let any_executing = relevant.iter().any(|r| r.conclusion.is_none());
    if any_executing && !gate_succeeded {
        return GateOutcome::Pending;
    }

    match gate {
        Some(run) => match run.conclusion {
            Some(RunConclusion::Success) => GateOutcome::Success,
            Some(RunConclusion::Cancelled) => GateOutcome::Cancelled,
            Some(RunConclusion::Failure) => GateOutcome::Failed { run_id: run.id },
            Some(RunConclusion::Other) | None => GateOutcome::Pending,
        },
        None => GateOutcome::Pending,
    }
}

// --- Failure flavor ---

/// Refine a failed gate run into a verdict from its failed job names.
///
/// Matching is case-insensitive; the first rule that fires wins:
/// test/pytest/unittest, then mypy/typecheck/"type ", then
/// lint/ruff/black/format, then unknown.
pub fn classify_failed_jobs(jobs: &[WorkflowJob]) -> CiVerdict {
    let failed: Vec<String> = jobs
        .iter()
        .filter(|j| j.conclusion == Some(RunConclusion::Failure))
        .map(|j| j.name.to_lowercase())
        .collect();

    const TEST_MARKERS: [&str; 3] = ["test", "pytest", "unittest"];
    const TYPE_MARKERS: [&str; 3] = ["mypy", "typecheck", "type "];
    const LINT_MARKERS: [&str; 4] = ["lint", "ruff", "black", "format"];

    if matches_any(&failed, &TEST_MARKERS) {
        CiVerdict::FailureTests
    } else if matches_any(&failed, &TYPE_MARKERS) {
        CiVerdict::FailureTypes
    } else if matches_any(&failed, &LINT_MARKERS) {
        CiVerdict::FailureLint
    } else {
        CiVerdict::FailureUnknown
    }
}

fn matches_any(names: &[String], markers: &[&str]) -> bool {
    names
        .iter()
        .any(|name| markers.iter().any(|m| name.contains(m)))
}

/// Full classification when the caller already has the gate run's jobs.
/// The evaluator normally uses `gate_outcome` and fetches jobs on demand.
pub fn classify(
    runs: &[WorkflowRun],
    gate_workflow: &str,
    head_sha: &str,
    jobs: Option<&[WorkflowJob]>,
) -> CiVerdict {
    match gate_outcome(runs, gate_workflow, head_sha) {
        GateOutcome::Pending => CiVerdict::Pending,
        GateOutcome::Success => CiVerdict::Success,
        GateOutcome::Cancelled => CiVerdict::Cancelled,
        GateOutcome::Failed { .. } => match jobs {
            Some(jobs) => classify_failed_jobs(jobs),
            None => CiVerdict::FailureUnknown,
        },
    }
}
