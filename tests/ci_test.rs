mod common;

use common::{make_job, make_run};
use pr_keepalive::ci::{classify, classify_failed_jobs, gate_outcome, GateOutcome};
use pr_keepalive::types::{CiVerdict, RunConclusion};

const GATE: &str = "CI";
const HEAD: &str = "sha-6";

// --- Gate reduction ---

#[test]
fn no_runs_is_pending() {
    assert_eq!(gate_outcome(&[], GATE, HEAD), GateOutcome::Pending);
}

#[test]
fn executing_gate_is_pending() {
    let runs = vec![make_run(1, GATE, HEAD, None)];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Pending);
}

#[test]
fn gate_success_is_success() {
    let runs = vec![make_run(1, GATE, HEAD, Some(RunConclusion::Success))];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Success);
}

#[test]
fn gate_success_ignores_other_workflows_still_running() {
    let runs = vec![
        make_run(1, GATE, HEAD, Some(RunConclusion::Success)),
        make_run(2, "Nightly", HEAD, None),
    ];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Success);
}

#[test]
fn cancelled_gate_is_cancelled() {
    let runs = vec![make_run(1, GATE, HEAD, Some(RunConclusion::Cancelled))];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Cancelled);
}

#[test]
fn failed_gate_reports_run_id() {
    let runs = vec![make_run(7, GATE, HEAD, Some(RunConclusion::Failure))];
    assert_eq!(
        gate_outcome(&runs, GATE, HEAD),
        GateOutcome::Failed { run_id: 7 }
    );
}

#[test]
fn non_gate_runs_alone_are_pending() {
    let runs = vec![make_run(1, "Docs", HEAD, Some(RunConclusion::Success))];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Pending);
}

#[test]
fn stale_head_runs_are_ignored() {
    let runs = vec![make_run(1, GATE, "sha-5", Some(RunConclusion::Success))];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Pending);
}

#[test]
fn latest_gate_attempt_wins() {
    let runs = vec![
        make_run(1, GATE, HEAD, Some(RunConclusion::Failure)),
        make_run(2, GATE, HEAD, Some(RunConclusion::Success)),
    ];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Success);
}

#[test]
fn gate_name_matching_is_case_insensitive() {
    let runs = vec![make_run(1, "ci", HEAD, Some(RunConclusion::Success))];
    assert_eq!(gate_outcome(&runs, GATE, HEAD), GateOutcome::Success);
}

// --- Failure flavors ---

#[test]
fn test_job_failure_is_failure_tests() {
    let jobs = vec![make_job("test (3.11)", RunConclusion::Failure)];
    assert_eq!(classify_failed_jobs(&jobs), CiVerdict::FailureTests);
}

#[test]
fn pytest_job_failure_is_failure_tests() {
    let jobs = vec![make_job("run-pytest", RunConclusion::Failure)];
    assert_eq!(classify_failed_jobs(&jobs), CiVerdict::FailureTests);
}

#[test]
fn mypy_job_failure_is_failure_types() {
    let jobs = vec![make_job("mypy strict", RunConclusion::Failure)];
    assert_eq!(classify_failed_jobs(&jobs), CiVerdict::FailureTypes);
}

#[test]
fn lint_job_failure_is_failure_lint() {
    let jobs = vec![make_job("ruff check", RunConclusion::Failure)];
    assert_eq!(classify_failed_jobs(&jobs), CiVerdict::FailureLint);
}

#[test]
fn test_rule_beats_lint_rule() {
    let jobs = vec![
        make_job("lint", RunConclusion::Failure),
        make_job("unittest suite", RunConclusion::Failure),
    ];
    assert_eq!(classify_failed_jobs(&jobs), CiVerdict::FailureTests);
}

#[test]
fn unmatched_job_is_failure_unknown() {
    let jobs = vec![make_job("deploy preview", RunConclusion::Failure)];
    assert_eq!(classify_failed_jobs(&jobs), CiVerdict::FailureUnknown);
}

#[test]
fn succeeded_jobs_are_not_inspected() {
    let jobs = vec![
        make_job("test (3.11)", RunConclusion::Success),
        make_job("package", RunConclusion::Failure),
    ];
    assert_eq!(classify_failed_jobs(&jobs), CiVerdict::FailureUnknown);
}

// --- Full classification ---

#[test]
fn classify_combines_gate_and_jobs() {
    let runs = vec![make_run(7, GATE, HEAD, Some(RunConclusion::Failure))];
    let jobs = vec![make_job("typecheck", RunConclusion::Failure)];
    assert_eq!(
        classify(&runs, GATE, HEAD, Some(&jobs)),
        CiVerdict::FailureTypes
    );
}

#[test]
fn classify_without_jobs_is_failure_unknown() {
    let runs = vec![make_run(7, GATE, HEAD, Some(RunConclusion::Failure))];
    assert_eq!(classify(&runs, GATE, HEAD, None), CiVerdict::FailureUnknown);
}
