#![allow(dead_code)]

use pr_keepalive::state::{render_sentinel, KeepaliveState, SUMMARY_MARKER};
use pr_keepalive::types::{
    Comment, CommitInfo, PrSnapshot, RunConclusion, RunReport, RunStatus, WorkflowJob, WorkflowRun,
};

/// Creates a `PrSnapshot` with an `agent:codex` label and the given body.
pub fn make_pr(number: u64, head_sha: &str, body: &str) -> PrSnapshot {
    PrSnapshot {
        number,
        head_sha: head_sha.to_string(),
        base_sha: "base-0".to_string(),
        head_ref: "agent/work".to_string(),
        base_ref: "main".to_string(),
        labels: vec!["agent:codex".to_string()],
        body: body.to_string(),
        is_fork: false,
    }
}

/// A PR body with one unchecked task.
pub fn one_task_body() -> String {
    "## Scope\n\nShip the thing.\n\n## Tasks\n\n- [ ] wire the parser\n".to_string()
}

/// A PR body with every checkbox checked.
pub fn all_done_body() -> String {
    "## Scope\n\nShip the thing.\n\n## Tasks\n\n- [x] wire the parser\n\n\
     ## Acceptance Criteria\n\n- [x] parser round-trips\n"
        .to_string()
}

/// Creates a workflow run for the gate workflow.
pub fn make_run(id: u64, name: &str, head_sha: &str, conclusion: Option<RunConclusion>) -> WorkflowRun {
    WorkflowRun {
        id,
        name: name.to_string(),
        head_sha: head_sha.to_string(),
        status: if conclusion.is_some() {
            "completed".to_string()
        } else {
            "in_progress".to_string()
        },
        conclusion,
        created_at: format!("2026-07-01T00:00:{:02}Z", id % 60),
        html_url: String::new(),
    }
}

pub fn make_job(name: &str, conclusion: RunConclusion) -> WorkflowJob {
    WorkflowJob {
        name: name.to_string(),
        conclusion: Some(conclusion),
    }
}

pub fn make_commit(sha: &str, message: &str) -> CommitInfo {
    CommitInfo {
        sha: sha.to_string(),
        message: message.to_string(),
    }
}

/// Renders a minimal controller-owned comment containing the given state.
pub fn state_comment(id: u64, state: &KeepaliveState) -> Comment {
    let sentinel = render_sentinel(state).expect("state serializes");
    Comment {
        id,
        body: format!("{}\n## Keepalive status\n\n{}", SUMMARY_MARKER, sentinel),
        created_at: format!("2026-07-01T00:00:{:02}Z", id % 60),
    }
}

pub fn success_report(head_sha: &str, files_changed: u32) -> RunReport {
    RunReport {
        status: RunStatus::Success,
        summary: "round complete".to_string(),
        exit_code: Some(0),
        files_changed,
        head_sha: head_sha.to_string(),
        duration_ms: Some(120_000),
    }
}

pub fn failure_report(summary: &str) -> RunReport {
    RunReport {
        status: RunStatus::Failure,
        summary: summary.to_string(),
        exit_code: Some(1),
        files_changed: 0,
        head_sha: String::new(),
        duration_ms: Some(30_000),
    }
}
