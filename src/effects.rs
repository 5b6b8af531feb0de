use crate::config::BodyOverrides;
use crate::failure::{classify_failure, recovery_hint, ErrorCategory, PlatformError};
use crate::github::{with_backoff, Platform};
use crate::state::{
    render_sentinel, FailureRecord, HistoryEntry, KeepaliveState, SUMMARY_MARKER,
};
use crate::types::{
    Action, CheckboxCounts, CiVerdict, PrSnapshot, Reason, RunReport, RunStatus,
};

/// Label added when the failure threshold is reached. Never removed
/// automatically; removal is an explicit operator signal.
pub const NEEDS_HUMAN_LABEL: &str = "needs-human";
pub const NEEDS_ATTENTION_LABEL: &str = "agent:needs-attention";
/// Transient label cleared once the head is observed to advance.
pub const SYNC_REQUIRED_LABEL: &str = "agents:sync-required";

const FAILURE_REASON: &str = "agent-run-failed";

// --- State composition ---

/// Inputs to one state transition. `report` is present only on the
/// post-round path (`update_summary`); planning passes `None`.
pub struct TransitionContext<'a> {
    pub report: Option<&'a RunReport>,
    pub overrides: &'a BodyOverrides,
    /// Head the PR is currently at, used for history and sync detection.
    pub observed_head: &'a str,
    /// Set by the reconciliation pass; `None` keeps the prior flag.
    pub needs_task_reconciliation: Option<bool>,
    pub now: &'a str,
}

/// A composed transition: the next durable state plus the label effects
/// that must accompany it.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub next: KeepaliveState,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub transient_note: bool,
    pub threshold_crossed: bool,
    pub error_category: Option<ErrorCategory>,
}

/// Compose the next state from the prior one.
///
/// Accounting rules:
/// - run + successful round: iteration += 1, failure cleared
/// - run + transient failure: failure cleared, resume note emitted
/// - non-transient failure: failure count += 1; reaching the threshold adds
///   the `needs-human` and `agent:needs-attention` labels
/// - wait/skip/stop never touch iteration or the failure counter
/// - a stale caller-supplied iteration loses to the persisted value
pub fn compose_transition(
    prior: &KeepaliveState,
    pr: &PrSnapshot,
    ctx: &TransitionContext,
) -> StateTransition {
    let mut next = prior.clone();
    let mut add_labels = Vec::new();
    let mut remove_labels = Vec::new();
    let mut transient_note = false;
    let mut threshold_crossed = false;
    let mut error_category = None;

    // Body overrides update the persisted knobs; the persisted iteration
    // wins over anything smaller.
    if let Some(max) = ctx.overrides.max_iterations {
        next.max_iterations = max;
    }
    if let Some(threshold) = ctx.overrides.failure_threshold {
        next.failure_threshold = threshold;
    }
    if let Some(iteration) = ctx.overrides.iteration {
        next.iteration = next.iteration.max(iteration);
    }

    if next.trace_id.is_empty() {
        next.trace_id = ctx
            .overrides
            .trace
            .clone()
            .unwrap_or_else(|| format!("{}-{:08x}", pr.number, rand::random::<u32>()));
    }

    if let Some(report) = ctx.report {
        match report.status {
            RunStatus::Success => {
                next.iteration += 1;
                next.failure = None;
                if !report.head_sha.is_empty() {
                    next.last_head_sha = report.head_sha.clone();
                }
                next.last_files_changed = report.files_changed;
            }
            RunStatus::Failure => {
                let category = classify_failure(report.exit_code, &report.summary);
                error_category = Some(category);
                if category.counts_toward_threshold() {
                    let record = increment_failure(prior.failure.as_ref(), ctx.now);
                    if record.count >= next.failure_threshold {
                        threshold_crossed = true;
                        add_labels.push(NEEDS_HUMAN_LABEL.to_string());
                        add_labels.push(NEEDS_ATTENTION_LABEL.to_string());
                    }
                    next.failure = Some(record);
                } else {
                    // Transient: treat as a resume, never count it.
                    next.failure = None;
                    transient_note = true;
                }
                if !report.head_sha.is_empty() {
                    next.last_head_sha = report.head_sha.clone();
                }
                next.last_files_changed = report.files_changed;
            }
        }
    }
    // No report (wait/skip/stop or planning): iteration and failure are
    // untouched by design.

    if let Some(flag) = ctx.needs_task_reconciliation {
        next.needs_task_reconciliation = flag;
    }

    // Clear the sync marker once the head has moved past the recorded one.
    if pr.has_label(SYNC_REQUIRED_LABEL)
        && !prior.last_head_sha.is_empty()
        && ctx.observed_head != prior.last_head_sha
    {
        remove_labels.push(SYNC_REQUIRED_LABEL.to_string());
    }

    StateTransition {
        next,
        add_labels,
        remove_labels,
        transient_note,
        threshold_crossed,
        error_category,
    }
}

/// Append one history row for this invocation, dropping the oldest rows
/// beyond `limit`. Called after the post-round decision is known so the
/// row records what the controller actually decided.
pub fn append_history(
    state: &mut KeepaliveState,
    action: Action,
    reason: Reason,
    head_sha: &str,
    now: &str,
    limit: usize,
) {
    state.history.push(HistoryEntry {
        iteration: state.iteration,
        action: action.as_str().to_string(),
        reason: reason.as_str().to_string(),
        head_sha: head_sha.to_string(),
        timestamp: now.to_string(),
    });
    let limit = limit.max(1);
    if state.history.len() > limit {
        let drop = state.history.len() - limit;
        state.history.drain(..drop);
    }
}

fn increment_failure(prior: Option<&FailureRecord>, now: &str) -> FailureRecord {
    match prior {
        Some(record) if record.count > 0 => FailureRecord {
            reason: record.reason.clone(),
            count: record.count + 1,
            first_seen: record.first_seen.clone(),
            last_seen: now.to_string(),
        },
        _ => FailureRecord {
            reason: FAILURE_REASON.to_string(),
            count: 1,
            first_seen: now.to_string(),
            last_seen: now.to_string(),
        },
    }
}

// --- Comment rendering ---

/// Advisory context rendered into the status comment alongside the state.
pub struct RenderContext<'a> {
    pub action: Action,
    pub reason: Reason,
    pub counts: CheckboxCounts,
    pub ci: Option<CiVerdict>,
    pub transient_note: bool,
    pub threshold_crossed: bool,
    pub error_category: Option<ErrorCategory>,
    pub last_run: Option<&'a RunReport>,
    /// "Agent is working" banner for mark_running updates.
    pub running_note: Option<&'a str>,
}

fn short_sha(sha: &str) -> &str {
    if sha.len() > 7 {
        &sha[..7]
    } else {
        sha
    }
}

/// Render the full status comment body. The whole body is rewritten each
/// round; the sentinel at the bottom is the machine-readable truth.
pub fn render_status_comment(
    state: &KeepaliveState,
    ctx: &RenderContext,
) -> Result<String, String> {
    let mut blocks: Vec<String> = Vec::new();

    blocks.push(format!("{}\n## Keepalive status", SUMMARY_MARKER));

    if let Some(note) = ctx.running_note {
        blocks.push(format!("> **Agent is working** — {}", note));
    }

    let mut table = vec![
        "| Field | Value |".to_string(),
        "| --- | --- |".to_string(),
        format!("| Action | {} |", ctx.action),
        format!("| Reason | {} |", ctx.reason),
        format!(
            "| Iteration | {} / {} |",
            state.iteration, state.max_iterations
        ),
        format!(
            "| Tasks | {}/{} complete |",
            ctx.counts.checked, ctx.counts.total
        ),
    ];
    if let Some(ci) = ctx.ci {
        table.push(format!("| CI | {} |", ci));
    }
    if !state.last_head_sha.is_empty() {
        table.push(format!("| Last head | `{}` |", short_sha(&state.last_head_sha)));
    }
    if !state.trace_id.is_empty() {
        table.push(format!("| Trace | `{}` |", state.trace_id));
    }
    blocks.push(table.join("\n"));

    if let Some(report) = ctx.last_run {
        let outcome = match report.status {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        };
        let mut lines = vec![
            "### Last Run".to_string(),
            format!("- **Outcome:** {}", outcome),
            format!("- **Files changed:** {}", report.files_changed),
        ];
        if !report.summary.is_empty() {
            lines.push(format!("- **Summary:** {}", report.summary));
        }
        blocks.push(lines.join("\n"));
    }

    if ctx.transient_note {
        blocks.push(
            "> **Transient Issue Detected** — the last round failed with a \
             transient error. The failure counter was not incremented; the \
             next round resumes automatically."
                .to_string(),
        );
    }

    if let Some(failure) = state.failure.as_ref().filter(|f| f.count > 0) {
        blocks.push(format!(
            "### Failures\n\
             | Reason | Count | First seen | Last seen |\n\
             | --- | --- | --- | --- |\n\
             | {} | {}/{} | {} | {} |",
            failure.reason,
            failure.count,
            state.failure_threshold,
            failure.first_seen,
            failure.last_seen
        ));
    }

    if ctx.threshold_crossed {
        let hint = ctx
            .error_category
            .map(recovery_hint)
            .unwrap_or("Inspect the run logs.");
        blocks.push(format!(
            "### Operator action required\n\n\
             The failure threshold has been reached and the loop is parked.\n\n\
             - {}\n\
             - After remediation, remove the `{}` label to resume.\n\
             - Alternatively, reset `\"failure\"` to `{{}}` in the state block below.",
            hint, NEEDS_HUMAN_LABEL
        ));
    } else if let Some(category) = ctx.error_category {
        blocks.push(format!(
            "> Last error category: **{}**. {}",
            category,
            recovery_hint(category)
        ));
    }

    if !state.history.is_empty() {
        let mut lines = vec![
            "### History".to_string(),
            "| Iteration | Action | Reason | Head | When |".to_string(),
            "| --- | --- | --- | --- | --- |".to_string(),
        ];
        for entry in &state.history {
            lines.push(format!(
                "| {} | {} | {} | `{}` | {} |",
                entry.iteration,
                entry.action,
                entry.reason,
                short_sha(&entry.head_sha),
                entry.timestamp
            ));
        }
        blocks.push(lines.join("\n"));
    }

    blocks.push(render_sentinel(state)?);

    Ok(blocks.join("\n\n"))
}

// --- Idempotent application ---

/// Upsert the status comment: create when missing, update when present,
/// and skip the write entirely when the rendered body is unchanged.
/// Returns the comment id.
pub async fn upsert_status_comment<P: Platform>(
    platform: &P,
    pr_number: u64,
    comment_id: Option<u64>,
    existing_body: Option<&str>,
    body: &str,
    max_attempts: u32,
) -> Result<u64, PlatformError> {
    match comment_id {
        Some(id) => {
            if existing_body == Some(body) {
                return Ok(id);
            }
            with_backoff(max_attempts, || platform.update_comment(id, body)).await?;
            Ok(id)
        }
        None => with_backoff(max_attempts, || platform.create_comment(pr_number, body)).await,
    }
}

/// Apply label effects. Labels already present are skipped; threshold
/// labels are only ever added here, never removed.
pub async fn apply_labels<P: Platform>(
    platform: &P,
    pr: &PrSnapshot,
    transition: &StateTransition,
    max_attempts: u32,
) -> Result<(), PlatformError> {
    for label in &transition.add_labels {
        if pr.has_label(label) {
            continue;
        }
        with_backoff(max_attempts, || platform.add_label(pr.number, label)).await?;
    }
    for label in &transition.remove_labels {
        if !pr.has_label(label) {
            continue;
        }
        with_backoff(max_attempts, || platform.remove_label(pr.number, label)).await?;
    }
    Ok(())
}
