use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::checklist;
use crate::ci::{self, GateOutcome};
use crate::config::{parse_body_overrides, KeepaliveConfig};
use crate::decide::{decide, DecisionInputs};
use crate::effects::{
    append_history, apply_labels, compose_transition, render_status_comment,
    upsert_status_comment, RenderContext, TransitionContext,
};
use crate::github::{with_backoff, Platform};
use crate::metrics::{self, MetricsRecord};
use crate::score;
use crate::state::load_state;
use crate::types::{
    Action, CiVerdict, Comment, Confidence, IterationDecision, PrSnapshot, Reason, RunReport,
    RunStatus, WorkflowRun,
};
use crate::{log_error, log_info, log_warn};

// --- Shutdown handling ---

/// Global shutdown flag shared with signal handlers.
fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

/// Check if a shutdown has been requested via signal.
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Install signal handlers for SIGTERM and SIGINT that set the shutdown flag.
///
/// Call once at program startup. Subsequent calls are safe (re-registers
/// handlers).
pub fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(())
}

// Relaxed is safe: the flag is only a best-effort stop signal checked
// between suspension points.
#[cfg(test)]
fn set_shutdown_flag_for_testing(value: bool) {
    shutdown_flag().store(value, Ordering::Relaxed);
}

// --- Public types ---

/// Result of an auto-reconciliation pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconcileOutcome {
    pub updated: bool,
    pub tasks_checked: Vec<String>,
}

// --- Evaluator ---

/// Composes the parser, codec, classifiers, scorer, decision engine, and
/// effects layer. The only component that reads or writes the platform;
/// all branching policy lives in `decide`.
pub struct Evaluator<'a, P: Platform> {
    platform: &'a P,
    config: &'a KeepaliveConfig,
    cancel: CancellationToken,
}

impl<'a, P: Platform> Evaluator<'a, P> {
    pub fn new(platform: &'a P, config: &'a KeepaliveConfig) -> Self {
        Self::with_cancellation(platform, config, CancellationToken::new())
    }

    pub fn with_cancellation(
        platform: &'a P,
        config: &'a KeepaliveConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            platform,
            config,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), String> {
        if self.cancel.is_cancelled() || is_shutdown_requested() {
            return Err("Shutdown requested".to_string());
        }
        Ok(())
    }

    fn attempts(&self) -> u32 {
        self.config.execution.max_attempts
    }

    /// Gather the PR, its comments, and the workflow runs for its head.
    /// The comment and run listings are independent and fetched concurrently.
    async fn gather(
        &self,
        pr_number: u64,
    ) -> Result<(PrSnapshot, Vec<Comment>, Vec<WorkflowRun>), String> {
        let attempts = self.attempts();
        let pr = with_backoff(attempts, || self.platform.get_pr(pr_number))
            .await
            .map_err(|e| format!("Failed to fetch PR #{}: {}", pr_number, e))?;
        self.check_cancelled()?;

        let (comments, runs) = tokio::join!(
            with_backoff(attempts, || self.platform.list_comments(pr_number)),
            with_backoff(attempts, || self.platform.list_runs(&pr.head_sha)),
        );
        let comments =
            comments.map_err(|e| format!("Failed to list comments on #{}: {}", pr_number, e))?;
        let runs = runs.map_err(|e| format!("Failed to list runs for #{}: {}", pr_number, e))?;

        Ok((pr, comments, runs))
    }

    /// Reduce the runs to a verdict, fetching the failed gate run's jobs
    /// only when needed.
    async fn ci_verdict(&self, runs: &[WorkflowRun], head_sha: &str) -> Result<CiVerdict, String> {
        match ci::gate_outcome(runs, &self.config.github.gate_workflow, head_sha) {
            GateOutcome::Pending => Ok(CiVerdict::Pending),
            GateOutcome::Success => Ok(CiVerdict::Success),
            GateOutcome::Cancelled => Ok(CiVerdict::Cancelled),
            GateOutcome::Failed { run_id } => {
                let jobs = with_backoff(self.attempts(), || self.platform.list_run_jobs(run_id))
                    .await
                    .map_err(|e| format!("Failed to list jobs for run {}: {}", run_id, e))?;
                Ok(ci::classify_failed_jobs(&jobs))
            }
        }
    }

    /// Read-only planning: decide what to do with the PR right now.
    pub async fn evaluate(
        &self,
        pr_number: u64,
        active_runs: u32,
    ) -> Result<IterationDecision, String> {
        self.check_cancelled()?;
        let (pr, comments, runs) = self.gather(pr_number).await?;
        let (_, state) = load_state(&comments)?;
        let sections = checklist::parse_sections(&pr.body);
        let overrides = parse_body_overrides(&pr.body);
        let verdict = self.ci_verdict(&runs, &pr.head_sha).await?;

        let decision = decide(&DecisionInputs {
            pr: &pr,
            sections: &sections,
            state: &state,
            ci: verdict,
            overrides: &overrides,
            active_runs,
            default_run_cap: self.config.execution.run_cap,
        });

        log_info!(
            "{} ({}): tasks {}/{} complete",
            decision.action,
            decision.reason,
            decision.checkbox_counts.checked,
            decision.checkbox_counts.total
        );
        Ok(decision)
    }

    /// Post-round reconciliation and persistence.
    ///
    /// Applies the iteration/failure accounting for the finished round,
    /// reconciles checkboxes when the round changed files, rewrites the
    /// status comment, and applies label effects. A permanent effects
    /// failure leaves durable state untouched and yields a synthetic
    /// `wait: effects-failed`.
    pub async fn update_summary(
        &self,
        pr_number: u64,
        report: &RunReport,
    ) -> Result<IterationDecision, String> {
        let started = Instant::now();
        self.check_cancelled()?;

        let (pr, comments, runs) = self.gather(pr_number).await?;
        let (comment_id, prior) = load_state(&comments)?;
        let overrides = parse_body_overrides(&pr.body);
        let verdict = self.ci_verdict(&runs, &pr.head_sha).await?;

        // Checkbox reconciliation: only a successful round that changed
        // files can imply task completion.
        let mut body = pr.body.clone();
        let mut reconciliation_flag = None;
        if report.status == RunStatus::Success {
            if report.files_changed > 0 {
                let base = if prior.last_head_sha.is_empty() {
                    pr.base_sha.clone()
                } else {
                    prior.last_head_sha.clone()
                };
                let head = if report.head_sha.is_empty() {
                    pr.head_sha.clone()
                } else {
                    report.head_sha.clone()
                };
                let reconciled = self.reconcile_body(&pr, &body, &base, &head).await;
                match reconciled {
                    Ok((Some(new_body), outcome, any_high)) => {
                        // Persist the toggled glyphs; on failure the original
                        // body stays authoritative and the next round retries.
                        let write = with_backoff(self.attempts(), || {
                            self.platform.update_pr_body(pr_number, &new_body)
                        })
                        .await;
                        match write {
                            Ok(()) => {
                                log_info!(
                                    "Auto-checked {} task(s): {}",
                                    outcome.tasks_checked.len(),
                                    outcome.tasks_checked.join("; ")
                                );
                                body = new_body;
                            }
                            Err(e) => {
                                log_warn!("Checkbox update failed: {}", e);
                            }
                        }
                        reconciliation_flag = Some(!any_high);
                    }
                    Ok((None, _, any_high)) => {
                        reconciliation_flag = Some(!any_high);
                    }
                    Err(e) => {
                        log_warn!("Reconciliation skipped: {}", e);
                    }
                }
            } else {
                reconciliation_flag = Some(false);
            }
        }

        let sections = checklist::parse_sections(&body);
        let now = chrono::Utc::now().to_rfc3339();

        let mut transition = compose_transition(
            &prior,
            &pr,
            &TransitionContext {
                report: Some(report),
                overrides: &overrides,
                observed_head: &pr.head_sha,
                needs_task_reconciliation: reconciliation_flag,
                now: &now,
            },
        );

        // Decide against the post-round state so completion and budget
        // checks see the round that just finished.
        let decision = decide(&DecisionInputs {
            pr: &pr,
            sections: &sections,
            state: &transition.next,
            ci: verdict,
            overrides: &overrides,
            active_runs: 0,
            default_run_cap: self.config.execution.run_cap,
        });

        append_history(
            &mut transition.next,
            decision.action,
            decision.reason,
            &pr.head_sha,
            &now,
            self.config.execution.history_limit,
        );

        let rendered = render_status_comment(
            &transition.next,
            &RenderContext {
                action: decision.action,
                reason: decision.reason,
                counts: decision.checkbox_counts,
                ci: Some(verdict),
                transient_note: transition.transient_note,
                threshold_crossed: transition.threshold_crossed,
                error_category: transition.error_category,
                last_run: Some(report),
                running_note: None,
            },
        )?;

        self.check_cancelled()?;

        let existing_body = comment_id
            .and_then(|id| comments.iter().find(|c| c.id == id))
            .map(|c| c.body.clone());

        let attempts = self.attempts();
        let effects_result = {
            match upsert_status_comment(
                self.platform,
                pr_number,
                comment_id,
                existing_body.as_deref(),
                &rendered,
                attempts,
            )
            .await
            {
                Ok(_) => apply_labels(self.platform, &pr, &transition, attempts).await,
                Err(e) => Err(e),
            }
        };

        let final_decision = match effects_result {
            Ok(()) => decision,
            Err(e) => {
                log_error!("Effects failed, decision left unapplied: {}", e);
                IterationDecision::effects_failed(decision.checkbox_counts)
            }
        };

        self.emit_metrics(
            pr_number,
            transition.next.iteration,
            &final_decision,
            transition.error_category.map(|c| c.as_str().to_string()),
            started.elapsed().as_millis() as u64,
            &now,
        );

        Ok(final_decision)
    }

    /// Intermediate "agent is working" indicator. A pure comment update:
    /// no state accounting, no history, no labels.
    pub async fn mark_running(&self, pr_number: u64, info: &str) -> Result<(), String> {
        self.check_cancelled()?;
        let attempts = self.attempts();
        let pr = with_backoff(attempts, || self.platform.get_pr(pr_number))
            .await
            .map_err(|e| format!("Failed to fetch PR #{}: {}", pr_number, e))?;
        let comments = with_backoff(attempts, || self.platform.list_comments(pr_number))
            .await
            .map_err(|e| format!("Failed to list comments on #{}: {}", pr_number, e))?;

        let (comment_id, state) = load_state(&comments)?;
        let sections = checklist::parse_sections(&pr.body);

        let rendered = render_status_comment(
            &state,
            &RenderContext {
                action: Action::Run,
                reason: Reason::Ready,
                counts: sections.counts(),
                ci: None,
                transient_note: false,
                threshold_crossed: false,
                error_category: None,
                last_run: None,
                running_note: Some(info),
            },
        )?;

        let existing_body = comment_id
            .and_then(|id| comments.iter().find(|c| c.id == id))
            .map(|c| c.body.clone());

        upsert_status_comment(
            self.platform,
            pr_number,
            comment_id,
            existing_body.as_deref(),
            &rendered,
            attempts,
        )
        .await
        .map_err(|e| format!("Failed to update running indicator: {}", e))?;
        Ok(())
    }

    /// Check off tasks the commits in `base..head` complete with high
    /// confidence, writing the body back when anything toggled.
    pub async fn auto_reconcile_tasks(
        &self,
        pr_number: u64,
        base_sha: &str,
        head_sha: &str,
    ) -> Result<ReconcileOutcome, String> {
        self.check_cancelled()?;
        let pr = with_backoff(self.attempts(), || self.platform.get_pr(pr_number))
            .await
            .map_err(|e| format!("Failed to fetch PR #{}: {}", pr_number, e))?;

        let (new_body, outcome, _) = self
            .reconcile_body(&pr, &pr.body, base_sha, head_sha)
            .await?;

        if let Some(body) = new_body {
            with_backoff(self.attempts(), || {
                self.platform.update_pr_body(pr_number, &body)
            })
            .await
            .map_err(|e| format!("Failed to update PR body: {}", e))?;
        }

        Ok(outcome)
    }

    /// Score unchecked tasks against the compared range and toggle the
    /// high-confidence ones in the body. Returns the new body (when any
    /// checkbox toggled), the outcome, and whether any task reached high
    /// confidence. Scope and already-checked items are never touched.
    async fn reconcile_body(
        &self,
        pr: &PrSnapshot,
        body: &str,
        base_sha: &str,
        head_sha: &str,
    ) -> Result<(Option<String>, ReconcileOutcome, bool), String> {
        let attempts = self.attempts();
        let comparison = with_backoff(attempts, || self.platform.compare(base_sha, head_sha))
            .await
            .map_err(|e| format!("Failed to compare {}..{}: {}", base_sha, head_sha, e))?;

        let files = if comparison.files.is_empty() {
            with_backoff(attempts, || self.platform.list_pr_files(pr.number))
                .await
                .map_err(|e| format!("Failed to list PR files: {}", e))?
        } else {
            comparison.files.clone()
        };

        let sections = checklist::parse_sections(body);
        let matches = score::score_unchecked_tasks(&sections.tasks, &comparison.commits, &files);

        let mut any_high = false;
        let mut tasks_checked = Vec::new();
        let mut current = body.to_string();
        let mut changed = false;

        for task in &matches {
            if task.score.confidence != Confidence::High {
                continue;
            }
            any_high = true;
            if let Some(next_body) = checklist::toggle_checkbox(&current, &task.text) {
                current = next_body;
                changed = true;
                tasks_checked.push(task.text.clone());
            }
        }

        Ok((
            changed.then_some(current),
            ReconcileOutcome {
                updated: changed,
                tasks_checked,
            },
            any_high,
        ))
    }

    fn emit_metrics(
        &self,
        pr_number: u64,
        iteration_after: u32,
        decision: &IterationDecision,
        error_category: Option<String>,
        duration_ms: u64,
        timestamp: &str,
    ) {
        let Some(path) = metrics::resolve_path(self.config) else {
            return;
        };
        let record = MetricsRecord {
            pr_number,
            iteration_after,
            action: decision.action.as_str().to_string(),
            reason: decision.reason.as_str().to_string(),
            error_category,
            duration_ms,
            tasks_total: decision.checkbox_counts.total,
            tasks_complete: decision.checkbox_counts.checked,
            timestamp: timestamp.to_string(),
        };
        if let Err(e) = metrics::append_record(&path, &record) {
            log_warn!("Metrics record dropped: {}", e);
        }
    }
}
