use serde::{Deserialize, Serialize};

// --- Enums ---

/// What the controller should do with this PR on this invocation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Run,
    Fix,
    Wait,
    Stop,
    Skip,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Run => "run",
            Action::Fix => "fix",
            Action::Wait => "wait",
            Action::Stop => "stop",
            Action::Skip => "skip",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn parse_action(s: &str) -> Result<Action, String> {
    match s.to_lowercase().as_str() {
        "run" => Ok(Action::Run),
        "fix" => Ok(Action::Fix),
        "wait" => Ok(Action::Wait),
        "stop" => Ok(Action::Stop),
        "skip" => Ok(Action::Skip),
        _ => Err(format!(
            "Invalid action '{}': expected run, fix, wait, stop, or skip",
            s
        )),
    }
}

/// Which instruction template the downstream agent runner selects.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    Normal,
    FixCi,
    Verify,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::Normal => "normal",
            PromptMode::FixCi => "fix_ci",
            PromptMode::Verify => "verify",
        }
    }
}

impl std::fmt::Display for PromptMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn parse_prompt_mode(s: &str) -> Result<PromptMode, String> {
    match s.to_lowercase().as_str() {
        "normal" => Ok(PromptMode::Normal),
        "fix_ci" | "fix-ci" => Ok(PromptMode::FixCi),
        "verify" => Ok(PromptMode::Verify),
        _ => Err(format!(
            "Invalid prompt mode '{}': expected normal, fix_ci, or verify",
            s
        )),
    }
}

/// Reduced verdict over all workflow runs for the PR's current head.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CiVerdict {
    Success,
    Pending,
    FailureTests,
    FailureLint,
    FailureTypes,
    FailureUnknown,
    Cancelled,
}

impl CiVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiVerdict::Success => "success",
            CiVerdict::Pending => "pending",
            CiVerdict::FailureTests => "failure-tests",
            CiVerdict::FailureLint => "failure-lint",
            CiVerdict::FailureTypes => "failure-types",
            CiVerdict::FailureUnknown => "failure-unknown",
            CiVerdict::Cancelled => "cancelled",
        }
    }

    /// True for any of the failure-* verdicts.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CiVerdict::FailureTests
                | CiVerdict::FailureLint
                | CiVerdict::FailureTypes
                | CiVerdict::FailureUnknown
        )
    }
}

impl std::fmt::Display for CiVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Short reason code attached to every decision.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    MissingAgentLabel,
    KeepaliveDisabled,
    Paused,
    NeedsHuman,
    RunCapReached,
    TasksComplete,
    MissingSections,
    MaxIterationsUnproductive,
    ReadyExtended,
    GatePending,
    GateCancelled,
    FixTest,
    FixMypy,
    FixUnknown,
    GateNotSuccess,
    Ready,
    EffectsFailed,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::MissingAgentLabel => "missing-agent-label",
            Reason::KeepaliveDisabled => "keepalive-disabled",
            Reason::Paused => "paused",
            Reason::NeedsHuman => "needs-human",
            Reason::RunCapReached => "run-cap-reached",
            Reason::TasksComplete => "tasks-complete",
            Reason::MissingSections => "missing-sections",
            Reason::MaxIterationsUnproductive => "max-iterations-unproductive",
            Reason::ReadyExtended => "ready-extended",
            Reason::GatePending => "gate-pending",
            Reason::GateCancelled => "gate-cancelled",
            Reason::FixTest => "fix-test",
            Reason::FixMypy => "fix-mypy",
            Reason::FixUnknown => "fix-unknown",
            Reason::GateNotSuccess => "gate-not-success",
            Reason::Ready => "ready",
            Reason::EffectsFailed => "effects-failed",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence that recent commits imply a task is complete.
///
/// Ordered: `None < Low < Medium < High`. Only `High` is allowed to toggle
/// a checkbox.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Outcome reported by the agent runner for one completed round.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
}

pub fn parse_run_status(s: &str) -> Result<RunStatus, String> {
    match s.to_lowercase().as_str() {
        "success" => Ok(RunStatus::Success),
        "failure" | "failed" => Ok(RunStatus::Failure),
        _ => Err(format!(
            "Invalid run status '{}': expected success or failure",
            s
        )),
    }
}

/// Conclusion of a completed workflow run or job. A run that is still
/// executing has no conclusion (`None` on the containing struct).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    /// Anything else the platform reports (skipped, neutral, timed_out, ...).
    #[serde(other)]
    Other,
}

// --- Structs ---

/// Read-only view of a pull request, captured once per invocation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PrSnapshot {
    pub number: u64,
    pub head_sha: String,
    pub base_sha: String,
    pub head_ref: String,
    pub base_ref: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_fork: bool,
}

impl PrSnapshot {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l == name)
    }

    /// Agent backend selected by an `agent:<name>` label.
    ///
    /// Control labels such as `agent:needs-attention` are not backends and
    /// are skipped. Returns the first matching label's suffix.
    pub fn agent_type(&self) -> Option<&str> {
        self.labels.iter().find_map(|l| {
            let name = l.strip_prefix("agent:")?;
            if name.is_empty() || name == "needs-attention" {
                None
            } else {
                Some(name)
            }
        })
    }

    /// Per-PR concurrent run cap from `agents:max-parallel:<K>` or
    /// `agents:max-runs:<K>` labels. Returns `None` when neither is present
    /// or the suffix is not a positive integer.
    pub fn run_cap_override(&self) -> Option<u32> {
        self.labels.iter().find_map(|l| {
            let suffix = l
                .strip_prefix("agents:max-parallel:")
                .or_else(|| l.strip_prefix("agents:max-runs:"))?;
            suffix.parse::<u32>().ok().filter(|k| *k > 0)
        })
    }
}

/// An issue comment on the PR.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    #[serde(default)]
    pub created_at: String,
}

/// One workflow run reported by the platform for a head commit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: String,
    pub head_sha: String,
    /// Platform status string (`queued`, `in_progress`, `completed`).
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub html_url: String,
}

/// One job within a workflow run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkflowJob {
    pub name: String,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
}

/// A commit in the compared range.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// Result of comparing two commits: the commits between them and the files
/// they touched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Comparison {
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Checkbox tally over the Tasks and Acceptance Criteria sections combined.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CheckboxCounts {
    pub total: u32,
    pub checked: u32,
    pub unchecked: u32,
}

impl CheckboxCounts {
    pub fn new(checked: u32, unchecked: u32) -> Self {
        Self {
            total: checked + unchecked,
            checked,
            unchecked,
        }
    }
}

/// Output of the decision engine for one invocation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IterationDecision {
    pub action: Action,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_mode: Option<PromptMode>,
    pub checkbox_counts: CheckboxCounts,
    /// Rendered block the runner appends to the agent's prompt.
    pub task_appendix: String,
    /// From the `agent:<name>` label; empty when absent.
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub has_agent_label: bool,
}

impl IterationDecision {
    /// Synthetic decision returned when the effects layer could not persist.
    /// The next invocation retries from the last durable state.
    pub fn effects_failed(counts: CheckboxCounts) -> Self {
        Self {
            action: Action::Wait,
            reason: Reason::EffectsFailed,
            prompt_mode: None,
            checkbox_counts: counts,
            task_appendix: String::new(),
            agent_type: String::new(),
            has_agent_label: false,
        }
    }
}

/// What the surrounding workflow reports after an agent round finishes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunReport {
    pub status: RunStatus,
    /// Free-form failure summary or success note from the runner.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub files_changed: u32,
    /// Head commit at which the round ended.
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_skips_control_labels() {
        let pr = PrSnapshot {
            labels: vec![
                "agent:needs-attention".to_string(),
                "agent:codex".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(pr.agent_type(), Some("codex"));
    }

    #[test]
    fn agent_type_absent() {
        let pr = PrSnapshot {
            labels: vec!["bug".to_string()],
            ..Default::default()
        };
        assert_eq!(pr.agent_type(), None);
    }

    #[test]
    fn run_cap_override_parses_both_spellings() {
        let pr = PrSnapshot {
            labels: vec!["agents:max-parallel:3".to_string()],
            ..Default::default()
        };
        assert_eq!(pr.run_cap_override(), Some(3));

        let pr = PrSnapshot {
            labels: vec!["agents:max-runs:2".to_string()],
            ..Default::default()
        };
        assert_eq!(pr.run_cap_override(), Some(2));
    }

    #[test]
    fn run_cap_override_rejects_zero_and_garbage() {
        let pr = PrSnapshot {
            labels: vec![
                "agents:max-parallel:0".to_string(),
                "agents:max-runs:lots".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(pr.run_cap_override(), None);
    }

    #[test]
    fn parse_helpers_accept_canonical_spellings() {
        assert_eq!(parse_action("Run").unwrap(), Action::Run);
        assert!(parse_action("merge").is_err());
        assert_eq!(parse_prompt_mode("fix_ci").unwrap(), PromptMode::FixCi);
        assert_eq!(parse_prompt_mode("fix-ci").unwrap(), PromptMode::FixCi);
        assert_eq!(parse_prompt_mode("verify").unwrap(), PromptMode::Verify);
        assert_eq!(parse_run_status("failed").unwrap(), RunStatus::Failure);
        assert!(parse_run_status("maybe").is_err());
    }
}
