use std::time::Duration;

use serde::{Deserialize, Serialize};

// --- Agent failure taxonomy ---

/// Category assigned to a failed agent round.
///
/// Only non-transient categories count toward the failure threshold;
/// transient failures are cleared and the next round resumes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Auth,
    Resource,
    Logic,
    Infrastructure,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Logic => "logic",
            ErrorCategory::Infrastructure => "infrastructure",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether a failure of this category increments the failure counter.
    pub fn counts_toward_threshold(&self) -> bool {
        !matches!(self, ErrorCategory::Transient)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const TRANSIENT_MARKERS: [&str; 6] = [
    "enotfound",
    "econnreset",
    "etimedout",
    "socket hang up",
    "rate limit",
    "timed out",
];

const AUTH_MARKERS: [&str; 2] = ["bad credentials", "unauthorized"];

const RESOURCE_MARKERS: [&str; 3] = ["repository not found", "missing permission", "not found"];

const LOGIC_MARKERS: [&str; 5] = [
    "validation failed",
    "invalid request",
    "i cannot assist",
    "unable to comply",
    "refused to",
];

const INFRASTRUCTURE_MARKERS: [&str; 4] = [
    "setup failed",
    "setup failure",
    "installation failed",
    "failed to install",
];

/// Exit code the coreutils `timeout` wrapper reports when it kills the
/// command, which most runners use to bound agent rounds.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Classify a failed round from its exit code and failure summary.
///
/// Matching is case-insensitive over the summary text plus any embedded
/// HTTP status. First category that fires wins, in the order transient,
/// auth, resource, logic, infrastructure.
pub fn classify_failure(exit_code: Option<i32>, summary: &str) -> ErrorCategory {
    let text = summary.to_lowercase();
    let status = embedded_http_status(&text);

    if contains_any(&text, &TRANSIENT_MARKERS)
        || matches!(status, Some(s) if s >= 500)
        || exit_code == Some(TIMEOUT_EXIT_CODE)
    {
        return ErrorCategory::Transient;
    }
    if contains_any(&text, &AUTH_MARKERS) || status == Some(401) {
        return ErrorCategory::Auth;
    }
    if contains_any(&text, &RESOURCE_MARKERS) || status == Some(404) {
        return ErrorCategory::Resource;
    }
    if contains_any(&text, &LOGIC_MARKERS) || status == Some(422) {
        return ErrorCategory::Logic;
    }
    if contains_any(&text, &INFRASTRUCTURE_MARKERS) {
        return ErrorCategory::Infrastructure;
    }
    ErrorCategory::Unknown
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

/// Find an HTTP status mentioned as `http 503`, `status 401`, `code 422`,
/// or a parenthesized `(http 500)` style token.
fn embedded_http_status(text: &str) -> Option<u16> {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    for pair in words.windows(2) {
        if matches!(pair[0], "http" | "status" | "code" | "error") {
            if let Ok(status) = pair[1].parse::<u16>() {
                if (100..600).contains(&status) {
                    return Some(status);
                }
            }
        }
    }
    None
}

/// Operator-facing recovery hint, rendered into the status comment only.
pub fn recovery_hint(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Transient => "Automatic retry on the next round; no action needed.",
        ErrorCategory::Auth => {
            "Check the workflow's credentials and token scopes, then remove the needs-human label."
        }
        ErrorCategory::Resource => {
            "Verify the repository, branch, and permissions the agent needs are in place."
        }
        ErrorCategory::Logic => {
            "The agent produced an invalid or refused response. Rephrase the tasks or intervene manually."
        }
        ErrorCategory::Infrastructure => {
            "The runner failed during setup. Inspect the workflow logs and rerun."
        }
        ErrorCategory::Unknown => {
            "Inspect the run logs; if the cause is external, clear the failure record to resume."
        }
    }
}

// --- Platform error ---

/// Error from the host-platform adapter.
///
/// Categories:
/// - Transient: timeouts, rate limits, 5xx. Retried with backoff, never
///   counted against the failure threshold.
/// - Everything else: surfaced to the caller without retry.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("api call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    #[error("gh exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("failed to spawn gh: {0}")]
    Spawn(String),

    #[error("unexpected response payload: {0}")]
    Payload(String),
}

impl PlatformError {
    /// Returns true if the error is transient and the call should be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Timeout(_) | PlatformError::RateLimited(_) => true,
            PlatformError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map to the failure taxonomy for metrics and the status comment.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlatformError::Timeout(_) | PlatformError::RateLimited(_) => ErrorCategory::Transient,
            PlatformError::Http { status: 401, .. } => ErrorCategory::Auth,
            PlatformError::Http { status: 403, .. } => ErrorCategory::Auth,
            PlatformError::Http { status: 404, .. } => ErrorCategory::Resource,
            PlatformError::Http { status: 422, .. } => ErrorCategory::Logic,
            PlatformError::Http { status, .. } if *status >= 500 => ErrorCategory::Transient,
            PlatformError::Spawn(_) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Unknown,
        }
    }
}
