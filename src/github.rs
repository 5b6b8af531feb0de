use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::failure::PlatformError;
use crate::types::{
    CommitInfo, Comment, Comparison, PrSnapshot, RunConclusion, WorkflowJob, WorkflowRun,
};
use crate::{log_debug, log_warn};

// --- Platform trait ---

/// The host platform, one method per operation. The decision engine never
/// sees this; only the evaluator and effects layer talk to it.
pub trait Platform: Send + Sync {
    fn get_pr(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<PrSnapshot, PlatformError>> + Send;

    fn list_comments(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Vec<Comment>, PlatformError>> + Send;

    fn list_runs(
        &self,
        head_sha: &str,
    ) -> impl Future<Output = Result<Vec<WorkflowRun>, PlatformError>> + Send;

    fn list_run_jobs(
        &self,
        run_id: u64,
    ) -> impl Future<Output = Result<Vec<WorkflowJob>, PlatformError>> + Send;

    fn compare(
        &self,
        base: &str,
        head: &str,
    ) -> impl Future<Output = Result<Comparison, PlatformError>> + Send;

    fn list_pr_files(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Vec<String>, PlatformError>> + Send;

    fn update_pr_body(
        &self,
        number: u64,
        body: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    fn create_comment(
        &self,
        number: u64,
        body: &str,
    ) -> impl Future<Output = Result<u64, PlatformError>> + Send;

    fn update_comment(
        &self,
        comment_id: u64,
        body: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    fn add_label(
        &self,
        number: u64,
        label: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    fn remove_label(
        &self,
        number: u64,
        label: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

// --- Retry ---

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Exponential backoff delay with +/-50% jitter: base 1s, factor 2, cap 30s.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let base = BACKOFF_BASE_MS.saturating_mul(exp).min(BACKOFF_CAP_MS);
    let jitter = (base as f64 * (rand::random::<f64>() - 0.5)) as i64;
    Duration::from_millis((base as i64 + jitter).max(0) as u64)
}

/// Retry a transient-failing operation with exponential backoff.
/// Non-transient errors are returned immediately.
pub async fn with_backoff<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, PlatformError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                let delay = backoff_delay(attempt);
                log_warn!(
                    "Transient platform error (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// --- gh CLI implementation ---

/// Production adapter shelling out to the `gh` CLI. Each call is subject to
/// the configured timeout; a timeout is a transient error.
pub struct GhCli {
    repo: String,
    call_timeout: Duration,
}

impl GhCli {
    pub fn new(repo: &str, call_timeout: Duration) -> Self {
        Self {
            repo: repo.to_string(),
            call_timeout,
        }
    }

    /// Verify that `gh` is available and authenticated.
    pub fn verify_available() -> Result<(), String> {
        let output = std::process::Command::new("gh")
            .args(["auth", "status"])
            .output()
            .map_err(|e| {
                format!(
                    "gh not found on PATH. Install: https://cli.github.com ({})",
                    e
                )
            })?;
        if !output.status.success() {
            return Err("gh found but not authenticated. Run `gh auth login`.".to_string());
        }
        Ok(())
    }

    async fn run_gh(&self, args: &[&str], stdin: Option<&str>) -> Result<String, PlatformError> {
        let mut cmd = tokio::process::Command::new("gh");
        cmd.args(args);
        cmd.stdin(if stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        log_debug!("[gh] {}", args.join(" "));
        let mut child = cmd
            .spawn()
            .map_err(|e| PlatformError::Spawn(e.to_string()))?;

        if let Some(input) = stdin {
            use tokio::io::AsyncWriteExt;
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| PlatformError::Spawn(format!("writing stdin: {}", e)))?;
                drop(handle);
            }
        }

        let output = match tokio::time::timeout(self.call_timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| PlatformError::Spawn(e.to_string()))?,
            Err(_) => return Err(PlatformError::Timeout(self.call_timeout)),
        };

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|e| PlatformError::Payload(format!("non-UTF-8 output: {}", e)))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(classify_gh_failure(output.status.code(), stderr))
        }
    }

    async fn api_json<T: DeserializeOwned>(
        &self,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<T, PlatformError> {
        let stdout = self.run_gh(args, stdin).await?;
        serde_json::from_str(&stdout).map_err(|e| PlatformError::Payload(e.to_string()))
    }

    fn path(&self, suffix: &str) -> String {
        format!("repos/{}/{}", self.repo, suffix)
    }
}

/// Map a failed `gh` invocation to a platform error. `gh api` reports the
/// HTTP status in parentheses, e.g. `gh: Not Found (HTTP 404)`.
fn classify_gh_failure(code: Option<i32>, stderr: String) -> PlatformError {
    let lower = stderr.to_lowercase();
    if lower.contains("rate limit") {
        return PlatformError::RateLimited(stderr);
    }
    if let Some(status) = parse_http_status(&stderr) {
        return PlatformError::Http {
            status,
            message: stderr,
        };
    }
    PlatformError::CommandFailed { code, stderr }
}

fn parse_http_status(stderr: &str) -> Option<u16> {
    let idx = stderr.find("HTTP ")?;
    let digits: String = stderr[idx + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let status = digits.parse::<u16>().ok()?;
    (100..600).contains(&status).then_some(status)
}

// --- Wire types (gh api payloads) ---

#[derive(Deserialize)]
struct ApiPull {
    number: u64,
    body: Option<String>,
    head: ApiRef,
    base: ApiRef,
    #[serde(default)]
    labels: Vec<ApiLabel>,
}

#[derive(Deserialize)]
struct ApiRef {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
    repo: Option<ApiRepo>,
}

#[derive(Deserialize)]
struct ApiRepo {
    full_name: String,
}

#[derive(Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Deserialize)]
struct ApiComment {
    id: u64,
    body: Option<String>,
    #[serde(default)]
    created_at: String,
}

#[derive(Deserialize)]
struct ApiRuns {
    #[serde(default)]
    workflow_runs: Vec<ApiRun>,
}

#[derive(Deserialize)]
struct ApiRun {
    id: u64,
    name: String,
    head_sha: String,
    #[serde(default)]
    status: String,
    conclusion: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    html_url: String,
}

#[derive(Deserialize)]
struct ApiJobs {
    #[serde(default)]
    jobs: Vec<ApiJob>,
}

#[derive(Deserialize)]
struct ApiJob {
    name: String,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct ApiCompare {
    #[serde(default)]
    commits: Vec<ApiCommit>,
    #[serde(default)]
    files: Vec<ApiFile>,
}

#[derive(Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
}

#[derive(Deserialize)]
struct ApiCommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct ApiFile {
    filename: String,
}

#[derive(Deserialize)]
struct ApiCreated {
    id: u64,
}

fn conclusion_of(raw: Option<&str>) -> Option<RunConclusion> {
    raw.map(|s| match s {
        "success" => RunConclusion::Success,
        "failure" => RunConclusion::Failure,
        "cancelled" => RunConclusion::Cancelled,
        _ => RunConclusion::Other,
    })
}

/// Percent-encode a label name for use in a URL path segment.
fn encode_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for byte in label.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

impl Platform for GhCli {
    async fn get_pr(&self, number: u64) -> Result<PrSnapshot, PlatformError> {
        let path = self.path(&format!("pulls/{}", number));
        let pull: ApiPull = self.api_json(&["api", &path], None).await?;

        let head_repo = pull.head.repo.as_ref().map(|r| r.full_name.as_str());
        let base_repo = pull.base.repo.as_ref().map(|r| r.full_name.as_str());
        let is_fork = head_repo != base_repo;

        Ok(PrSnapshot {
            number: pull.number,
            head_sha: pull.head.sha,
            base_sha: pull.base.sha,
            head_ref: pull.head.ref_name,
            base_ref: pull.base.ref_name,
            labels: pull.labels.into_iter().map(|l| l.name).collect(),
            body: pull.body.unwrap_or_default(),
            is_fork,
        })
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, PlatformError> {
        let path = self.path(&format!("issues/{}/comments", number));
        let comments: Vec<ApiComment> =
            self.api_json(&["api", "--paginate", &path], None).await?;
        Ok(comments
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn list_runs(&self, head_sha: &str) -> Result<Vec<WorkflowRun>, PlatformError> {
        let path = self.path(&format!("actions/runs?head_sha={}", head_sha));
        let runs: ApiRuns = self.api_json(&["api", &path], None).await?;
        Ok(runs
            .workflow_runs
            .into_iter()
            .map(|r| WorkflowRun {
                id: r.id,
                name: r.name,
                head_sha: r.head_sha,
                status: r.status,
                conclusion: conclusion_of(r.conclusion.as_deref()),
                created_at: r.created_at,
                html_url: r.html_url,
            })
            .collect())
    }

    async fn list_run_jobs(&self, run_id: u64) -> Result<Vec<WorkflowJob>, PlatformError> {
        let path = self.path(&format!("actions/runs/{}/jobs", run_id));
        let jobs: ApiJobs = self.api_json(&["api", &path], None).await?;
        Ok(jobs
            .jobs
            .into_iter()
            .map(|j| WorkflowJob {
                name: j.name,
                conclusion: conclusion_of(j.conclusion.as_deref()),
            })
            .collect())
    }

    async fn compare(&self, base: &str, head: &str) -> Result<Comparison, PlatformError> {
        let path = self.path(&format!("compare/{}...{}", base, head));
        let compared: ApiCompare = self.api_json(&["api", &path], None).await?;
        Ok(Comparison {
            commits: compared
                .commits
                .into_iter()
                .map(|c| CommitInfo {
                    sha: c.sha,
                    message: c.commit.message,
                })
                .collect(),
            files: compared.files.into_iter().map(|f| f.filename).collect(),
        })
    }

    async fn list_pr_files(&self, number: u64) -> Result<Vec<String>, PlatformError> {
        let path = self.path(&format!("pulls/{}/files", number));
        let files: Vec<ApiFile> = self.api_json(&["api", "--paginate", &path], None).await?;
        Ok(files.into_iter().map(|f| f.filename).collect())
    }

    async fn update_pr_body(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        let path = self.path(&format!("pulls/{}", number));
        self.run_gh(
            &["api", "--method", "PATCH", &path, "-F", "body=@-"],
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<u64, PlatformError> {
        let path = self.path(&format!("issues/{}/comments", number));
        let stdout = self
            .run_gh(
                &["api", "--method", "POST", &path, "-F", "body=@-"],
                Some(body),
            )
            .await?;
        let created: ApiCreated =
            serde_json::from_str(&stdout).map_err(|e| PlatformError::Payload(e.to_string()))?;
        Ok(created.id)
    }

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<(), PlatformError> {
        let path = self.path(&format!("issues/comments/{}", comment_id));
        self.run_gh(
            &["api", "--method", "PATCH", &path, "-F", "body=@-"],
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn add_label(&self, number: u64, label: &str) -> Result<(), PlatformError> {
        let path = self.path(&format!("issues/{}/labels", number));
        let field = format!("labels[]={}", label);
        self.run_gh(&["api", "--method", "POST", &path, "-f", &field], None)
            .await?;
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<(), PlatformError> {
        let path = self.path(&format!("issues/{}/labels/{}", number, encode_label(label)));
        match self
            .run_gh(&["api", "--method", "DELETE", &path], None)
            .await
        {
            Ok(_) => Ok(()),
            // Removing an absent label is a no-op, keeping the call idempotent.
            Err(PlatformError::Http { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// --- Mock implementation for tests ---

/// In-memory platform for pipeline tests. Preset the read-side fields and
/// inspect the recorded effects afterwards.
#[derive(Default)]
pub struct MockPlatform {
    pub pr: Mutex<PrSnapshot>,
    pub comments: Mutex<Vec<Comment>>,
    pub runs: Mutex<Vec<WorkflowRun>>,
    pub jobs: Mutex<HashMap<u64, Vec<WorkflowJob>>>,
    pub comparison: Mutex<Comparison>,
    pub pr_files: Mutex<Vec<String>>,
    pub added_labels: Mutex<Vec<String>>,
    pub removed_labels: Mutex<Vec<String>>,
    pub comment_writes: Mutex<Vec<(u64, String)>>,
    pub body_writes: Mutex<Vec<String>>,
    next_comment_id: AtomicU64,
    /// When set, every write operation fails with a non-transient error.
    pub fail_writes: AtomicBool,
}

impl MockPlatform {
    pub fn new(pr: PrSnapshot) -> Self {
        Self {
            pr: Mutex::new(pr),
            next_comment_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn write_error(&self) -> Option<PlatformError> {
        self.fail_writes.load(Ordering::Relaxed).then(|| {
            PlatformError::Http {
                status: 403,
                message: "writes disabled by test".to_string(),
            }
        })
    }
}

impl Platform for MockPlatform {
    async fn get_pr(&self, _number: u64) -> Result<PrSnapshot, PlatformError> {
        Ok(self.pr.lock().unwrap().clone())
    }

    async fn list_comments(&self, _number: u64) -> Result<Vec<Comment>, PlatformError> {
        Ok(self.comments.lock().unwrap().clone())
    }

    async fn list_runs(&self, head_sha: &str) -> Result<Vec<WorkflowRun>, PlatformError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.head_sha == head_sha)
            .cloned()
            .collect())
    }

    async fn list_run_jobs(&self, run_id: u64) -> Result<Vec<WorkflowJob>, PlatformError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn compare(&self, _base: &str, _head: &str) -> Result<Comparison, PlatformError> {
        Ok(self.comparison.lock().unwrap().clone())
    }

    async fn list_pr_files(&self, _number: u64) -> Result<Vec<String>, PlatformError> {
        Ok(self.pr_files.lock().unwrap().clone())
    }

    async fn update_pr_body(&self, _number: u64, body: &str) -> Result<(), PlatformError> {
        if let Some(e) = self.write_error() {
            return Err(e);
        }
        self.pr.lock().unwrap().body = body.to_string();
        self.body_writes.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn create_comment(&self, _number: u64, body: &str) -> Result<u64, PlatformError> {
        if let Some(e) = self.write_error() {
            return Err(e);
        }
        let id = self.next_comment_id.fetch_add(1, Ordering::Relaxed);
        self.comments.lock().unwrap().push(Comment {
            id,
            body: body.to_string(),
            created_at: format!("2026-07-01T00:00:{:02}Z", id % 60),
        });
        self.comment_writes
            .lock()
            .unwrap()
            .push((id, body.to_string()));
        Ok(id)
    }

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<(), PlatformError> {
        if let Some(e) = self.write_error() {
            return Err(e);
        }
        let mut comments = self.comments.lock().unwrap();
        if let Some(comment) = comments.iter_mut().find(|c| c.id == comment_id) {
            comment.body = body.to_string();
        }
        self.comment_writes
            .lock()
            .unwrap()
            .push((comment_id, body.to_string()));
        Ok(())
    }

    async fn add_label(&self, _number: u64, label: &str) -> Result<(), PlatformError> {
        if let Some(e) = self.write_error() {
            return Err(e);
        }
        let mut pr = self.pr.lock().unwrap();
        if !pr.labels.iter().any(|l| l == label) {
            pr.labels.push(label.to_string());
        }
        self.added_labels.lock().unwrap().push(label.to_string());
        Ok(())
    }

    async fn remove_label(&self, _number: u64, label: &str) -> Result<(), PlatformError> {
        if let Some(e) = self.write_error() {
            return Err(e);
        }
        self.pr.lock().unwrap().labels.retain(|l| l != label);
        self.removed_labels.lock().unwrap().push(label.to_string());
        Ok(())
    }
}
