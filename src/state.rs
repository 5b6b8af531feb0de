use serde::{Deserialize, Serialize};

use crate::log_warn;
use crate::types::Comment;

/// Marker identifying the one comment the controller owns on a PR.
pub const SUMMARY_MARKER: &str = "<!-- keepalive-loop-summary -->";

/// Sentinel prefix for the machine-readable state blob. The blob is the
/// source of truth; everything else in the comment is advisory rendering.
pub const STATE_SENTINEL_PREFIX: &str = "<!-- keepalive-state:";
pub const STATE_SENTINEL_SUFFIX: &str = " -->";
pub const STATE_VERSION: &str = "v1";

const DEFAULT_MAX_ITERATIONS: u32 = 5;
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

// --- State records ---

/// Accumulated failure record. Cleared (set back to `None`) when a round
/// succeeds or the failure was classified transient.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct FailureRecord {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub first_seen: String,
    #[serde(default)]
    pub last_seen: String,
}

/// The most recent agent-addressed comment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct LastInstruction {
    #[serde(default)]
    pub comment_id: String,
    #[serde(default)]
    pub head_sha: String,
}

/// One row of the capped iteration history rendered into the comment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub action: String,
    pub reason: String,
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Durable controller state, persisted inside the state comment.
///
/// Unknown JSON keys survive a parse/render round-trip via `extra`, so
/// fields added by newer deployments are not dropped by older ones.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeepaliveState {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default, with = "failure_field")]
    pub failure: Option<FailureRecord>,
    #[serde(default)]
    pub last_head_sha: String,
    #[serde(default)]
    pub last_files_changed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_instruction: Option<LastInstruction>,
    #[serde(default)]
    pub needs_task_reconciliation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl Default for KeepaliveState {
    fn default() -> Self {
        Self {
            trace_id: String::new(),
            iteration: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure: None,
            last_head_sha: String::new(),
            last_files_changed: 0,
            last_instruction: None,
            needs_task_reconciliation: false,
            history: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl KeepaliveState {
    pub fn has_failure(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.count > 0)
    }

    /// True when the previous round neither changed files nor failed.
    pub fn previous_round_unproductive(&self) -> bool {
        self.last_files_changed == 0 && !self.has_failure()
    }
}

/// Serialize `None` as the explicit empty object `{}` rather than omitting
/// the field, matching the persisted layout where `"failure": {}` means
/// "no failure record".
mod failure_field {
    use super::FailureRecord;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<FailureRecord>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(record) => record.serialize(serializer),
            None => serde_json::Map::new().serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<FailureRecord>, D::Error> {
        let map = serde_json::Map::deserialize(deserializer)?;
        if map.is_empty() {
            return Ok(None);
        }
        serde_json::from_value(serde_json::Value::Object(map))
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

// --- Codec ---

/// Render the machine-readable sentinel line for a state.
pub fn render_sentinel(state: &KeepaliveState) -> Result<String, String> {
    let json = serde_json::to_string(state)
        .map_err(|e| format!("Failed to serialize keepalive state: {}", e))?;
    Ok(format!(
        "{}{} {}{}",
        STATE_SENTINEL_PREFIX, STATE_VERSION, json, STATE_SENTINEL_SUFFIX
    ))
}

/// Extract `(version, json)` from the first state sentinel in a comment body.
pub fn extract_sentinel(body: &str) -> Option<(&str, &str)> {
    let start = body.find(STATE_SENTINEL_PREFIX)?;
    let rest = &body[start + STATE_SENTINEL_PREFIX.len()..];
    let end = rest.find(STATE_SENTINEL_SUFFIX)?;
    let inner = &rest[..end];
    let (version, json) = inner.split_once(' ')?;
    Some((version, json.trim()))
}

/// Parse the state blob out of a comment body.
///
/// - No sentinel or malformed JSON: recovered as the empty state (the
///   comment is rewritten on the next effects pass). Never panics.
/// - Unknown schema version: rejected, so a newer deployment's state is
///   never clobbered by guessing.
pub fn parse_state(body: &str) -> Result<KeepaliveState, String> {
    let Some((version, json)) = extract_sentinel(body) else {
        return Ok(KeepaliveState::default());
    };
    if version != STATE_VERSION {
        return Err(format!("unknown-state-version: {}", version));
    }
    match serde_json::from_str::<KeepaliveState>(json) {
        Ok(state) => Ok(state),
        Err(e) => {
            log_warn!("Malformed keepalive state JSON, resetting: {}", e);
            Ok(KeepaliveState::default())
        }
    }
}

/// Find the controller-owned state comment among all PR comments.
///
/// When several exist (racing deployments), the oldest wins and the rest
/// are ignored.
pub fn find_state_comment(comments: &[Comment]) -> Option<&Comment> {
    comments
        .iter()
        .filter(|c| c.body.contains(SUMMARY_MARKER))
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Locate and parse the persisted state. Returns the owning comment id
/// (when one exists) alongside the state; absent comment means iteration 0.
pub fn load_state(comments: &[Comment]) -> Result<(Option<u64>, KeepaliveState), String> {
    match find_state_comment(comments) {
        Some(comment) => {
            let state = parse_state(&comment.body)?;
            Ok((Some(comment.id), state))
        }
        None => Ok((None, KeepaliveState::default())),
    }
}
