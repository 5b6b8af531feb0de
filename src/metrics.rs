use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::KeepaliveConfig;

/// One metrics record per invocation, appended as a single NDJSON line.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct MetricsRecord {
    pub pr_number: u64,
    pub iteration_after: u32,
    pub action: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    pub duration_ms: u64,
    pub tasks_total: u32,
    pub tasks_complete: u32,
    pub timestamp: String,
}

/// Resolve the metrics file path: the `METRICS_PATH` environment variable
/// wins over the config value. `None` disables metrics.
pub fn resolve_path(config: &KeepaliveConfig) -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("METRICS_PATH") {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }
    config
        .metrics
        .path
        .as_ref()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}

/// Append one record to the metrics file.
///
/// Creates the file and parent directories if missing. A metrics failure is
/// reported to the caller but must never fail the invocation.
pub fn append_record(path: &Path, record: &MetricsRecord) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                format!("Failed to create metrics directory {}: {}", parent.display(), e)
            })?;
        }
    }

    let line = serde_json::to_string(record)
        .map_err(|e| format!("Failed to serialize metrics record: {}", e))?;

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| format!("Failed to open metrics file {}: {}", path.display(), e))?;

    file.write_all(line.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|e| format!("Failed to write metrics file {}: {}", path.display(), e))?;

    Ok(())
}
