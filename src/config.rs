use std::path::Path;

use serde::Deserialize;

// --- File config ---

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub github: GithubConfig,
    pub execution: ExecutionConfig,
    pub metrics: MetricsConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GithubConfig {
    /// `owner/name`. Empty means the CLI `--repo` flag is required.
    pub repo: String,
    /// Name of the required gate workflow whose verdict routes run/fix/wait.
    pub gate_workflow: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_iterations: u32,
    pub failure_threshold: u32,
    /// Concurrent agent runs allowed per PR unless a label overrides it.
    pub run_cap: u32,
    /// Iteration history rows kept in the status comment.
    pub history_limit: usize,
    pub call_timeout_secs: u64,
    pub invocation_timeout_minutes: u64,
    /// Attempts per external call, counting the first.
    pub max_attempts: u32,
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// NDJSON metrics file. The `METRICS_PATH` environment variable wins
    /// over this when set. Empty disables metrics.
    pub path: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            gate_workflow: "CI".to_string(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            failure_threshold: 3,
            run_cap: 1,
            history_limit: 5,
            call_timeout_secs: 30,
            invocation_timeout_minutes: 10,
            max_attempts: 4,
        }
    }
}

pub fn validate(config: &KeepaliveConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.execution.max_iterations < 1 {
        errors.push("execution.max_iterations must be >= 1".to_string());
    }
    if config.execution.failure_threshold < 1 {
        errors.push("execution.failure_threshold must be >= 1".to_string());
    }
    if config.execution.run_cap < 1 {
        errors.push("execution.run_cap must be >= 1".to_string());
    }
    if config.execution.call_timeout_secs < 1 {
        errors.push("execution.call_timeout_secs must be >= 1".to_string());
    }
    if config.execution.max_attempts < 1 {
        errors.push("execution.max_attempts must be >= 1".to_string());
    }
    if !config.github.repo.is_empty() {
        let parts: Vec<&str> = config.github.repo.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            errors.push(format!(
                "github.repo must be 'owner/name', got: {}",
                config.github.repo
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load config from an explicit path (if provided) or fall back to
/// `{project_root}/keepalive.toml`.
///
/// When `config_path` is `Some`, the file MUST exist. When `None`, a missing
/// default file yields the built-in defaults.
pub fn load_config_from(
    config_path: Option<&Path>,
    project_root: &Path,
) -> Result<KeepaliveConfig, String> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(format!("Config file not found: {}", path.display()));
            }
            load_config_at(path)
        }
        None => load_config(project_root),
    }
}

pub fn load_config(project_root: &Path) -> Result<KeepaliveConfig, String> {
    let config_path = project_root.join("keepalive.toml");
    if !config_path.exists() {
        return Ok(KeepaliveConfig::default());
    }
    load_config_at(&config_path)
}

fn load_config_at(path: &Path) -> Result<KeepaliveConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let config: KeepaliveConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}

// --- PR body overrides ---

pub const BODY_CONFIG_START: &str = "<!-- keepalive-config:start -->";
pub const BODY_CONFIG_END: &str = "<!-- keepalive-config:end -->";
const BODY_CONFIG_HEADING: &str = "## keepalive config";

/// Per-PR overrides parsed from the PR body. Accepted either as a JSON
/// object between the `keepalive-config` HTML markers or as a fenced
/// `key: value` block under a `## Keepalive config` heading.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct BodyOverrides {
    pub keepalive_enabled: Option<bool>,
    pub autofix_enabled: Option<bool>,
    pub iteration: Option<u32>,
    pub max_iterations: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub trace: Option<String>,
}

/// Parse overrides from a PR body. Unknown keys are ignored; malformed
/// values are skipped with a warning rather than failing the invocation.
pub fn parse_body_overrides(body: &str) -> BodyOverrides {
    if let Some(block) = html_marker_block(body) {
        return parse_json_overrides(&block);
    }
    if let Some(block) = fenced_config_block(body) {
        return parse_keyvalue_overrides(&block);
    }
    BodyOverrides::default()
}

fn html_marker_block(body: &str) -> Option<String> {
    let start = body.find(BODY_CONFIG_START)? + BODY_CONFIG_START.len();
    let end = body[start..].find(BODY_CONFIG_END)?;
    Some(body[start..start + end].to_string())
}

/// Find the first fenced code block under the `## Keepalive config` heading.
fn fenced_config_block(body: &str) -> Option<String> {
    let mut under_heading = false;
    let mut in_fence = false;
    let mut block: Vec<&str> = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            under_heading = trimmed.to_lowercase() == BODY_CONFIG_HEADING;
            continue;
        }
        if !under_heading {
            continue;
        }
        if trimmed.starts_with("```") {
            if in_fence {
                return Some(block.join("\n"));
            }
            in_fence = true;
            continue;
        }
        if in_fence {
            block.push(line);
        }
    }
    None
}

/// Strip `#` and `//` inline comments from a line, outside of strings.
fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'#' if !in_string => return &line[..i],
            b'/' if !in_string && i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                return &line[..i];
            }
            _ => {}
        }
        i += 1;
    }
    line
}

fn parse_json_overrides(block: &str) -> BodyOverrides {
    let cleaned: String = block
        .lines()
        .map(strip_inline_comment)
        .collect::<Vec<_>>()
        .join("\n");

    let value: serde_json::Value = match serde_json::from_str(cleaned.trim()) {
        Ok(v) => v,
        Err(e) => {
            crate::log_warn!("Ignoring malformed keepalive-config block: {}", e);
            return BodyOverrides::default();
        }
    };

    let Some(map) = value.as_object() else {
        return BodyOverrides::default();
    };

    let mut overrides = BodyOverrides::default();
    for (key, val) in map {
        apply_override(&mut overrides, key, &json_value_to_string(val));
    }
    overrides
}

fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_keyvalue_overrides(block: &str) -> BodyOverrides {
    let mut overrides = BodyOverrides::default();
    for line in block.lines() {
        let line = strip_inline_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('=')) else {
            continue;
        };
        apply_override(
            &mut overrides,
            key.trim(),
            value.trim().trim_matches('"'),
        );
    }
    overrides
}

fn apply_override(overrides: &mut BodyOverrides, key: &str, value: &str) {
    match key.trim().trim_matches('"').to_lowercase().as_str() {
        "keepalive_enabled" => overrides.keepalive_enabled = parse_config_bool(value),
        "autofix_enabled" => overrides.autofix_enabled = parse_config_bool(value),
        "iteration" => overrides.iteration = parse_config_u32(key, value),
        "max_iterations" => overrides.max_iterations = parse_config_u32(key, value),
        "failure_threshold" => overrides.failure_threshold = parse_config_u32(key, value),
        "trace" => {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                overrides.trace = Some(trimmed.to_string());
            }
        }
        _ => {}
    }
}

/// Booleans accept true/false, yes/no, and 1/0, case-insensitively.
pub fn parse_config_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_config_u32(key: &str, value: &str) -> Option<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) => Some(n),
        Err(_) => {
            crate::log_warn!("Ignoring non-numeric override {}: {}", key, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_marker_json_overrides() {
        let body = "intro\n<!-- keepalive-config:start -->\n\
            {\"max_iterations\": 8, \"keepalive_enabled\": \"no\"} // tuned\n\
            <!-- keepalive-config:end -->\ntrailer";
        let overrides = parse_body_overrides(body);
        assert_eq!(overrides.max_iterations, Some(8));
        assert_eq!(overrides.keepalive_enabled, Some(false));
    }

    #[test]
    fn fenced_keyvalue_overrides() {
        let body = "## Keepalive config\n\n```\nmax_iterations: 7  # bumped\nkeepalive_enabled: yes\ntrace: t-99\n```\n";
        let overrides = parse_body_overrides(body);
        assert_eq!(overrides.max_iterations, Some(7));
        assert_eq!(overrides.keepalive_enabled, Some(true));
        assert_eq!(overrides.trace.as_deref(), Some("t-99"));
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_config_bool("TRUE"), Some(true));
        assert_eq!(parse_config_bool("0"), Some(false));
        assert_eq!(parse_config_bool("maybe"), None);
    }
}
