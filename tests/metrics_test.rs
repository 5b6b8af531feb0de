use tempfile::TempDir;

use pr_keepalive::metrics::{append_record, MetricsRecord};

fn record(action: &str, reason: &str) -> MetricsRecord {
    MetricsRecord {
        pr_number: 606,
        iteration_after: 3,
        action: action.to_string(),
        reason: reason.to_string(),
        error_category: None,
        duration_ms: 1234,
        tasks_total: 5,
        tasks_complete: 2,
        timestamp: "2026-07-10T00:00:00Z".to_string(),
    }
}

#[test]
fn records_append_as_ndjson_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.ndjson");

    append_record(&path, &record("run", "ready")).unwrap();
    append_record(&path, &record("stop", "tasks-complete")).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["pr_number"], 606);
    assert_eq!(first["action"], "run");
    assert_eq!(first["tasks_complete"], 2);

    let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["reason"], "tasks-complete");
}

#[test]
fn parent_directories_are_created() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/deeper/metrics.ndjson");
    append_record(&path, &record("wait", "gate-pending")).unwrap();
    assert!(path.exists());
}

#[test]
fn error_category_omitted_when_absent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.ndjson");
    append_record(&path, &record("wait", "gate-pending")).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(!contents.contains("error_category"));

    let mut failing = record("run", "ready");
    failing.error_category = Some("logic".to_string());
    append_record(&path, &failing).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("\"error_category\":\"logic\""));
}
