use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use pr_keepalive::config::{self, KeepaliveConfig};
use pr_keepalive::evaluator::{install_signal_handlers, Evaluator};
use pr_keepalive::github::GhCli;
use pr_keepalive::lock;
use pr_keepalive::log::{parse_log_level, set_pr_scope, set_verbosity};
use pr_keepalive::log_info;
use pr_keepalive::types::{parse_run_status, IterationDecision, RunReport};

#[derive(Parser)]
#[command(name = "pr-keepalive", about = "Keeps coding agents iterating on PR checklists")]
struct Cli {
    /// Repository as owner/name (overrides the config file)
    #[arg(long)]
    repo: Option<String>,

    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/keepalive.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize keepalive directories and config
    Init,
    /// Plan the next action for a PR (read-only)
    Evaluate {
        /// PR number
        pr: u64,
        /// Agent runs currently in flight for this PR
        #[arg(long, default_value = "0")]
        active_runs: u32,
        /// Write workflow outputs (key=value lines) to this file
        #[arg(long)]
        output_file: Option<PathBuf>,
        /// Write the prompt appendix to this file
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },
    /// Record a finished agent round and update the status comment
    UpdateSummary {
        /// PR number
        pr: u64,
        /// Round outcome (success or failure)
        #[arg(long, conflicts_with = "report_file")]
        outcome: Option<String>,
        /// Runner summary or failure message
        #[arg(long, default_value = "")]
        summary: String,
        /// Runner exit code
        #[arg(long)]
        exit_code: Option<i32>,
        /// Files the round modified
        #[arg(long, default_value = "0")]
        files_changed: u32,
        /// Head commit the round ended at
        #[arg(long, default_value = "")]
        head_sha: String,
        /// Round duration in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
        /// Read the whole run report from a JSON file instead of flags
        #[arg(long)]
        report_file: Option<PathBuf>,
    },
    /// Post an "agent is working" indicator onto the status comment
    MarkRunning {
        /// PR number
        pr: u64,
        /// Note shown in the indicator
        #[arg(long, default_value = "round in progress")]
        note: String,
    },
    /// Check off checklist tasks completed by a commit range
    Reconcile {
        /// PR number
        pr: u64,
        /// Base commit of the range
        #[arg(long)]
        base: String,
        /// Head commit of the range
        #[arg(long)]
        head: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => set_verbosity(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = config::load_config_from(cli.config.as_deref(), &cli.root)?;

    match cli.command {
        Commands::Init => handle_init(&cli.root),
        Commands::Evaluate {
            pr,
            active_runs,
            output_file,
            prompt_file,
        } => {
            set_pr_scope(pr);
            let (gh, config) = platform_for(&cli.repo, config)?;
            handle_evaluate(
                &gh,
                &config,
                pr,
                active_runs,
                output_file.as_deref(),
                prompt_file.as_deref(),
            )
            .await
        }
        Commands::UpdateSummary {
            pr,
            outcome,
            summary,
            exit_code,
            files_changed,
            head_sha,
            duration_ms,
            report_file,
        } => {
            let report = match report_file {
                Some(path) => read_report_file(&path)?,
                None => {
                    let outcome = outcome
                        .ok_or_else(|| "--outcome or --report-file is required".to_string())?;
                    RunReport {
                        status: parse_run_status(&outcome)?,
                        summary,
                        exit_code,
                        files_changed,
                        head_sha,
                        duration_ms,
                    }
                }
            };
            set_pr_scope(pr);
            let (gh, config) = platform_for(&cli.repo, config)?;
            handle_update_summary(&gh, &config, &cli.root, pr, &report).await
        }
        Commands::MarkRunning { pr, note } => {
            set_pr_scope(pr);
            let (gh, config) = platform_for(&cli.repo, config)?;
            handle_mark_running(&gh, &config, &cli.root, pr, &note).await
        }
        Commands::Reconcile { pr, base, head } => {
            set_pr_scope(pr);
            let (gh, config) = platform_for(&cli.repo, config)?;
            handle_reconcile(&gh, &config, &cli.root, pr, &base, &head).await
        }
    }
}

/// Resolve the repository and build the gh-backed platform adapter.
fn platform_for(
    repo_flag: &Option<String>,
    mut config: KeepaliveConfig,
) -> Result<(GhCli, KeepaliveConfig), String> {
    if let Some(repo) = repo_flag {
        config.github.repo = repo.clone();
    }
    if config.github.repo.is_empty() {
        return Err("No repository configured. Pass --repo or set github.repo in keepalive.toml"
            .to_string());
    }
    GhCli::verify_available()?;
    let gh = GhCli::new(
        &config.github.repo,
        Duration::from_secs(config.execution.call_timeout_secs),
    );
    Ok((gh, config))
}

fn runtime_dir(root: &Path) -> PathBuf {
    root.join(".keepalive")
}

fn invocation_timeout(config: &KeepaliveConfig) -> Duration {
    Duration::from_secs(config.execution.invocation_timeout_minutes * 60)
}

/// Run a future under the global invocation timeout. On expiry the durable
/// state is whatever the last successful write left behind.
async fn with_invocation_timeout<T>(
    config: &KeepaliveConfig,
    fut: impl std::future::Future<Output = Result<T, String>>,
) -> Result<T, String> {
    match tokio::time::timeout(invocation_timeout(config), fut).await {
        Ok(result) => result,
        Err(_) => Err(format!(
            "Invocation timed out after {} minute(s); durable state unchanged since last write",
            config.execution.invocation_timeout_minutes
        )),
    }
}

fn handle_init(root: &Path) -> Result<(), String> {
    let dir = runtime_dir(root);
    fs::create_dir_all(&dir)
        .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;

    let config_path = root.join("keepalive.toml");
    if !config_path.exists() {
        let contents = r#"[github]
repo = ""                     # owner/name
gate_workflow = "CI"

[execution]
max_iterations = 5
failure_threshold = 3
run_cap = 1
history_limit = 5
call_timeout_secs = 30
invocation_timeout_minutes = 10
max_attempts = 4

[metrics]
# path = ".keepalive/metrics.ndjson"
"#;
        fs::write(&config_path, contents)
            .map_err(|e| format!("Failed to write {}: {}", config_path.display(), e))?;
    }

    // Keep the runtime directory out of version control.
    let gitignore_path = root.join(".gitignore");
    let entry = ".keepalive/";
    let existing = if gitignore_path.exists() {
        fs::read_to_string(&gitignore_path)
            .map_err(|e| format!("Failed to read .gitignore: {}", e))?
    } else {
        String::new()
    };
    if !existing.lines().any(|line| line.trim() == entry) {
        let mut contents = existing;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(entry);
        contents.push('\n');
        fs::write(&gitignore_path, contents)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    println!("Initialized pr-keepalive in {}", root.display());
    println!("  Created: .keepalive/, keepalive.toml");
    println!("  Updated: .gitignore");
    Ok(())
}

async fn handle_evaluate(
    gh: &GhCli,
    config: &KeepaliveConfig,
    pr: u64,
    active_runs: u32,
    output_file: Option<&Path>,
    prompt_file: Option<&Path>,
) -> Result<(), String> {
    install_signal_handlers()?;
    let evaluator = Evaluator::new(gh, config);
    let decision =
        with_invocation_timeout(config, evaluator.evaluate(pr, active_runs)).await?;

    if let Some(path) = prompt_file {
        fs::write(path, &decision.task_appendix)
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    }

    if let Some(path) = output_file {
        write_workflow_outputs(path, &decision, prompt_file)?;
    }

    let json = serde_json::to_string_pretty(&decision)
        .map_err(|e| format!("Failed to serialize decision: {}", e))?;
    println!("{}", json);
    Ok(())
}

/// Append `key=value` workflow outputs for the surrounding automation.
fn write_workflow_outputs(
    path: &Path,
    decision: &IterationDecision,
    prompt_file: Option<&Path>,
) -> Result<(), String> {
    use std::io::Write;

    let mut lines = vec![
        format!("action={}", decision.action),
        format!("reason={}", decision.reason),
        format!(
            "prompt_mode={}",
            decision
                .prompt_mode
                .map(|m| m.as_str())
                .unwrap_or("")
        ),
        format!("has_agent_label={}", decision.has_agent_label),
        format!("agent_type={}", decision.agent_type),
        format!("tasks_total={}", decision.checkbox_counts.total),
        format!("tasks_complete={}", decision.checkbox_counts.checked),
    ];
    if let Some(prompt_path) = prompt_file {
        lines.push(format!("prompt_file={}", prompt_path.display()));
    }

    let mut file = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
    for line in lines {
        writeln!(file, "{}", line)
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    }
    Ok(())
}

fn read_report_file(path: &Path) -> Result<RunReport, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse run report from {}: {}", path.display(), e))
}

async fn handle_update_summary(
    gh: &GhCli,
    config: &KeepaliveConfig,
    root: &Path,
    pr: u64,
    report: &RunReport,
) -> Result<(), String> {
    install_signal_handlers()?;
    let _guard = lock::PrLock::acquire(&runtime_dir(root), pr, "update-summary")?;

    let evaluator = Evaluator::new(gh, config);
    let decision = with_invocation_timeout(config, evaluator.update_summary(pr, report)).await?;

    log_info!(
        "Summary updated: next action {} ({})",
        decision.action,
        decision.reason
    );
    Ok(())
}

async fn handle_mark_running(
    gh: &GhCli,
    config: &KeepaliveConfig,
    root: &Path,
    pr: u64,
    note: &str,
) -> Result<(), String> {
    install_signal_handlers()?;
    let _guard = lock::PrLock::acquire(&runtime_dir(root), pr, "mark-running")?;

    let evaluator = Evaluator::new(gh, config);
    with_invocation_timeout(config, evaluator.mark_running(pr, note)).await
}

async fn handle_reconcile(
    gh: &GhCli,
    config: &KeepaliveConfig,
    root: &Path,
    pr: u64,
    base: &str,
    head: &str,
) -> Result<(), String> {
    install_signal_handlers()?;
    let _guard = lock::PrLock::acquire(&runtime_dir(root), pr, "reconcile")?;

    let evaluator = Evaluator::new(gh, config);
    let outcome =
        with_invocation_timeout(config, evaluator.auto_reconcile_tasks(pr, base, head)).await?;

    if outcome.updated {
        log_info!(
            "Checked {} task(s): {}",
            outcome.tasks_checked.len(),
            outcome.tasks_checked.join("; ")
        );
    } else {
        log_info!("No tasks reached high confidence; nothing toggled");
    }
    Ok(())
}
