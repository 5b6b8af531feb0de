use std::fmt::Arguments;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Verbosity for controller output, from quietest to noisiest.
///
/// Everything goes to stderr: stdout is reserved for the decision JSON
/// that the surrounding workflow consumes, so the two streams must never
/// mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

static VERBOSITY: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// PR number the current invocation is working on. Zero means no scope;
/// the CLI sets this once per invocation so every line names its PR
/// without call sites repeating it.
static PR_SCOPE: AtomicU64 = AtomicU64::new(0);

pub fn set_verbosity(level: LogLevel) {
    VERBOSITY.store(level as u8, Ordering::Relaxed);
}

/// Whether messages at `level` are currently emitted.
pub fn enabled(level: LogLevel) -> bool {
    level as u8 <= VERBOSITY.load(Ordering::Relaxed)
}

/// Scope all subsequent output to one PR. Pass 0 to clear.
pub fn set_pr_scope(pr_number: u64) {
    PR_SCOPE.store(pr_number, Ordering::Relaxed);
}

/// Parse the `--log-level` flag. A couple of common aliases are accepted
/// so workflow YAML typos fail soft.
pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" | "trace" => Ok(LogLevel::Debug),
        other => Err(format!(
            "Unknown log level '{}': use error, warn, info, or debug",
            other
        )),
    }
}

fn line_for(level: LogLevel, args: &Arguments<'_>) -> String {
    let mut line = String::from("keepalive");
    let pr = PR_SCOPE.load(Ordering::Relaxed);
    if pr != 0 {
        line.push_str(&format!("[#{}]", pr));
    }
    match level {
        LogLevel::Error => line.push_str(" error:"),
        LogLevel::Warn => line.push_str(" warn:"),
        LogLevel::Debug => line.push_str(" debug:"),
        LogLevel::Info => {}
    }
    line.push(' ');
    line.push_str(&args.to_string());
    line
}

/// Single output path for all log macros: one prefixed line on stderr.
pub fn emit(level: LogLevel, args: Arguments<'_>) {
    eprintln!("{}", line_for(level, &args));
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Warn) {
            $crate::log::emit($crate::log::LogLevel::Warn, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Info) {
            $crate::log::emit($crate::log::LogLevel::Info, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Debug) {
            $crate::log::emit($crate::log::LogLevel::Debug, format_args!($($arg)*))
        }
    };
}
