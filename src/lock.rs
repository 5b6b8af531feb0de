use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::log_warn;

/// What an invocation records about itself while it holds a PR's lock.
/// Competing invocations read this to explain who is in the way.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OwnerCard {
    pub pid: u32,
    pub pr_number: u64,
    /// Subcommand holding the lock, e.g. `update-summary`.
    pub command: String,
    pub acquired_at: String,
}

/// Exclusive advisory lock over one PR's effects.
///
/// The workflow concurrency group already serializes invocations per PR;
/// this guards the same invariant against operators running the CLI by
/// hand next to the automation. Each PR gets a pair of files under the
/// runtime directory: `pr-<n>.lock` (the OS-level lock) and
/// `pr-<n>.owner.json` (the diagnostics card). Released on drop.
pub struct PrLock {
    file: fslock::LockFile,
    card_path: PathBuf,
}

impl std::fmt::Debug for PrLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrLock")
            .field("card_path", &self.card_path)
            .finish()
    }
}

impl PrLock {
    /// Take the lock for `pr_number`, recording which subcommand holds it.
    ///
    /// On contention the error names the holding invocation when its owner
    /// card is readable, and distinguishes a live holder from a stale card
    /// whose process has already exited.
    pub fn acquire(runtime_dir: &Path, pr_number: u64, command: &str) -> Result<Self, String> {
        fs::create_dir_all(runtime_dir)
            .map_err(|e| format!("Failed to create {}: {}", runtime_dir.display(), e))?;

        let lock_path = runtime_dir.join(format!("pr-{}.lock", pr_number));
        let card_path = runtime_dir.join(format!("pr-{}.owner.json", pr_number));

        let mut file = fslock::LockFile::open(&lock_path)
            .map_err(|e| format!("Failed to open lock file {}: {}", lock_path.display(), e))?;

        let acquired = file
            .try_lock()
            .map_err(|e| format!("Failed to acquire lock for PR #{}: {}", pr_number, e))?;
        if !acquired {
            return Err(contention_message(&card_path, &lock_path, pr_number));
        }

        let card = OwnerCard {
            pid: std::process::id(),
            pr_number,
            command: command.to_string(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        };
        // The card is advisory; failing to write it never blocks the run.
        match serde_json::to_string_pretty(&card) {
            Ok(json) => {
                if let Err(e) = fs::write(&card_path, json) {
                    log_warn!("Could not write lock owner card: {}", e);
                }
            }
            Err(e) => log_warn!("Could not serialize lock owner card: {}", e),
        }

        Ok(Self { file, card_path })
    }
}

impl Drop for PrLock {
    fn drop(&mut self) {
        // Remove the card while still holding the lock, so a competitor
        // never reads a card for a lock that is already free.
        match fs::remove_file(&self.card_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log_warn!(
                "Could not remove lock owner card {}: {}",
                self.card_path.display(),
                e
            ),
        }
        if let Err(e) = self.file.unlock() {
            log_warn!("Could not release PR lock: {}", e);
        }
    }
}

/// Explain who holds a contended lock, as precisely as the owner card
/// allows.
fn contention_message(card_path: &Path, lock_path: &Path, pr_number: u64) -> String {
    let card = fs::read_to_string(card_path)
        .ok()
        .and_then(|raw| serde_json::from_str::<OwnerCard>(&raw).ok());

    match card {
        Some(card) if process_alive(card.pid) => format!(
            "PR #{} is already being processed by `{}` (PID {}, since {}). \
             Wait for it to finish or stop that process first",
            pr_number, card.command, card.pid, card.acquired_at
        ),
        Some(card) => format!(
            "Lock for PR #{} is held but its recorded owner `{}` (PID {}) has exited. \
             If no other invocation is running, remove {} to recover",
            pr_number,
            card.command,
            card.pid,
            lock_path.display()
        ),
        None => format!(
            "Another invocation holds the lock for PR #{} and left no owner card. \
             If it is stale, remove {}",
            pr_number,
            lock_path.display()
        ),
    }
}

fn process_alive(pid: u32) -> bool {
    // Signal 0 probes for existence without delivering anything.
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}
