//! `start`/`stop`/`pause`/`resume`/`force` operations, matching
//! `original_source/eab/cli/daemon_cmds.py`'s `cmd_start`/`cmd_stop`/
//! `cmd_pause`/`cmd_resume`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::Result;

use super::port_lock::{cleanup_dead_locks, list_all_locks};
use super::singleton::{check_singleton, kill_existing_daemon};

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub started: bool,
    pub pid: Option<u32>,
    pub message: Option<String>,
}

/// Stale session files from a previous run; deleted before the daemon
/// publishes its first status so a polling client never reads old state.
const STALE_SESSION_FILES: &[&str] = &["status.json", "alerts.log", "events.jsonl"];

pub fn clear_stale_session_files(base_dir: &Path) -> Result<()> {
    for name in STALE_SESSION_FILES {
        let path = base_dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Refuse a start if another live daemon already holds the device's
/// singleton, unless `force`, in which case best-effort terminate it (and
/// every other stray port-lock holder) before the caller proceeds to spawn.
pub fn prepare_start(base_dir: &Path, registry_dir: &Path, force: bool) -> StartOutcome {
    if let Some(existing) = check_singleton(base_dir) {
        if existing.is_alive {
            if !force {
                return StartOutcome {
                    started: false,
                    pid: Some(existing.pid),
                    message: Some("Daemon already running".into()),
                };
            }
            kill_existing_daemon(base_dir);
        }
    }

    if force {
        let my_pid = std::process::id();
        for owner in list_all_locks(registry_dir) {
            if owner.pid == my_pid {
                continue;
            }
            #[cfg(unix)]
            {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(owner.pid as i32), nix::sys::signal::Signal::SIGTERM);
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(500));
        cleanup_dead_locks(registry_dir);
    }

    StartOutcome { started: true, pid: None, message: None }
}

pub fn stop(base_dir: &Path) -> (bool, Option<u32>) {
    match check_singleton(base_dir) {
        Some(existing) if existing.is_alive => (kill_existing_daemon(base_dir), Some(existing.pid)),
        Some(existing) => (true, Some(existing.pid)),
        None => (false, None),
    }
}

fn pause_path(base_dir: &Path) -> std::path::PathBuf {
    base_dir.join("pause.txt")
}

pub fn pause(base_dir: &Path, duration_seconds: u64) -> Result<f64> {
    std::fs::create_dir_all(base_dir)?;
    let pause_until = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64() + duration_seconds as f64;
    let path = pause_path(base_dir);
    let tmp = path.with_extension("txt.tmp");
    std::fs::write(&tmp, pause_until.to_string())?;
    std::fs::rename(&tmp, &path)?;
    Ok(pause_until)
}

pub fn resume(base_dir: &Path) -> Result<()> {
    match std::fs::remove_file(pause_path(base_dir)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read an active pause deadline, if any and still in the future.
pub fn active_pause_deadline(base_dir: &Path) -> Option<f64> {
    let raw = std::fs::read_to_string(pause_path(base_dir)).ok()?;
    let deadline: f64 = raw.trim().parse().ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    (deadline > now).then_some(deadline)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clear_stale_session_files_removes_previous_run_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alerts.log"), "STALE").unwrap();
        clear_stale_session_files(dir.path()).unwrap();
        assert!(!dir.path().join("alerts.log").exists());
    }

    #[test]
    fn clear_stale_session_files_is_a_no_op_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        clear_stale_session_files(dir.path()).unwrap();
    }

    #[test]
    fn start_without_existing_daemon_proceeds() {
        let base = tempfile::tempdir().unwrap();
        let registry = tempfile::tempdir().unwrap();
        let outcome = prepare_start(base.path(), registry.path(), false);
        assert!(outcome.started);
    }

    #[test]
    fn pause_then_resume_clears_deadline() {
        let dir = tempfile::tempdir().unwrap();
        pause(dir.path(), 60).unwrap();
        assert!(active_pause_deadline(dir.path()).is_some());
        resume(dir.path()).unwrap();
        assert!(active_pause_deadline(dir.path()).is_none());
    }
}
