//! Cross-process singleton enforcement: one live daemon per device, backed
//! by an OS file lock on `<base-dir>/singleton.pid` plus the PID written
//! inside it for liveness checks and `force`-kill.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::{EabError, Result};

fn singleton_path(base_dir: &Path) -> PathBuf {
    base_dir.join("singleton.pid")
}

pub struct ExistingDaemon {
    pub pid: u32,
    pub is_alive: bool,
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}

/// Read whatever `singleton.pid` currently says, without taking the lock.
/// Returns `None` if no daemon has ever started for this device.
pub fn check_singleton(base_dir: &Path) -> Option<ExistingDaemon> {
    let mut contents = String::new();
    File::open(singleton_path(base_dir)).ok()?.read_to_string(&mut contents).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;
    Some(ExistingDaemon { pid, is_alive: pid_is_alive(pid) })
}

#[cfg(unix)]
pub fn kill_existing_daemon(base_dir: &Path) -> bool {
    let Some(existing) = check_singleton(base_dir) else { return true };
    if !existing.is_alive {
        return true;
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(existing.pid as i32), nix::sys::signal::Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
pub fn kill_existing_daemon(_base_dir: &Path) -> bool {
    false
}

/// Held by the daemon process for its entire lifetime. Dropping it releases
/// the OS-level advisory lock; the `singleton.pid` file itself is left
/// behind (next `check_singleton` reads it, sees the PID is dead, and
/// treats the device as free).
#[derive(Debug)]
pub struct SingletonGuard {
    _file: File,
}

impl SingletonGuard {
    /// Acquire the lock for `base_dir`, writing our own PID into the file.
    /// Fails with [`EabError::ResourceBusy`] if another live process already
    /// holds it.
    pub fn acquire(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let path = singleton_path(base_dir);
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;

        if !matches!(file.try_lock_exclusive(), Ok(true)) {
            return Err(EabError::ResourceBusy(format!("{} is held by another process", path.display())));
        }

        let mut file = file;
        file.set_len(0)?;
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(SingletonGuard { _file: file })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_device_has_no_existing_daemon() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_singleton(dir.path()).is_none());
    }

    #[test]
    fn acquire_writes_our_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = SingletonGuard::acquire(dir.path()).unwrap();
        let existing = check_singleton(dir.path()).unwrap();
        assert_eq!(existing.pid, std::process::id());
        assert!(existing.is_alive);
    }

    #[test]
    fn second_acquire_while_first_is_held_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = SingletonGuard::acquire(dir.path()).unwrap();
        let err = SingletonGuard::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind().as_str(), "resource-busy");
    }
}
