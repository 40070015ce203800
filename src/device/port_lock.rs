//! Port-identifier locking: prevents two *different* device names from
//! claiming the same physical port or probe serial number.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::{EabError, Result};

fn sanitize(raw: &str) -> String {
    raw.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

fn ports_dir(registry_dir: &Path) -> PathBuf {
    registry_dir.join("ports")
}

fn lock_path(registry_dir: &Path, port_selector: &str) -> PathBuf {
    ports_dir(registry_dir).join(format!("{}.lock", sanitize(port_selector)))
}

#[derive(Debug)]
pub struct PortLockGuard {
    _file: File,
    path: PathBuf,
}

impl PortLockGuard {
    pub fn acquire(registry_dir: &Path, port_selector: &str) -> Result<Self> {
        let dir = ports_dir(registry_dir);
        std::fs::create_dir_all(&dir)?;
        let path = lock_path(registry_dir, port_selector);
        let mut file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;

        if !matches!(file.try_lock_exclusive(), Ok(true)) {
            return Err(EabError::ResourceBusy(format!("port '{port_selector}' is already locked by another device")));
        }

        file.set_len(0)?;
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(PortLockGuard { _file: file, path })
    }
}

impl Drop for PortLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct PortLockOwner {
    pub port_selector: String,
    pub pid: u32,
}

/// Enumerate every port-lock file, reading back the PID that wrote it. Used
/// by `force` start to best-effort terminate every stray holder, not just
/// the one recorded by the singleton file.
pub fn list_all_locks(registry_dir: &Path) -> Vec<PortLockOwner> {
    let dir = ports_dir(registry_dir);
    let Ok(entries) = std::fs::read_dir(&dir) else { return Vec::new() };

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension()?.to_str()? != "lock" {
                return None;
            }
            let mut contents = String::new();
            File::open(&path).ok()?.read_to_string(&mut contents).ok()?;
            let pid: u32 = contents.trim().parse().ok()?;
            let port_selector = path.file_stem()?.to_str()?.to_string();
            Some(PortLockOwner { port_selector, pid })
        })
        .collect()
}

/// Remove lock files whose recorded PID is no longer alive. Safe to call
/// any time; a live lock is still held exclusively by its owning process,
/// so deleting the file underneath it does not grant access to anyone else
/// until that process also drops its handle.
#[cfg(unix)]
pub fn cleanup_dead_locks(registry_dir: &Path) {
    for owner in list_all_locks(registry_dir) {
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(owner.pid as i32), None).is_ok();
        if !alive {
            let _ = std::fs::remove_file(lock_path(registry_dir, &owner.port_selector));
        }
    }
}

#[cfg(not(unix))]
pub fn cleanup_dead_locks(_registry_dir: &Path) {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_acquire_of_same_port_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = PortLockGuard::acquire(dir.path(), "/dev/ttyUSB0").unwrap();
        let err = PortLockGuard::acquire(dir.path(), "/dev/ttyUSB0").unwrap_err();
        assert_eq!(err.kind().as_str(), "resource-busy");
    }

    #[test]
    fn different_ports_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _a = PortLockGuard::acquire(dir.path(), "/dev/ttyUSB0").unwrap();
        let _b = PortLockGuard::acquire(dir.path(), "/dev/ttyUSB1").unwrap();
    }

    #[test]
    fn sanitizes_slashes_in_port_names() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = PortLockGuard::acquire(dir.path(), "/dev/ttyUSB0").unwrap();
        assert!(lock_path(dir.path(), "/dev/ttyUSB0").exists());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _guard = PortLockGuard::acquire(dir.path(), "/dev/ttyUSB0").unwrap();
        }
        let _reacquired = PortLockGuard::acquire(dir.path(), "/dev/ttyUSB0").unwrap();
    }
}
