//! Device registry: named bindings of a device to a chip, probe, and port,
//! persisted as JSON under the platform config directory, matching the
//! teacher's own `AppDirs`-based base-dir resolution.

pub mod lifecycle;
pub mod port_lock;
pub mod singleton;

use std::path::{Path, PathBuf};

use platform_dirs::AppDirs;
use serde::{Deserialize, Serialize};

use crate::error::{EabError, Result};

const APP_NAME: &str = "eab";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub chip: String,
    pub probe_kind: String,
    pub port_selector: String,
    #[serde(default)]
    pub firmware: Option<String>,
}

/// Root directory everything else (registry file, per-device base dirs,
/// port locks) is resolved relative to. Overridable for tests.
pub fn registry_dir() -> Result<PathBuf> {
    AppDirs::new(Some(APP_NAME), true)
        .map(|dirs| dirs.config_dir)
        .ok_or_else(|| EabError::Io(std::io::Error::other("could not resolve platform config directory")))
}

fn registry_file(registry_dir: &Path) -> PathBuf {
    registry_dir.join("devices.json")
}

/// The per-device directory holding the control files of the daemon
/// protocol (`status.json`, `latest.log`, `alerts.log`, ...).
pub fn base_dir(registry_dir: &Path, device_name: &str) -> PathBuf {
    registry_dir.join("devices").join(device_name)
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn load(registry_dir: &Path) -> Result<Self> {
        let path = registry_file(registry_dir);
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|e| EabError::FormatInvalid(format!("{}: {e}", path.display())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceRegistry::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, registry_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(registry_dir)?;
        let path = registry_file(registry_dir);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn add(&mut self, device: Device) -> Result<()> {
        if self.devices.iter().any(|d| d.name == device.name) {
            return Err(EabError::InvalidArgument(format!("device '{}' already registered", device.name)));
        }
        self.devices.push(device);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Device> {
        let index = self
            .devices
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| EabError::NotFound(format!("device '{name}' not registered")))?;
        Ok(self.devices.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn list(&self) -> &[Device] {
        &self.devices
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Device {
        Device { name: "board-a".into(), chip: "nrf5340".into(), probe_kind: "jlink".into(), port_selector: "000123456".into(), firmware: None }
    }

    #[test]
    fn add_then_list_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = DeviceRegistry::load(dir.path()).unwrap();
        assert!(reg.list().is_empty());
        reg.add(sample()).unwrap();
        reg.save(dir.path()).unwrap();

        let reloaded = DeviceRegistry::load(dir.path()).unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.get("board-a").unwrap().chip, "nrf5340");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = DeviceRegistry::default();
        reg.add(sample()).unwrap();
        let err = reg.add(sample()).unwrap_err();
        assert_eq!(err.kind().as_str(), "invalid-argument");
    }

    #[test]
    fn remove_unknown_device_is_not_found() {
        let mut reg = DeviceRegistry::default();
        let err = reg.remove("nope").unwrap_err();
        assert_eq!(err.kind().as_str(), "not-found");
    }
}
