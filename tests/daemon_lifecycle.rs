//! End-to-end exercise of device registry, start/stop lifecycle, and the
//! cross-process exclusivity guards, the way `eabctl daemon start`/`stop`
//! drive them together.

use eab::device::{self, lifecycle, port_lock::PortLockGuard, singleton::SingletonGuard, Device, DeviceRegistry};

fn sample_device() -> Device {
    Device {
        name: "board-a".into(),
        chip: "nrf5340".into(),
        probe_kind: "serial:115200".into(),
        port_selector: "/dev/ttyACM0".into(),
        firmware: None,
    }
}

#[test]
fn start_stop_round_trip_through_the_registry() {
    let registry_dir = tempfile::tempdir().unwrap();
    let mut registry = DeviceRegistry::load(registry_dir.path()).unwrap();
    let dev = sample_device();
    registry.add(dev.clone()).unwrap();
    registry.save(registry_dir.path()).unwrap();

    let reloaded = DeviceRegistry::load(registry_dir.path()).unwrap();
    assert_eq!(reloaded.get(&dev.name), Some(&dev));

    let base = device::base_dir(registry_dir.path(), &dev.name);
    let outcome = lifecycle::prepare_start(&base, registry_dir.path(), false);
    assert!(outcome.started);

    let _port_guard = PortLockGuard::acquire(registry_dir.path(), &dev.port_selector).unwrap();
    let _singleton_guard = SingletonGuard::acquire(&base).unwrap();

    let (stopped, pid) = lifecycle::stop(&base);
    assert!(stopped);
    assert_eq!(pid, Some(std::process::id()));
}

#[test]
fn second_start_without_force_is_refused_with_the_first_pid() {
    let registry_dir = tempfile::tempdir().unwrap();
    let base = device::base_dir(registry_dir.path(), "board-b");

    let first = lifecycle::prepare_start(&base, registry_dir.path(), false);
    assert!(first.started);
    let _singleton_guard = SingletonGuard::acquire(&base).unwrap();

    let second = lifecycle::prepare_start(&base, registry_dir.path(), false);
    assert!(!second.started);
    assert_eq!(second.pid, Some(std::process::id()));
}

#[test]
fn stale_session_files_do_not_survive_a_fresh_start() {
    let registry_dir = tempfile::tempdir().unwrap();
    let base = device::base_dir(registry_dir.path(), "board-c");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(base.join("status.json"), "STALE").unwrap();
    std::fs::write(base.join("alerts.log"), "STALE").unwrap();
    std::fs::write(base.join("events.jsonl"), "STALE").unwrap();

    let outcome = lifecycle::prepare_start(&base, registry_dir.path(), false);
    assert!(outcome.started);
    lifecycle::clear_stale_session_files(&base).unwrap();

    assert!(!base.join("status.json").exists());
    assert!(!base.join("alerts.log").exists());
    assert!(!base.join("events.jsonl").exists());
}

#[test]
fn pause_then_resume_round_trips_through_the_file() {
    let registry_dir = tempfile::tempdir().unwrap();
    let base = device::base_dir(registry_dir.path(), "board-d");

    assert!(lifecycle::active_pause_deadline(&base).is_none());
    lifecycle::pause(&base, 3600).unwrap();
    assert!(lifecycle::active_pause_deadline(&base).is_some());

    lifecycle::resume(&base).unwrap();
    assert!(lifecycle::active_pause_deadline(&base).is_none());
}
