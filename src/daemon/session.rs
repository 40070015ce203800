//! The session daemon's three long-lived workers (reader, status-publisher,
//! command-poller), grounded in `original_source/eab/serial_daemon.py`'s
//! `SerialMonitorDaemon.run()`/`log_line()`/`check_commands()`/`save_stats()`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::device::lifecycle;
use crate::error::Result;
use crate::health::{ChipHealth, RecoveryAction};
use crate::transport::reconnect::{BackoffConfig, ConnectionState, Reconnector};
use crate::transport::Transport;

use super::state::{ConnectionStatus, SessionCounters, SessionState};

/// Patterns that route a line into `alerts.log`, generalized from
/// `serial_daemon.py`'s BLE-specific `ALERT_PATTERNS` (its `GAP_EVENT`/`GATT`
/// entries were specific to that prototype's Bluetooth target and have no
/// meaning for an arbitrary device).
pub const ALERT_PATTERNS: &[&str] =
    &["DISCONNECT", "ERROR", "FAIL", "TIMEOUT", "CRASH", "ASSERT", "PANIC", "ABORT"];

fn matching_alert_pattern(line: &str) -> Option<&'static str> {
    let upper = line.to_uppercase();
    ALERT_PATTERNS.iter().copied().find(|p| upper.contains(p))
}

pub fn status_path(base_dir: &Path) -> PathBuf {
    base_dir.join("status.json")
}

pub fn latest_log_path(base_dir: &Path) -> PathBuf {
    base_dir.join("latest.log")
}

pub fn alerts_log_path(base_dir: &Path) -> PathBuf {
    base_dir.join("alerts.log")
}

pub fn events_path(base_dir: &Path) -> PathBuf {
    base_dir.join("events.jsonl")
}

pub fn cmd_path(base_dir: &Path) -> PathBuf {
    base_dir.join("cmd.txt")
}

fn now_secs_f64() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// `HH:MM:SS.mmm` in UTC, matching `serial_daemon.py`'s
/// `datetime.now().strftime("%H:%M:%S.%f")[:-3]`.
fn timestamp_hms_millis() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs_today = now.as_secs() % 86_400;
    let (h, m, s) = (secs_today / 3600, (secs_today % 3600) / 60, secs_today % 60);
    format!("{h:02}:{m:02}:{s:02}.{:03}", now.subsec_millis())
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub schema_version: u32,
    pub timestamp: String,
    pub session_id: String,
    pub device: String,
    pub pid: u32,
    pub connection: super::state::ConnectionInfo,
    pub health: ChipHealth,
    pub counters: SessionCounters,
    pub pattern_counts: std::collections::BTreeMap<String, u64>,
    pub paused_until: Option<f64>,
    pub recovery_exhausted: bool,
}

pub struct SessionConfig {
    pub base_dir: PathBuf,
    pub device_name: String,
    pub port: String,
    pub read_timeout: Duration,
    pub idle_sleep: Duration,
    pub status_interval: Duration,
    pub command_poll_interval: Duration,
}

impl SessionConfig {
    pub fn new(base_dir: PathBuf, device_name: impl Into<String>, port: impl Into<String>) -> Self {
        SessionConfig {
            base_dir,
            device_name: device_name.into(),
            port: port.into(),
            read_timeout: Duration::from_millis(500),
            idle_sleep: Duration::from_millis(2),
            status_interval: Duration::from_millis(500),
            command_poll_interval: Duration::from_millis(100),
        }
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Best-effort alert/log/status write: a full disk or read-only filesystem
/// degrades the session to in-memory-only state rather than exiting, per
/// spec §4.1's write-failure semantics.
fn write_or_degrade(state: &SessionState, what: &str, f: impl FnOnce() -> std::io::Result<()>) {
    if let Err(e) = f() {
        log::warn!("{what} write failed, continuing in-memory-only: {e}");
        state.counters.lock().errors += 1;
    }
}

fn write_log_header(file: &mut File, config: &SessionConfig) -> std::io::Result<()> {
    let started = humantime::format_rfc3339(SystemTime::now());
    writeln!(file, "\n{}", "=".repeat(60))?;
    writeln!(file, "eab session log - started {started}")?;
    writeln!(file, "device: {}, port: {}", config.device_name, config.port)?;
    writeln!(file, "{}\n", "=".repeat(60))?;
    file.flush()
}

/// Owns the daemon's transport and state for one session. `run` blocks the
/// calling thread (normally the detached daemon process's main thread) until
/// `stop()` is called from another thread or signal handler.
pub struct Session {
    pub state: Arc<SessionState>,
    stop: Arc<AtomicBool>,
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            state: Arc::new(SessionState::new(config.port.clone())),
            stop: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Clear stale session files, publish the `starting` placeholder status,
    /// then run the reader/status/command loops until stopped.
    pub fn run(&self, transport: Box<dyn Transport>, interface: &str, speed: u32) -> Result<()> {
        lifecycle::clear_stale_session_files(&self.config.base_dir)?;
        self.publish_status(None);

        let transport = Arc::new(Mutex::new(transport));
        transport.lock().connect(&self.config.device_name, interface, speed)?;
        transport.lock().start_telemetry(None)?;
        self.state.set_connection(ConnectionStatus::Connected);

        let mut log_file = OpenOptions::new().create(true).write(true).truncate(true).open(latest_log_path(&self.config.base_dir))?;
        write_log_header(&mut log_file, &self.config)?;
        let mut alerts_file = OpenOptions::new().create(true).write(true).truncate(true).open(alerts_log_path(&self.config.base_dir))?;
        write_log_header(&mut alerts_file, &self.config)?;

        let status_handle = self.spawn_status_publisher();
        let command_handle = self.spawn_command_poller(transport.clone());

        let mut pending = String::new();
        let mut reconnector = Reconnector::new(BackoffConfig::default());
        while !self.stop.load(Ordering::SeqCst) {
            let read_result = transport.lock().read(0);
            match read_result {
                Ok(bytes) if !bytes.is_empty() => {
                    if reconnector.state() != ConnectionState::Connected {
                        reconnector.on_connected();
                        self.state.set_connection(ConnectionStatus::Connected);
                    }
                    pending.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = pending.find('\n') {
                        let line: String = pending.drain(..=pos).collect();
                        let line = line.trim_end_matches(['\n', '\r']);
                        if !line.is_empty() {
                            self.handle_line(line, &mut log_file, &mut alerts_file);
                        }
                    }
                    self.maybe_recover(&transport);
                }
                Ok(_) => std::thread::sleep(self.config.idle_sleep),
                Err(e) => {
                    log::warn!("transport read error: {e}");
                    self.state.counters.lock().errors += 1;
                    reconnector.on_disconnected();
                    self.state.set_connection(ConnectionStatus::Reconnecting);

                    match reconnector.next_delay() {
                        Some(delay) => {
                            std::thread::sleep(delay);
                            let mut t = transport.lock();
                            let reconnected = t
                                .connect(&self.config.device_name, interface, speed)
                                .and_then(|_| t.start_telemetry(None));
                            drop(t);
                            if reconnected.is_ok() {
                                reconnector.on_connected();
                                self.state.set_connection(ConnectionStatus::Connected);
                                // A fresh transport connection earns the chip
                                // a fresh recovery budget.
                                self.state.recovery.lock().reset_counters();
                            }
                        }
                        None => {
                            log::error!("giving up reconnecting after {} attempts", reconnector.attempt());
                            self.state.set_connection(ConnectionStatus::Error);
                            break;
                        }
                    }
                }
            }
        }

        let _ = command_handle.join();
        let _ = status_handle.join();

        self.write_log_footer(&mut log_file);
        let mut transport = transport.lock();
        if let Some(action) = self.state.recovery.lock().clean_shutdown_action() {
            log::info!("leaving chip in a clean state before disconnect: {action:?}");
            let _ = transport.reset(matches!(action, RecoveryAction::Bootloader));
        }
        let _ = transport.stop_telemetry();
        let _ = transport.disconnect();
        Ok(())
    }

    /// Ask the recovery state machine whether the chip needs resetting and,
    /// if so, run the action(s) it asks for. Gives up silently once
    /// [`crate::health::ChipRecovery::has_given_up`] is true; the operator
    /// sees that via the published chip state instead.
    fn maybe_recover(&self, transport: &Arc<Mutex<Box<dyn Transport>>>) {
        let mut recovery = self.state.recovery.lock();
        if !recovery.needs_recovery() {
            return;
        }
        let actions = recovery.perform_recovery();
        let delay = recovery.crash_recovery_delay();
        drop(recovery);

        std::thread::sleep(delay);
        let mut t = transport.lock();
        for action in &actions {
            if let Err(e) = t.reset(matches!(action, RecoveryAction::Bootloader)) {
                log::error!("recovery reset failed: {e}");
                self.state.counters.lock().errors += 1;
            }
        }
        drop(t);
        self.append_event(&serde_json::json!({
            "type": "recovery",
            "actions": actions.iter().map(|a| format!("{a:?}")).collect::<Vec<_>>(),
        }));
    }

    fn handle_line(&self, line: &str, log_file: &mut File, alerts_file: &mut File) {
        let ts = timestamp_hms_millis();
        let formatted = format!("[{ts}] {line}");
        self.state.record_line(formatted.clone());
        write_or_degrade(&self.state, "latest.log", || writeln!(log_file, "{formatted}").and_then(|_| log_file.flush()));

        if let Some(pattern) = matching_alert_pattern(line) {
            self.state.record_alert(pattern);
            write_or_degrade(&self.state, "alerts.log", || {
                writeln!(alerts_file, "[{ts}] [{pattern}] {line}").and_then(|_| alerts_file.flush())
            });
            self.append_event(&serde_json::json!({"type": "alert", "pattern": pattern, "line": line, "timestamp": ts}));
        }

        let mut recovery = self.state.recovery.lock();
        let previous = recovery.state();
        recovery.process_line(line);
        let current = recovery.state();
        drop(recovery);
        if current != previous {
            self.append_event(&serde_json::json!({"type": "chip_state", "from": previous.as_str(), "to": current.as_str(), "timestamp": ts}));
        }
    }

    fn append_event(&self, event: &serde_json::Value) {
        write_or_degrade(&self.state, "events.jsonl", || {
            let mut file = OpenOptions::new().create(true).append(true).open(events_path(&self.config.base_dir))?;
            writeln!(file, "{event}")
        });
    }

    fn write_log_footer(&self, log_file: &mut File) {
        let counters = self.state.counters.lock().clone();
        let footer = format!(
            "\n{sep}\nlog ended: {ts}\nlines logged: {lines}\nalerts triggered: {alerts}\ncommands sent: {cmds}\n{sep}\n",
            sep = "=".repeat(60),
            ts = humantime::format_rfc3339(SystemTime::now()),
            lines = counters.lines_logged,
            alerts = counters.alerts_triggered,
            cmds = counters.commands_sent,
        );
        let _ = log_file.write_all(footer.as_bytes());
        let _ = log_file.flush();
    }

    fn publish_status(&self, paused_until: Option<f64>) {
        let snapshot = StatusSnapshot {
            schema_version: 1,
            timestamp: humantime::format_rfc3339(SystemTime::now()).to_string(),
            session_id: self.state.session_id.clone(),
            device: self.config.device_name.clone(),
            pid: std::process::id(),
            connection: self.state.connection.lock().clone(),
            health: self.state.chip_health(),
            counters: self.state.counters.lock().clone(),
            pattern_counts: self.state.pattern_counts.lock().clone(),
            paused_until,
            recovery_exhausted: self.state.recovery.lock().has_given_up(),
        };
        write_or_degrade(&self.state, "status.json", || {
            let bytes = serde_json::to_vec_pretty(&snapshot).unwrap_or_default();
            atomic_write(&status_path(&self.config.base_dir), &bytes).map_err(|e| match e {
                crate::error::EabError::Io(io) => io,
                other => std::io::Error::other(other.to_string()),
            })
        });
    }

    fn spawn_status_publisher(&self) -> JoinHandle<()> {
        let stop = self.stop.clone();
        let state = self.state.clone();
        let base_dir = self.config.base_dir.clone();
        let interval = self.config.status_interval;
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                let paused_until = lifecycle::active_pause_deadline(&base_dir);
                let snapshot = StatusSnapshot {
                    schema_version: 1,
                    timestamp: humantime::format_rfc3339(SystemTime::now()).to_string(),
                    session_id: state.session_id.clone(),
                    device: String::new(),
                    pid: std::process::id(),
                    connection: state.connection.lock().clone(),
                    health: state.chip_health(),
                    counters: state.counters.lock().clone(),
                    pattern_counts: state.pattern_counts.lock().clone(),
                    paused_until,
                    recovery_exhausted: state.recovery.lock().has_given_up(),
                };
                write_or_degrade(&state, "status.json", || {
                    let bytes = serde_json::to_vec_pretty(&snapshot).unwrap_or_default();
                    let tmp = status_path(&base_dir).with_extension("tmp");
                    std::fs::write(&tmp, &bytes)?;
                    std::fs::rename(&tmp, status_path(&base_dir))
                });
            }
        })
    }

    /// Poll `cmd.txt` for newly-written commands and forward each
    /// non-blank line to the transport, matching `check_commands()`'s
    /// mtime-gated read-then-truncate discipline.
    fn spawn_command_poller(&self, transport: Arc<Mutex<Box<dyn Transport>>>) -> JoinHandle<()> {
        let stop = self.stop.clone();
        let state = self.state.clone();
        let base_dir = self.config.base_dir.clone();
        let interval = self.config.command_poll_interval;
        std::thread::spawn(move || {
            let path = cmd_path(&base_dir);
            let mut last_mtime = None;
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                let Ok(meta) = std::fs::metadata(&path) else { continue };
                let Ok(mtime) = meta.modified() else { continue };
                if Some(mtime) == last_mtime {
                    continue;
                }
                last_mtime = Some(mtime);
                let Ok(contents) = std::fs::read_to_string(&path) else { continue };
                if contents.trim().is_empty() {
                    continue;
                }
                let _ = std::fs::write(&path, "");
                for cmd in contents.lines().map(str::trim).filter(|c| !c.is_empty()) {
                    match transport.lock().write(0, format!("{cmd}\n").as_bytes()) {
                        Ok(_) => state.counters.lock().commands_sent += 1,
                        Err(e) => {
                            log::warn!("command write failed: {e}");
                            state.counters.lock().errors += 1;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alert_pattern_matching_is_case_insensitive() {
        assert_eq!(matching_alert_pattern("saw a Timeout waiting"), Some("TIMEOUT"));
        assert_eq!(matching_alert_pattern("everything nominal"), None);
    }

    #[test]
    fn dropped_ble_specific_patterns_no_longer_match() {
        assert_eq!(matching_alert_pattern("GAP_EVENT fired"), None);
        assert_eq!(matching_alert_pattern("GATT write"), None);
    }

    #[test]
    fn timestamp_format_has_millis() {
        let ts = timestamp_hms_millis();
        assert_eq!(ts.len(), 12);
        assert_eq!(ts.chars().nth(2), Some(':'));
    }
}
