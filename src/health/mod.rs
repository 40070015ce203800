//! Chip-health state machine: classifies console output into a chip state
//! (booting, running, crashed, stuck, ...) and decides when and how to
//! attempt a recovery reset.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipState {
    Unknown,
    Booting,
    Running,
    Crashed,
    BootLoop,
    Stuck,
    Bootloader,
    Recovery,
}

impl ChipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChipState::Unknown => "unknown",
            ChipState::Booting => "booting",
            ChipState::Running => "running",
            ChipState::Crashed => "crashed",
            ChipState::BootLoop => "bootloop",
            ChipState::Stuck => "stuck",
            ChipState::Bootloader => "bootloader",
            ChipState::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootEvent {
    pub at: Instant,
    pub reset_reason: String,
    pub boot_mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChipHealth {
    pub state: ChipState,
    pub last_output_age: Option<Duration>,
    pub boot_count_last_minute: usize,
    pub last_reset_reason: String,
    pub consecutive_crashes: u32,
    pub uptime: Duration,
    pub is_responsive: bool,
}

/// What [`ChipRecovery::perform_recovery`] asks its caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Bootloader,
    HardReset,
}

const BOOT_PATTERNS: &[&str] = &[
    "rst:0x",
    "boot:0x",
    "esp-rom:",
    "chip revision:",
    "esp-idf",
    "boot: esp32",
    "configsip:",
    "*** booting zephyr",
    "zephyr os build",
];

const CRASH_PATTERNS: &[&str] = &[
    "guru meditation",
    "backtrace:",
    "abort()",
    "panic'ed",
    "loadprohibited",
    "storeprohibited",
    "instrfetchprohibited",
    "loadstorealignment",
    "loadstoreerror",
    "illegalinstruction",
    "integerdividebyzero",
    "unhandled debug exception",
    "cache disabled but cached memory region accessed",
    "cache err",
    "cache_err",
    "corrupt heap",
    "heap_caps_alloc",
    "heap corrupt",
    "stack smashing",
    "stack overflow",
    "out of memory",
    "alloc failed",
    "assert failed",
    "assertion",
    "esp_error_check",
    "vapplicationstackoverflowhook",
    "configassert",
    "brownout detector",
    "brownout",
    "double exception",
    "flash read err",
    "e: ***** ",
    "e: r0/a0:",
    "e: current thread:",
    ">>> zephyr fatal error",
];

const BOOTLOADER_PATTERNS: &[&str] = &[
    "waiting for download",
    "download mode",
    "download(usb/uart0)",
    "boot:0x0",
    "serial flasher",
];

const WATCHDOG_PATTERNS: &[&str] = &[
    "task watchdog got triggered",
    "interrupt wdt timeout",
    "rtc_wdt",
    "int_wdt",
    "wdt reset",
];

const RUNNING_PATTERNS: &[&str] = &[
    "app_main()",
    "returned from app_main",
    "main_task:",
    "heap_init:",
    "<inf>",
    "<dbg>",
    "<wrn>",
    "uart:~$",
];

fn contains_any(line_lower: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| line_lower.contains(p))
}

fn reset_reason_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)rst:0x(\w+)\s*\(([^)]+)\)"#).unwrap())
}

fn boot_mode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)boot:0x(\w+)\s*\(([^)]+)\)"#).unwrap())
}

pub struct ChipRecoveryConfig {
    pub boot_loop_threshold: usize,
    pub stuck_timeout: Duration,
    pub crash_recovery_delay: Duration,
    pub max_recovery_attempts: u32,
    pub activity_window: Duration,
    pub activity_threshold: usize,
}

impl Default for ChipRecoveryConfig {
    fn default() -> Self {
        ChipRecoveryConfig {
            boot_loop_threshold: 5,
            stuck_timeout: Duration::from_secs(60),
            crash_recovery_delay: Duration::from_secs(2),
            max_recovery_attempts: 3,
            activity_window: Duration::from_secs(30),
            activity_threshold: 10,
        }
    }
}

/// Monitors chip output and decides when and how to reset a stuck or
/// crashed target. Feed it every line received from the transport via
/// [`ChipRecovery::process_line`]; it never reads or writes the device
/// itself, so the reset action lives with the caller ([`RecoveryAction`]).
pub struct ChipRecovery {
    config: ChipRecoveryConfig,
    state: ChipState,
    last_output_at: Option<Instant>,
    boot_events: VecDeque<BootEvent>,
    consecutive_crashes: u32,
    recovery_attempts: u32,
    gave_up: bool,
    boot_start_at: Option<Instant>,
    last_reset_reason: String,
    last_boot_mode: String,
    activity_timestamps: VecDeque<Instant>,
}

impl ChipRecovery {
    pub fn new(config: ChipRecoveryConfig) -> Self {
        ChipRecovery {
            config,
            state: ChipState::Unknown,
            last_output_at: None,
            boot_events: VecDeque::new(),
            consecutive_crashes: 0,
            recovery_attempts: 0,
            gave_up: false,
            boot_start_at: None,
            last_reset_reason: String::new(),
            last_boot_mode: String::new(),
            activity_timestamps: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ChipState {
        self.state
    }

    fn set_state(&mut self, new_state: ChipState) {
        if new_state != self.state {
            log::info!("chip state: {} -> {}", self.state.as_str(), new_state.as_str());
            self.state = new_state;
        }
    }

    pub fn process_line(&mut self, line: &str) {
        let now = Instant::now();
        self.last_output_at = Some(now);
        self.activity_timestamps.push_back(now);

        let lower = line.to_lowercase();

        if contains_any(&lower, BOOT_PATTERNS) {
            self.handle_boot_detected(now);
        }
        if contains_any(&lower, CRASH_PATTERNS) {
            self.handle_crash_detected(line);
        }
        if contains_any(&lower, BOOTLOADER_PATTERNS) {
            self.set_state(ChipState::Bootloader);
        }
        if contains_any(&lower, WATCHDOG_PATTERNS) {
            self.handle_watchdog_detected(line);
        }
        if contains_any(&lower, RUNNING_PATTERNS) {
            self.set_state(ChipState::Running);
            self.consecutive_crashes = 0;
            self.recovery_attempts = 0;
        }
        if lower.contains("rst:0x") {
            self.parse_reset_reason(line);
        }

        let cutoff = now.checked_sub(self.config.activity_window).unwrap_or(now);
        while matches!(self.activity_timestamps.front(), Some(t) if *t < cutoff) {
            self.activity_timestamps.pop_front();
        }
        if self.activity_timestamps.len() >= self.config.activity_threshold
            && !matches!(self.state, ChipState::Crashed | ChipState::BootLoop)
            && self.state != ChipState::Running
        {
            log::info!(
                "activity-based running state detected ({} lines in {:?})",
                self.activity_timestamps.len(),
                self.config.activity_window
            );
            self.set_state(ChipState::Running);
            self.consecutive_crashes = 0;
            self.recovery_attempts = 0;
        }
    }

    fn handle_boot_detected(&mut self, now: Instant) {
        self.boot_events.push_back(BootEvent {
            at: now,
            reset_reason: self.last_reset_reason.clone(),
            boot_mode: self.last_boot_mode.clone(),
        });

        let cutoff = now.checked_sub(Duration::from_secs(5 * 60)).unwrap_or(now);
        while matches!(self.boot_events.front(), Some(e) if e.at <= cutoff) {
            self.boot_events.pop_front();
        }

        let minute_ago = now.checked_sub(Duration::from_secs(60)).unwrap_or(now);
        let recent_boots = self.boot_events.iter().filter(|e| e.at > minute_ago).count();

        if recent_boots >= self.config.boot_loop_threshold {
            self.set_state(ChipState::BootLoop);
            log::error!("boot loop detected: {recent_boots} boots in last minute");
        } else {
            self.set_state(ChipState::Booting);
            self.boot_start_at = Some(now);
        }
    }

    fn handle_crash_detected(&mut self, line: &str) {
        self.consecutive_crashes += 1;
        self.set_state(ChipState::Crashed);
        log::error!("crash detected: {}", &line[..line.len().min(100)]);
    }

    fn handle_watchdog_detected(&mut self, line: &str) {
        log::warn!("watchdog triggered: {}", &line[..line.len().min(100)]);
        self.set_state(ChipState::Crashed);
        self.consecutive_crashes += 1;
    }

    fn parse_reset_reason(&mut self, line: &str) {
        if let Some(caps) = reset_reason_re().captures(line) {
            self.last_reset_reason = caps[2].to_string();
        }
        if let Some(caps) = boot_mode_re().captures(line) {
            self.last_boot_mode = caps[2].to_string();
        }
    }

    pub fn get_health(&self) -> ChipHealth {
        let now = Instant::now();
        let minute_ago = now.checked_sub(Duration::from_secs(60)).unwrap_or(now);
        let recent_boots = self.boot_events.iter().filter(|e| e.at > minute_ago).count();

        let uptime = match (self.boot_start_at, self.state == ChipState::Running) {
            (Some(start), true) => now.saturating_duration_since(start),
            _ => Duration::ZERO,
        };

        let (last_output_age, is_responsive) = match self.last_output_at {
            Some(t) => {
                let silence = now.saturating_duration_since(t);
                (Some(silence), silence < self.config.stuck_timeout)
            }
            None => (None, true),
        };

        ChipHealth {
            state: self.state,
            last_output_age,
            boot_count_last_minute: recent_boots,
            last_reset_reason: self.last_reset_reason.clone(),
            consecutive_crashes: self.consecutive_crashes,
            uptime,
            is_responsive,
        }
    }

    /// True once [`Self::needs_recovery`] has given up after exhausting
    /// `max_recovery_attempts`, until [`Self::reset_counters`] is called.
    pub fn has_given_up(&self) -> bool {
        self.gave_up
    }

    pub fn needs_recovery(&mut self) -> bool {
        if self.recovery_attempts >= self.config.max_recovery_attempts {
            if !self.gave_up {
                log::error!("max recovery attempts reached, giving up");
                self.gave_up = true;
            }
            return false;
        }

        let health = self.get_health();
        if health.state == ChipState::Crashed || health.state == ChipState::BootLoop {
            return true;
        }

        if let Some(t) = self.last_output_at {
            let silence = Instant::now().saturating_duration_since(t);
            if silence > self.config.stuck_timeout {
                self.set_state(ChipState::Stuck);
                return true;
            }
        }

        false
    }

    /// Decide the recovery action(s) for the current state and bump the
    /// attempt counter. Does not sleep or touch the transport; the caller
    /// is expected to wait `crash_recovery_delay` then issue the returned
    /// actions in order.
    pub fn perform_recovery(&mut self) -> Vec<RecoveryAction> {
        self.recovery_attempts += 1;
        let health = self.get_health();
        log::warn!(
            "recovery attempt {} (state={}, crashes={})",
            self.recovery_attempts,
            health.state.as_str(),
            health.consecutive_crashes
        );

        let actions = match health.state {
            ChipState::BootLoop => vec![RecoveryAction::Bootloader, RecoveryAction::HardReset],
            _ => vec![RecoveryAction::HardReset],
        };

        self.set_state(ChipState::Recovery);
        actions
    }

    pub fn crash_recovery_delay(&self) -> Duration {
        self.config.crash_recovery_delay
    }

    /// Recovery action to run before disconnecting, if the chip is in a
    /// state that shouldn't be left that way.
    pub fn clean_shutdown_action(&self) -> Option<RecoveryAction> {
        match self.state {
            ChipState::Bootloader | ChipState::Stuck | ChipState::Crashed => Some(RecoveryAction::HardReset),
            _ => None,
        }
    }

    pub fn reset_counters(&mut self) {
        self.consecutive_crashes = 0;
        self.recovery_attempts = 0;
        self.gave_up = false;
        self.boot_events.clear();
        self.activity_timestamps.clear();
        self.state = ChipState::Unknown;
    }
}

impl Default for ChipRecovery {
    fn default() -> Self {
        ChipRecovery::new(ChipRecoveryConfig::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boot_line_transitions_to_booting() {
        let mut r = ChipRecovery::default();
        r.process_line("rst:0x1 (POWERON),boot:0x13 (SPI_FAST_FLASH_BOOT)");
        assert_eq!(r.state(), ChipState::Booting);
        assert_eq!(r.get_health().last_reset_reason, "POWERON");
    }

    #[test]
    fn crash_line_transitions_to_crashed_and_counts() {
        let mut r = ChipRecovery::default();
        r.process_line("Guru Meditation Error: Core 0 panic'ed");
        assert_eq!(r.state(), ChipState::Crashed);
        assert_eq!(r.get_health().consecutive_crashes, 1);
        assert!(r.needs_recovery());
    }

    #[test]
    fn watchdog_line_is_treated_as_crash_not_misread_as_running() {
        let mut r = ChipRecovery::default();
        r.process_line("E (1234) task_wdt: Task watchdog got triggered");
        assert_eq!(r.state(), ChipState::Crashed);
    }

    #[test]
    fn running_line_resets_crash_counters() {
        let mut r = ChipRecovery::default();
        r.process_line("Guru Meditation Error");
        assert_eq!(r.get_health().consecutive_crashes, 1);
        r.process_line("I (512) app_main(): started");
        assert_eq!(r.state(), ChipState::Running);
        assert_eq!(r.get_health().consecutive_crashes, 0);
    }

    #[test]
    fn boot_loop_triggers_after_threshold_within_a_minute() {
        let mut r = ChipRecovery::new(ChipRecoveryConfig {
            boot_loop_threshold: 3,
            ..ChipRecoveryConfig::default()
        });
        for _ in 0..3 {
            r.process_line("rst:0x1 (POWERON),boot:0x13 (SPI_FAST_FLASH_BOOT)");
        }
        assert_eq!(r.state(), ChipState::BootLoop);
    }

    #[test]
    fn perform_recovery_on_bootloop_enters_bootloader_first() {
        let mut r = ChipRecovery::new(ChipRecoveryConfig {
            boot_loop_threshold: 1,
            ..ChipRecoveryConfig::default()
        });
        r.process_line("rst:0x1 (POWERON),boot:0x13 (SPI_FAST_FLASH_BOOT)");
        assert_eq!(r.state(), ChipState::BootLoop);
        let actions = r.perform_recovery();
        assert_eq!(actions, vec![RecoveryAction::Bootloader, RecoveryAction::HardReset]);
        assert_eq!(r.state(), ChipState::Recovery);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut r = ChipRecovery::new(ChipRecoveryConfig {
            max_recovery_attempts: 2,
            ..ChipRecoveryConfig::default()
        });
        r.process_line("Guru Meditation Error");
        assert!(r.needs_recovery());
        r.perform_recovery();
        r.process_line("Guru Meditation Error");
        assert!(r.needs_recovery());
        r.perform_recovery();
        r.process_line("Guru Meditation Error");
        assert!(!r.needs_recovery());
        assert!(r.has_given_up());
        r.reset_counters();
        assert!(!r.has_given_up());
    }
}
