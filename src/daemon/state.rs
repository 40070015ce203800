//! In-memory session state, one `parking_lot::Mutex` per logical field
//! group (spec §5: "no task blocks another for more than the time it takes
//! to read/write a small integer set").

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::health::{ChipHealth, ChipRecovery, ChipState};

const RECENT_LINES_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Starting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub status: ConnectionStatus,
    pub port: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionCounters {
    pub lines_logged: u64,
    pub commands_sent: u64,
    pub alerts_triggered: u64,
    pub errors: u64,
}

pub struct SessionState {
    pub session_id: String,
    pub start_time_us: u64,
    pub counters: Mutex<SessionCounters>,
    pub connection: Mutex<ConnectionInfo>,
    pub recovery: Mutex<ChipRecovery>,
    pub pattern_counts: Mutex<std::collections::BTreeMap<String, u64>>,
    pub recent_lines: Mutex<VecDeque<String>>,
}

fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

impl SessionState {
    pub fn new(port: impl Into<String>) -> Self {
        SessionState {
            session_id: uuid::Uuid::new_v4().to_string(),
            start_time_us: now_us(),
            counters: Mutex::new(SessionCounters::default()),
            connection: Mutex::new(ConnectionInfo { status: ConnectionStatus::Starting, port: port.into() }),
            recovery: Mutex::new(ChipRecovery::default()),
            pattern_counts: Mutex::new(std::collections::BTreeMap::new()),
            recent_lines: Mutex::new(VecDeque::with_capacity(RECENT_LINES_CAPACITY)),
        }
    }

    pub fn record_line(&self, formatted: String) {
        let mut counters = self.counters.lock();
        counters.lines_logged += 1;
        drop(counters);

        let mut recent = self.recent_lines.lock();
        if recent.len() == RECENT_LINES_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(formatted);
    }

    pub fn record_alert(&self, pattern: &str) {
        let mut counters = self.counters.lock();
        counters.alerts_triggered += 1;
        drop(counters);

        *self.pattern_counts.lock().entry(pattern.to_string()).or_insert(0) += 1;
    }

    pub fn set_connection(&self, status: ConnectionStatus) {
        self.connection.lock().status = status;
    }

    pub fn chip_state(&self) -> ChipState {
        self.recovery.lock().state()
    }

    pub fn chip_health(&self) -> ChipHealth {
        self.recovery.lock().get_health()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_line_bounds_recent_lines_buffer() {
        let state = SessionState::new("/dev/ttyUSB0");
        for i in 0..(RECENT_LINES_CAPACITY + 10) {
            state.record_line(format!("line {i}"));
        }
        assert_eq!(state.recent_lines.lock().len(), RECENT_LINES_CAPACITY);
        assert_eq!(state.counters.lock().lines_logged, (RECENT_LINES_CAPACITY + 10) as u64);
    }

    #[test]
    fn record_alert_increments_pattern_count() {
        let state = SessionState::new("/dev/ttyUSB0");
        state.record_alert("CRASH");
        state.record_alert("CRASH");
        assert_eq!(*state.pattern_counts.lock().get("CRASH").unwrap(), 2);
        assert_eq!(state.counters.lock().alerts_triggered, 2);
    }
}
