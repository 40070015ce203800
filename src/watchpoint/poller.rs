//! Non-halting watchpoint polling: a background thread that repeatedly
//! reads a comparator's match flag and emits a hit event each time it
//! fires, instead of halting the core the way a hardware breakpoint would.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::error::{EabError, Result};
use crate::transport::Transport;

use super::comparator::Comparator;

const HIGH_POLL_HZ_WARNING_THRESHOLD: u32 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct WatchpointHit {
    pub ts_us: u64,
    pub label: String,
    pub address_hex: String,
    pub value_hex: String,
}

fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

pub struct WatchpointPollerConfig {
    pub poll_hz: u32,
    pub events_file: Option<PathBuf>,
    /// Some cores need a write-back to the matched flag before it can fire
    /// again; see `Register::write_to_clear_matched`.
    pub write_to_clear_matched: bool,
}

impl Default for WatchpointPollerConfig {
    fn default() -> Self {
        WatchpointPollerConfig { poll_hz: 100, events_file: None, write_to_clear_matched: false }
    }
}

pub fn warn_if_poll_rate_high(poll_hz: u32) {
    if poll_hz > HIGH_POLL_HZ_WARNING_THRESHOLD {
        log::warn!(
            "poll-hz={poll_hz} is high (>{HIGH_POLL_HZ_WARNING_THRESHOLD}). SWD overhead ~{:.0}%. \
             Consider reducing if target behavior changes.",
            poll_hz as f64 * 0.01
        );
    }
}

pub struct WatchpointPoller {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl WatchpointPoller {
    /// Spawn the polling thread. `transport` must already be connected;
    /// this call takes ownership of it for the lifetime of the poll.
    pub fn start(
        mut transport: Box<dyn Transport>,
        comparator: Comparator,
        config: WatchpointPollerConfig,
        hits: Sender<WatchpointHit>,
    ) -> Result<Self> {
        warn_if_poll_rate_high(config.poll_hz);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();
        let poll_interval = Duration::from_secs_f64(1.0 / config.poll_hz.max(1) as f64);
        let function_register = comparator.function_register();
        let label = comparator.label.clone();
        let events_path = config.events_file.clone();
        let write_to_clear = config.write_to_clear_matched;

        let handle = std::thread::Builder::new()
            .name("eab-dwt-watchpoint-poll".into())
            .spawn(move || -> Result<()> {
                let mut events_file = match &events_path {
                    Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
                    None => None,
                };

                while !thread_stop.load(Ordering::Relaxed) {
                    let raw = transport.memory_read(function_register, 4)?;
                    if raw.len() == 4 {
                        let function = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                        const MATCHED_BIT: u32 = 1 << 24;
                        if function & MATCHED_BIT != 0 {
                            let comp_raw = transport.memory_read(comparator.comp_register(), 4)?;
                            let value_hex = comp_raw
                                .iter()
                                .map(|b| format!("{b:02x}"))
                                .collect::<String>();
                            let hit = WatchpointHit {
                                ts_us: now_us(),
                                label: label.clone(),
                                address_hex: format!("0x{:08X}", comparator.address),
                                value_hex,
                            };
                            if let Some(f) = &mut events_file {
                                writeln!(f, "{}", serde_json::to_string(&hit)?)?;
                            }
                            let _ = hits.send(hit);

                            if write_to_clear {
                                transport.memory_write(function_register, &function.to_le_bytes())?;
                            }
                        }
                    }
                    std::thread::sleep(poll_interval);
                }
                // Disarm the comparator on the way out, mirroring
                // `ComparatorAllocator::release`, so a stopped watch doesn't
                // leave a live match armed on the core.
                transport.memory_write(function_register, &0u32.to_le_bytes())?;
                Ok(())
            })
            .map_err(|e| EabError::Exhausted(format!("failed to spawn watchpoint poll thread: {e}")))?;

        Ok(WatchpointPoller { stop_flag, handle: Some(handle) })
    }

    pub fn stop(mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(EabError::Cancelled("watchpoint poll thread panicked".into())),
            }
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn high_poll_rate_does_not_panic() {
        warn_if_poll_rate_high(1000);
        warn_if_poll_rate_high(10);
    }
}
