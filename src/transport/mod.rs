//! Transport abstraction over the physical link to a target: a debug probe
//! (SWD/JTAG) running RTT-style telemetry, or a plain serial UART.
//!
//! All backends are blocking: a `Transport` is used from one reader thread
//! at a time, the way the teacher's profiler backends are each driven from
//! a single observer thread.

pub mod cli_subprocess;
pub mod native;
pub mod reconnect;
pub mod scripting_server;
pub mod serial;

use std::time::Duration;

use crate::error::Result;

/// Backend-agnostic handle to a connected target. Implementations wrap a
/// native probe session, a helper subprocess, a persistent scripting
/// server, or a serial port.
pub trait Transport: Send {
    /// Open the physical link to `device` over `interface` at `speed` kHz.
    fn connect(&mut self, device: &str, interface: &str, speed: u32) -> Result<()>;

    /// Start streaming telemetry, optionally pinned to a control-block
    /// address the target firmware published (RTT's `_SEGGER_RTT` symbol).
    fn start_telemetry(&mut self, block_address: Option<u64>) -> Result<()>;

    /// Non-blocking read of whatever is currently buffered for `channel`.
    /// Returns an empty vec if nothing is available — callers poll.
    fn read(&mut self, channel: u8) -> Result<Vec<u8>>;

    fn write(&mut self, channel: u8, data: &[u8]) -> Result<usize>;

    fn stop_telemetry(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    /// Reset the target. `halt` stops the core immediately after reset
    /// instead of letting firmware run.
    fn reset(&mut self, halt: bool) -> Result<()>;

    fn memory_read(&mut self, address: u64, size: u8) -> Result<Vec<u8>>;

    fn memory_write(&mut self, address: u64, data: &[u8]) -> Result<()>;
}

/// Default poll cadence for transports with no event notification.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
