//! In-process "native library" transport: the lowest-latency backend,
//! talking to the probe driver directly rather than through a subprocess.
//!
//! The concrete probe driver (J-Link, CMSIS-DAP, ST-Link, ...) is injected
//! as a [`ProbeSession`] implementation. Nothing in this crate depends on a
//! specific vendor SDK; a binding crate supplies one at the call site.

use crate::error::{EabError, Result};

use super::Transport;

/// What a concrete probe-driver binding must provide. Mirrors the shape of
/// a typical in-process probe session: attach once, then cheap read/write
/// calls with no per-call process spawn.
pub trait ProbeSession: Send {
    fn attach(&mut self, device: &str, interface: &str, speed: u32) -> Result<()>;
    fn start_rtt(&mut self, block_address: Option<u64>) -> Result<u32>;
    fn rtt_read(&mut self, channel: u8, max_bytes: usize) -> Result<Vec<u8>>;
    fn rtt_write(&mut self, channel: u8, data: &[u8]) -> Result<usize>;
    fn stop_rtt(&mut self) -> Result<()>;
    fn detach(&mut self) -> Result<()>;
    fn reset(&mut self, halt: bool) -> Result<()>;
    fn memory_read(&mut self, address: u64, size: u8) -> Result<Vec<u8>>;
    fn memory_write(&mut self, address: u64, data: &[u8]) -> Result<()>;
}

pub struct NativeTransport<S: ProbeSession> {
    session: S,
    attached: bool,
}

impl<S: ProbeSession> NativeTransport<S> {
    pub fn new(session: S) -> Self {
        NativeTransport { session, attached: false }
    }

    fn require_attached(&self) -> Result<()> {
        if !self.attached {
            return Err(EabError::TransportUnavailable("native session not attached".into()));
        }
        Ok(())
    }
}

impl<S: ProbeSession> Transport for NativeTransport<S> {
    fn connect(&mut self, device: &str, interface: &str, speed: u32) -> Result<()> {
        self.session.attach(device, interface, speed)?;
        self.attached = true;
        log::info!("native transport attached to {device} via {interface} at {speed} kHz");
        Ok(())
    }

    fn start_telemetry(&mut self, block_address: Option<u64>) -> Result<()> {
        self.require_attached()?;
        let up_channels = self.session.start_rtt(block_address)?;
        log::info!("telemetry started: {up_channels} up channels");
        Ok(())
    }

    fn read(&mut self, channel: u8) -> Result<Vec<u8>> {
        self.require_attached()?;
        self.session.rtt_read(channel, 4096)
    }

    fn write(&mut self, channel: u8, data: &[u8]) -> Result<usize> {
        self.require_attached()?;
        self.session.rtt_write(channel, data)
    }

    fn stop_telemetry(&mut self) -> Result<()> {
        self.require_attached()?;
        self.session.stop_rtt()
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.attached {
            self.session.detach()?;
            self.attached = false;
        }
        Ok(())
    }

    fn reset(&mut self, halt: bool) -> Result<()> {
        self.require_attached()?;
        self.session.reset(halt)
    }

    fn memory_read(&mut self, address: u64, size: u8) -> Result<Vec<u8>> {
        self.require_attached()?;
        self.session.memory_read(address, size)
    }

    fn memory_write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.require_attached()?;
        self.session.memory_write(address, data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSession {
        attached: bool,
        memory: HashMap<u64, Vec<u8>>,
    }

    impl ProbeSession for FakeSession {
        fn attach(&mut self, _device: &str, _interface: &str, _speed: u32) -> Result<()> {
            self.attached = true;
            Ok(())
        }
        fn start_rtt(&mut self, _block_address: Option<u64>) -> Result<u32> {
            Ok(1)
        }
        fn rtt_read(&mut self, _channel: u8, _max_bytes: usize) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        fn rtt_write(&mut self, _channel: u8, data: &[u8]) -> Result<usize> {
            Ok(data.len())
        }
        fn stop_rtt(&mut self) -> Result<()> {
            Ok(())
        }
        fn detach(&mut self) -> Result<()> {
            self.attached = false;
            Ok(())
        }
        fn reset(&mut self, _halt: bool) -> Result<()> {
            Ok(())
        }
        fn memory_read(&mut self, address: u64, size: u8) -> Result<Vec<u8>> {
            Ok(self.memory.get(&address).cloned().unwrap_or_else(|| vec![0u8; size as usize]))
        }
        fn memory_write(&mut self, address: u64, data: &[u8]) -> Result<()> {
            self.memory.insert(address, data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn calls_before_connect_fail_with_transport_unavailable() {
        let mut t = NativeTransport::new(FakeSession::default());
        let err = t.read(0).unwrap_err();
        assert_eq!(err.kind().as_str(), "transport-unavailable");
    }

    #[test]
    fn connect_then_memory_roundtrip() {
        let mut t = NativeTransport::new(FakeSession::default());
        t.connect("nrf5340", "SWD", 4000).unwrap();
        t.memory_write(0x2000_0000, &[1, 2, 3, 4]).unwrap();
        assert_eq!(t.memory_read(0x2000_0000, 4).unwrap(), vec![1, 2, 3, 4]);
    }
}
