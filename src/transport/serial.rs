//! Plain-UART transport for targets with no debug probe at all — the
//! common case for an ESP32 devkit wired over its USB-serial bridge.
//! There is no RTT control block or memory bus here; "telemetry" is just
//! the serial stream itself on channel 0, and memory access is
//! unsupported.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::error::{EabError, Result};

use super::Transport;

pub struct SerialTransport {
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(baud: u32) -> Self {
        SerialTransport { baud, port: None }
    }

    fn require_port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| EabError::TransportUnavailable("serial port not open".into()))
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self, device: &str, _interface: &str, _speed: u32) -> Result<()> {
        let port = serialport::new(device, self.baud)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| EabError::TransportUnavailable(format!("{device}: {e}")))?;
        self.port = Some(port);
        log::info!("serial transport connected to {device} at {} baud", self.baud);
        Ok(())
    }

    fn start_telemetry(&mut self, _block_address: Option<u64>) -> Result<()> {
        self.require_port()?;
        Ok(())
    }

    fn read(&mut self, channel: u8) -> Result<Vec<u8>> {
        if channel != 0 {
            return Err(EabError::InvalidArgument("serial transport only has channel 0".into()));
        }
        let port = self.require_port()?;
        let mut buf = [0u8; 4096];
        match port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(vec![]),
            Err(e) => Err(EabError::ConnectionLost(e.to_string())),
        }
    }

    fn write(&mut self, channel: u8, data: &[u8]) -> Result<usize> {
        if channel != 0 {
            return Err(EabError::InvalidArgument("serial transport only has channel 0".into()));
        }
        let port = self.require_port()?;
        port.write(data).map_err(|e| EabError::ConnectionLost(e.to_string()))
    }

    fn stop_telemetry(&mut self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn reset(&mut self, _halt: bool) -> Result<()> {
        let port = self.require_port()?;
        port.write_data_terminal_ready(false)
            .map_err(|e| EabError::Unsupported(e.to_string()))?;
        std::thread::sleep(Duration::from_millis(100));
        port.write_data_terminal_ready(true).map_err(|e| EabError::Unsupported(e.to_string()))
    }

    fn memory_read(&mut self, _address: u64, _size: u8) -> Result<Vec<u8>> {
        Err(EabError::Unsupported("serial transport has no memory bus".into()))
    }

    fn memory_write(&mut self, _address: u64, _data: &[u8]) -> Result<()> {
        Err(EabError::Unsupported("serial transport has no memory bus".into()))
    }
}
