//! Transport backed by spawning a helper CLI (`probe-rs`) once per capture
//! session and reading its stdout as a raw byte stream. Text-oriented tools
//! like this one can't multiplex RTT channels or write down-channels; it
//! only claims channel 0 and treats `write` as unsupported.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{EabError, Result};

use super::Transport;

pub struct CliSubprocessTransport {
    binary: String,
    chip: Option<String>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl CliSubprocessTransport {
    pub fn new(binary: impl Into<String>) -> Self {
        CliSubprocessTransport { binary: binary.into(), chip: None, child: None, reader: None, rx: None }
    }

    fn require_binary(&self) -> Result<()> {
        if which::which(&self.binary).is_err() {
            return Err(EabError::ExternalToolMissing(format!(
                "{} not found on PATH",
                self.binary
            )));
        }
        Ok(())
    }
}

impl Transport for CliSubprocessTransport {
    fn connect(&mut self, device: &str, _interface: &str, _speed: u32) -> Result<()> {
        self.require_binary()?;
        self.chip = Some(device.to_string());
        Ok(())
    }

    fn start_telemetry(&mut self, block_address: Option<u64>) -> Result<()> {
        let chip = self
            .chip
            .clone()
            .ok_or_else(|| EabError::TransportUnavailable("connect() not called".into()))?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(["rtt", "--chip", &chip]);
        if let Some(addr) = block_address {
            cmd.args(["--rtt-address", &format!("0x{addr:X}")]);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| EabError::ExternalToolMissing(format!("failed to spawn {}: {e}", self.binary)))?;

        std::thread::sleep(Duration::from_secs(1));
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut s) = child.stderr.take() {
                let _ = s.read_to_string(&mut stderr);
            }
            return Err(EabError::ConnectionLost(format!(
                "{} exited immediately ({status}): {stderr}",
                self.binary
            )));
        }

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        self.child = Some(child);
        self.reader = Some(handle);
        self.rx = Some(rx);
        log::info!("cli-subprocess RTT attached to {chip}");
        Ok(())
    }

    fn read(&mut self, _channel: u8) -> Result<Vec<u8>> {
        let Some(rx) = &self.rx else { return Ok(vec![]) };
        let mut collected = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            collected.extend(chunk);
        }
        Ok(collected)
    }

    fn write(&mut self, _channel: u8, _data: &[u8]) -> Result<usize> {
        log::warn!("{} transport does not support RTT write", self.binary);
        Ok(0)
    }

    fn stop_telemetry(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        self.rx = None;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.stop_telemetry()?;
        self.chip = None;
        Ok(())
    }

    fn reset(&mut self, halt: bool) -> Result<()> {
        let chip = self
            .chip
            .clone()
            .ok_or_else(|| EabError::TransportUnavailable("connect() not called".into()))?;
        let mut cmd = Command::new(&self.binary);
        cmd.args(["reset", "--chip", &chip]);
        if halt {
            cmd.arg("--halt");
        }
        let status = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .map_err(|e| EabError::ExternalToolMissing(format!("failed to run {}: {e}", self.binary)))?;
        if !status.success() {
            return Err(EabError::ConnectionLost(format!("{} reset exited with {status}", self.binary)));
        }
        Ok(())
    }

    fn memory_read(&mut self, _address: u64, _size: u8) -> Result<Vec<u8>> {
        Err(EabError::Unsupported(format!("{} transport has no memory-read subcommand wired up", self.binary)))
    }

    fn memory_write(&mut self, _address: u64, _data: &[u8]) -> Result<()> {
        Err(EabError::Unsupported(format!("{} transport has no memory-write subcommand wired up", self.binary)))
    }
}
