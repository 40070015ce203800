//! Transport backed by a persistent helper process speaking
//! newline-delimited JSON on stdin/stdout. This is the backend for probe
//! tooling that only exposes a scripting surface (OpenOCD's Tcl console,
//! a vendor's Python debug server) rather than a library we can link or a
//! one-shot CLI we can spawn per call.
//!
//! One request is in flight at a time; calls are serialized behind a
//! mutex the way the daemon already serializes access to a single
//! transport from one reader thread.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EabError, Result};

use super::Transport;

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<std::process::ChildStdout>,
}

pub struct ScriptingServerTransport {
    command: Vec<String>,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl ScriptingServerTransport {
    pub fn new(command: Vec<String>) -> Self {
        ScriptingServerTransport { command, conn: Mutex::new(None), next_id: AtomicU64::new(1) }
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.conn.lock().expect("scripting server mutex poisoned");
        let conn = guard
            .as_mut()
            .ok_or_else(|| EabError::TransportUnavailable("scripting server not started".into()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request { id, method, params };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        conn.stdin.write_all(line.as_bytes())?;
        conn.stdin.flush()?;

        let mut response_line = String::new();
        let n = conn.stdout.read_line(&mut response_line)?;
        if n == 0 {
            return Err(EabError::ConnectionLost("scripting server closed stdout".into()));
        }
        let response: Response = serde_json::from_str(response_line.trim_end())?;
        if response.id != id {
            return Err(EabError::ConnectionLost(format!(
                "response id {} did not match request id {id}",
                response.id
            )));
        }
        if let Some(message) = response.error {
            return Err(EabError::ConnectionLost(message));
        }
        Ok(response.result)
    }
}

impl Transport for ScriptingServerTransport {
    fn connect(&mut self, device: &str, interface: &str, speed: u32) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| EabError::InvalidArgument("scripting server command is empty".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EabError::ExternalToolMissing(format!("failed to spawn {program}: {e}")))?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        *self.conn.lock().expect("scripting server mutex poisoned") =
            Some(Connection { child, stdin, stdout });

        self.call(
            "connect",
            serde_json::json!({"device": device, "interface": interface, "speed": speed}),
        )?;
        Ok(())
    }

    fn start_telemetry(&mut self, block_address: Option<u64>) -> Result<()> {
        self.call("start_rtt", serde_json::json!({"block_address": block_address})).map(|_| ())
    }

    fn read(&mut self, channel: u8) -> Result<Vec<u8>> {
        let result = self.call("read", serde_json::json!({"channel": channel}))?;
        let hex = result.as_str().unwrap_or("");
        hex_decode(hex)
    }

    fn write(&mut self, channel: u8, data: &[u8]) -> Result<usize> {
        let result = self.call("write", serde_json::json!({"channel": channel, "data": hex_encode(data)}))?;
        Ok(result.as_u64().unwrap_or(0) as usize)
    }

    fn stop_telemetry(&mut self) -> Result<()> {
        self.call("stop_rtt", serde_json::json!({})).map(|_| ())
    }

    fn disconnect(&mut self) -> Result<()> {
        let result = self.call("disconnect", serde_json::json!({}));
        if let Some(mut conn) = self.conn.lock().expect("scripting server mutex poisoned").take() {
            let _ = conn.child.kill();
            let _ = conn.child.wait();
        }
        result.map(|_| ())
    }

    fn reset(&mut self, halt: bool) -> Result<()> {
        self.call("reset", serde_json::json!({"halt": halt})).map(|_| ())
    }

    fn memory_read(&mut self, address: u64, size: u8) -> Result<Vec<u8>> {
        let result = self.call("memory_read", serde_json::json!({"address": address, "size": size}))?;
        hex_decode(result.as_str().unwrap_or(""))
    }

    fn memory_write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.call(
            "memory_write",
            serde_json::json!({"address": address, "data": hex_encode(data)}),
        )
        .map(|_| ())
    }
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(EabError::FormatInvalid("odd-length hex payload".into()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| EabError::FormatInvalid(format!("invalid hex byte: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let data = vec![0x00, 0xAB, 0xFF];
        assert_eq!(hex_decode(&hex_encode(&data)).unwrap(), data);
    }

    #[test]
    fn odd_length_hex_is_rejected() {
        assert!(hex_decode("abc").is_err());
    }
}
