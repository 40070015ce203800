//! Drives a [`Transport`] and a capture [`Writer`] from one background
//! thread: poll every requested channel, append whatever arrived, sleep
//! briefly when nothing did.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{EabError, Result};
use crate::transport::Transport;

use super::format::Writer;

pub struct CaptureConfig {
    pub channels: Vec<u8>,
    pub output_path: PathBuf,
    pub sample_width: u8,
    pub sample_rate: u32,
    pub timestamp_hz: u32,
    pub interface: String,
    pub speed: u32,
    pub block_address: Option<u64>,
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            channels: vec![0],
            output_path: PathBuf::from("capture.rttbin"),
            sample_width: 2,
            sample_rate: 0,
            timestamp_hz: 0,
            interface: "SWD".into(),
            speed: 4000,
            block_address: None,
            poll_interval: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CaptureSummary {
    pub output_path: String,
    pub total_bytes: u64,
    pub total_frames: u64,
    pub duration_s: f64,
}

fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

/// Owns the capture thread for one running capture. `stop` is idempotent
/// and safe to call even if the thread already exited on its own.
pub struct CaptureEngine {
    stop_flag: Arc<AtomicBool>,
    total_bytes: Arc<AtomicU64>,
    total_frames: Arc<AtomicU64>,
    start_time_us: u64,
    handle: Option<JoinHandle<Result<()>>>,
    output_path: PathBuf,
}

impl CaptureEngine {
    pub fn start(mut transport: Box<dyn Transport>, device: String, config: CaptureConfig) -> Result<Self> {
        transport.connect(&device, &config.interface, config.speed)?;
        transport.start_telemetry(config.block_address)?;

        let start_time_us = now_us();
        let file = File::create(&config.output_path)?;
        let mut writer = Writer::new(
            file,
            &config.channels,
            config.sample_width,
            config.sample_rate,
            config.timestamp_hz,
            start_time_us,
        )?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let total_bytes = Arc::new(AtomicU64::new(0));
        let total_frames = Arc::new(AtomicU64::new(0));

        let thread_stop = stop_flag.clone();
        let thread_bytes = total_bytes.clone();
        let thread_frames = total_frames.clone();
        let channels = config.channels.clone();
        let poll_interval = config.poll_interval;
        let timestamp_hz = config.timestamp_hz;

        let handle = std::thread::Builder::new()
            .name("eab-rtt-binary-capture".into())
            .spawn(move || -> Result<()> {
                let mut tick: u32 = 0;
                while !thread_stop.load(Ordering::Relaxed) {
                    let mut got_data = false;
                    for &ch in &channels {
                        let data = transport.read(ch)?;
                        if !data.is_empty() {
                            writer.write_frame(ch, &data, tick)?;
                            thread_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                            thread_frames.fetch_add(1, Ordering::Relaxed);
                            got_data = true;
                        }
                    }
                    if timestamp_hz > 0 {
                        tick = tick.wrapping_add(1);
                    }
                    if got_data {
                        writer.flush()?;
                    } else {
                        std::thread::sleep(poll_interval);
                    }
                }
                writer.flush()?;
                let _ = transport.stop_telemetry();
                let _ = transport.disconnect();
                Ok(())
            })
            .map_err(|e| EabError::Exhausted(format!("failed to spawn capture thread: {e}")))?;

        log::info!("binary capture started -> {}", config.output_path.display());

        Ok(CaptureEngine {
            stop_flag,
            total_bytes,
            total_frames,
            start_time_us,
            handle: Some(handle),
            output_path: config.output_path,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn stop(&mut self) -> Result<CaptureSummary> {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(EabError::Cancelled("capture thread panicked".into())),
            }
        }

        let duration_s = (now_us().saturating_sub(self.start_time_us)) as f64 / 1_000_000.0;
        let summary = CaptureSummary {
            output_path: self.output_path.display().to_string(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_frames: self.total_frames.load(Ordering::Relaxed),
            duration_s,
        };
        log::info!("binary capture stopped: {summary:?}");
        Ok(summary)
    }
}

pub fn default_output_path(device_dir: &Path, name: &str) -> PathBuf {
    device_dir.join(format!("{name}.rttbin"))
}
