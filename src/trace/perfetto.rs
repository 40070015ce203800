//! `.rttbin` -> Chrome JSON trace format (the format Perfetto's UI loads
//! natively). Ported from `original_source/eab/cli/trace/perfetto.py`'s
//! `rttbin_to_perfetto`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};

use crate::capture::format::Reader;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct PerfettoSummary {
    pub frame_count: u64,
    pub event_count: u64,
    pub channels: Vec<u8>,
    pub output_path: String,
    pub output_size_bytes: u64,
}

/// Reassembles UTF-8 text per channel across frame boundaries (a line may
/// span more than one capture frame), emitting one instant event and one
/// running-count counter event per completed line.
pub fn rttbin_to_perfetto(input_path: &Path, output_path: &Path) -> Result<PerfettoSummary> {
    let input = File::open(input_path)?;
    let mut reader = Reader::new(BufReader::new(input))?;
    let timestamp_hz = reader.header.timestamp_hz;

    let mut trace_events: Vec<Value> = Vec::new();
    let mut frame_count: u64 = 0;
    let mut text_buffer: BTreeMap<u8, String> = BTreeMap::new();
    let mut msg_counts: BTreeMap<u8, u64> = BTreeMap::new();

    while let Some(frame) = reader.read_frame()? {
        frame_count += 1;
        let text = String::from_utf8_lossy(&frame.payload).into_owned();
        let buffer = text_buffer.entry(frame.channel).or_default();
        buffer.push_str(&text);

        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let ts_us = if timestamp_hz > 0 {
                (frame.timestamp as f64 / timestamp_hz as f64) * 1_000_000.0
            } else {
                frame_count as f64 * 1000.0
            };

            let count = msg_counts.entry(frame.channel).or_insert(0);
            *count += 1;

            let truncated: String = line.chars().take(80).collect();
            trace_events.push(json!({
                "pid": 1, "tid": frame.channel, "ts": ts_us, "ph": "i",
                "name": truncated, "cat": "rtt", "s": "g",
                "args": {"channel": frame.channel, "raw": line},
            }));
            trace_events.push(json!({
                "pid": 1, "tid": frame.channel, "ts": ts_us, "ph": "C",
                "name": format!("messages_ch{}", frame.channel),
                "args": {format!("ch{}_count", frame.channel): *count},
            }));
        }
    }

    let mut metadata = vec![json!({
        "pid": 1, "tid": 0, "name": "process_name", "ph": "M",
        "cat": "__metadata", "args": {"name": "RTT Trace"},
    })];
    for &channel in msg_counts.keys() {
        metadata.push(json!({
            "pid": 1, "tid": channel, "name": "thread_name", "ph": "M",
            "cat": "__metadata", "args": {"name": format!("RTT Channel {channel}")},
        }));
    }

    let mut all_events = metadata;
    all_events.extend(trace_events.iter().cloned());
    let output = json!({"traceEvents": all_events, "displayTimeUnit": "ms"});
    std::fs::write(output_path, serde_json::to_vec(&output)?)?;

    Ok(PerfettoSummary {
        frame_count,
        event_count: trace_events.len() as u64,
        channels: msg_counts.keys().copied().collect(),
        output_path: output_path.display().to_string(),
        output_size_bytes: std::fs::metadata(output_path)?.len(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::format::Writer;

    #[test]
    fn emits_instant_and_counter_events_per_line() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, &[0], 2, 0, 1_000_000, 0).unwrap();
            w.write_frame(0, b"hel", 0).unwrap();
            w.write_frame(0, b"lo\nworld\n", 10).unwrap();
        }
        let input_dir = tempfile::tempdir().unwrap();
        let input_path = input_dir.path().join("capture.rttbin");
        std::fs::write(&input_path, &buf).unwrap();
        let output_path = input_dir.path().join("capture.json");

        let summary = rttbin_to_perfetto(&input_path, &output_path).unwrap();
        assert_eq!(summary.frame_count, 2);
        assert_eq!(summary.event_count, 4);
        assert_eq!(summary.channels, vec![0]);

        let contents = std::fs::read_to_string(&output_path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        let events = parsed["traceEvents"].as_array().unwrap();
        assert!(events.iter().any(|e| e["name"] == "hello"));
        assert!(events.iter().any(|e| e["name"] == "world"));
    }

    #[test]
    fn empty_capture_still_writes_metadata_only_trace() {
        let mut buf = Vec::new();
        {
            let _w = Writer::new(&mut buf, &[0], 2, 0, 0, 0).unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("empty.rttbin");
        std::fs::write(&input_path, &buf).unwrap();
        let output_path = dir.path().join("empty.json");

        let summary = rttbin_to_perfetto(&input_path, &output_path).unwrap();
        assert_eq!(summary.frame_count, 0);
        assert_eq!(summary.event_count, 0);
    }
}
