//! SystemView and CTF traces aren't parsed in-process; an external tool does
//! the format-specific decoding and the core only wraps its output in the
//! same Chrome JSON envelope [`crate::trace::perfetto`] produces for
//! `.rttbin`, per spec §4.8.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

use crate::error::{EabError, Result};

use super::format::TraceFormat;
use super::perfetto::PerfettoSummary;

/// Name of the external converter expected on `PATH` for each delegated
/// format. Overridable per call since these vary by vendor SDK install.
pub fn default_tool_name(format: TraceFormat) -> Option<&'static str> {
    match format {
        TraceFormat::SystemView => Some("SystemViewConverter"),
        TraceFormat::Ctf => Some("babeltrace2"),
        TraceFormat::RttBin | TraceFormat::Log => None,
    }
}

fn tool_args(format: TraceFormat, input: &Path) -> Vec<String> {
    match format {
        TraceFormat::SystemView => vec!["--format".into(), "chrome-trace".into(), input.display().to_string()],
        TraceFormat::Ctf => vec!["--output-format".into(), "chrome-trace".into(), input.display().to_string()],
        TraceFormat::RttBin | TraceFormat::Log => Vec::new(),
    }
}

/// Run the tool for `format`, expecting a JSON array of Chrome trace events
/// on stdout, and wrap it with the same process/thread metadata envelope
/// [`super::perfetto::rttbin_to_perfetto`] uses.
pub fn convert_via_external_tool(
    format: TraceFormat,
    input: &Path,
    output: &Path,
    tool_override: Option<&str>,
) -> Result<PerfettoSummary> {
    let tool_name = tool_override
        .map(str::to_string)
        .or_else(|| default_tool_name(format).map(str::to_string))
        .ok_or_else(|| EabError::Unsupported(format!("no external converter for {} format", format.as_str())))?;

    let tool_path = which::which(&tool_name)
        .map_err(|_| EabError::ExternalToolMissing(format!("'{tool_name}' not found on PATH")))?;

    let output_run = Command::new(&tool_path)
        .args(tool_args(format, input))
        .output()
        .map_err(|e| EabError::ExternalToolMissing(format!("failed to run '{tool_name}': {e}")))?;

    if !output_run.status.success() {
        return Err(EabError::FormatInvalid(format!(
            "'{tool_name}' exited with {}: {}",
            output_run.status,
            String::from_utf8_lossy(&output_run.stderr)
        )));
    }

    let events: Vec<Value> = serde_json::from_slice(&output_run.stdout)
        .map_err(|e| EabError::FormatInvalid(format!("'{tool_name}' did not emit a JSON event array: {e}")))?;

    let envelope = serde_json::json!({
        "traceEvents": (std::iter::once(serde_json::json!({
            "pid": 1, "tid": 0, "name": "process_name", "ph": "M",
            "cat": "__metadata", "args": {"name": format!("{} Trace", format.as_str())},
        }))
        .chain(events.clone())
        .collect::<Vec<Value>>()),
        "displayTimeUnit": "ms",
    });
    std::fs::write(output, serde_json::to_vec(&envelope)?)?;

    Ok(PerfettoSummary {
        frame_count: events.len() as u64,
        event_count: events.len() as u64,
        channels: Vec::new(),
        output_path: output.display().to_string(),
        output_size_bytes: std::fs::metadata(output)?.len(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_tool_is_reported_as_external_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("trace.svdat");
        std::fs::write(&input, b"SEGGER").unwrap();
        let output = dir.path().join("trace.json");

        let err = convert_via_external_tool(
            TraceFormat::SystemView,
            &input,
            &output,
            Some("definitely-not-a-real-tool-xyz"),
        )
        .unwrap_err();
        assert_eq!(err.kind().as_str(), "external-tool-missing");
    }

    #[test]
    fn rttbin_format_has_no_external_delegate() {
        assert!(default_tool_name(TraceFormat::RttBin).is_none());
    }
}
