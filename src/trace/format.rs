//! Trace format auto-detection by extension, directory layout, and magic
//! bytes. Ported from `original_source/eab/cli/trace/formats.py`'s
//! `detect_trace_format`.

use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    RttBin,
    SystemView,
    Ctf,
    Log,
}

impl TraceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceFormat::RttBin => "rttbin",
            TraceFormat::SystemView => "systemview",
            TraceFormat::Ctf => "ctf",
            TraceFormat::Log => "log",
        }
    }
}

const CTF_MAGIC: &[u32] = &[0xC1FC_1FC1, 0x75D1_1D57];

fn has_ctf_metadata(dir: &Path) -> bool {
    dir.join("metadata").exists()
}

/// Best-effort detection; defaults to `RttBin` (the in-house capture
/// format) when nothing more specific matches, preserving the prototype's
/// backward-compatible default.
pub fn detect_trace_format(input: &Path) -> TraceFormat {
    match input.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ext) if ext == "svdat" => return TraceFormat::SystemView,
        Some(ext) if ext == "rttbin" => return TraceFormat::RttBin,
        Some(ext) if ext == "log" => return TraceFormat::Log,
        _ => {}
    }

    if input.is_dir() {
        if has_ctf_metadata(input) {
            return TraceFormat::Ctf;
        }
    } else if let Some(parent) = input.parent() {
        if has_ctf_metadata(parent) {
            return TraceFormat::Ctf;
        }
        if parent.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("channel")) {
            if let Some(grandparent) = parent.parent() {
                if has_ctf_metadata(grandparent) {
                    return TraceFormat::Ctf;
                }
            }
        }
    }

    if input.is_file() {
        if let Ok(mut f) = std::fs::File::open(input) {
            let mut header = [0u8; 32];
            if let Ok(n) = f.read(&mut header) {
                let header = &header[..n];
                if contains_subslice(header, b"SEGGER") || contains_subslice(header, b"SystemView") {
                    return TraceFormat::SystemView;
                }
                if header.len() >= 4 {
                    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
                    if CTF_MAGIC.contains(&magic) {
                        return TraceFormat::Ctf;
                    }
                }
            }
        }
    }

    TraceFormat::RttBin
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extension_wins_over_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.svdat");
        std::fs::write(&path, b"anything").unwrap();
        assert_eq!(detect_trace_format(&path), TraceFormat::SystemView);
    }

    #[test]
    fn ctf_metadata_sibling_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metadata"), b"").unwrap();
        let channel_file = dir.path().join("channel0_0");
        std::fs::write(&channel_file, b"").unwrap();
        assert_eq!(detect_trace_format(&channel_file), TraceFormat::Ctf);
    }

    #[test]
    fn segger_magic_bytes_are_detected_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, b"SEGGER SystemView V3").unwrap();
        assert_eq!(detect_trace_format(&path), TraceFormat::SystemView);
    }

    #[test]
    fn unrecognized_file_defaults_to_rttbin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mystery.bin");
        std::fs::write(&path, b"\x00\x00\x00\x00").unwrap();
        assert_eq!(detect_trace_format(&path), TraceFormat::RttBin);
    }
}
