//! Backtrace decoding: detect which vendor emitted a backtrace blob, pull
//! out its raw addresses, and resolve each one to `function (file:line)`
//! via an external `addr2line`-family tool, falling back to a bare symbol
//! name from the ELF's own symbol table when no such tool is available.

use std::path::{Path, PathBuf};
use std::process::Command;

use object::{Object, ObjectSymbol};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{EabError, Result};

use super::toolchain::which_or_sdk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacktraceFormat {
    EspIdf,
    Zephyr,
    Gdb,
    Unknown,
}

impl BacktraceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacktraceFormat::EspIdf => "esp-idf",
            BacktraceFormat::Zephyr => "zephyr",
            BacktraceFormat::Gdb => "gdb",
            BacktraceFormat::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BacktraceEntry {
    pub address: u64,
    pub pc_address: Option<u64>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub raw_line: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BacktraceResult {
    pub entries: Vec<BacktraceEntry>,
    pub format: BacktraceFormat,
    pub error: Option<String>,
}

fn esp_backtrace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)backtrace:\s*((?:0x[0-9a-f]+:0x[0-9a-f]+\s*)+)").unwrap())
}

fn esp_addr_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)0x([0-9a-f]+):0x([0-9a-f]+)").unwrap())
}

fn zephyr_pc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:faulting instruction address )?\(?r15/pc\)?:\s*0x([0-9a-f]+)").unwrap()
    })
}

fn gdb_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)#\d+\s+0x([0-9a-f]+)\s+in\s+(\S+)\s*\([^)]*\)\s*(?:at\s+(.+))?").unwrap())
}

/// Auto-detect which vendor format a backtrace blob is in, by trying each
/// pattern in turn: ESP-IDF's `Backtrace:PC:SP PC:SP ...` line, Zephyr's
/// fault-dump `r15/pc:` register line, then a generic GDB `#N 0xADDR in
/// func () at file:line` frame line.
pub fn detect_backtrace_format(text: &str) -> BacktraceFormat {
    if esp_backtrace_re().is_match(text) {
        BacktraceFormat::EspIdf
    } else if zephyr_pc_re().is_match(text) {
        BacktraceFormat::Zephyr
    } else if gdb_frame_re().is_match(text) {
        BacktraceFormat::Gdb
    } else {
        BacktraceFormat::Unknown
    }
}

fn parse_esp_backtrace(text: &str) -> Vec<BacktraceEntry> {
    let Some(caps) = esp_backtrace_re().captures(text) else { return Vec::new() };
    let blob = caps.get(1).unwrap().as_str();
    esp_addr_pair_re()
        .captures_iter(blob)
        .filter_map(|c| {
            let pc = u64::from_str_radix(&c[1], 16).ok()?;
            let sp = u64::from_str_radix(&c[2], 16).ok()?;
            Some(BacktraceEntry {
                address: pc,
                pc_address: Some(sp),
                raw_line: Some(c.get(0).unwrap().as_str().to_string()),
                ..Default::default()
            })
        })
        .collect()
}

fn parse_zephyr_backtrace(text: &str) -> Vec<BacktraceEntry> {
    text.lines()
        .filter_map(|line| {
            let caps = zephyr_pc_re().captures(line)?;
            let address = u64::from_str_radix(&caps[1], 16).ok()?;
            Some(BacktraceEntry { address, raw_line: Some(line.to_string()), ..Default::default() })
        })
        .collect()
}

fn parse_gdb_backtrace(text: &str) -> Vec<BacktraceEntry> {
    text.lines()
        .filter_map(|line| {
            let caps = gdb_frame_re().captures(line)?;
            let address = u64::from_str_radix(&caps[1], 16).ok()?;
            let (file, line_no) = match caps.get(3).map(|m| m.as_str()) {
                Some(loc) => match loc.rsplit_once(':') {
                    Some((f, l)) => (Some(f.to_string()), l.parse().ok()),
                    None => (Some(loc.to_string()), None),
                },
                None => (None, None),
            };
            Some(BacktraceEntry {
                address,
                function: Some(caps[2].to_string()),
                file,
                line: line_no,
                raw_line: Some(line.to_string()),
                ..Default::default()
            })
        })
        .collect()
}

const ADDR2LINE_CANDIDATES: &[&str] = &["arm-none-eabi-addr2line", "arm-zephyr-eabi-addr2line", "addr2line"];

fn addr2line_for_arch(arch: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let preferred: &[&str] = match arch {
        "xtensa" | "esp32" => &["xtensa-esp32-elf-addr2line", "addr2line"],
        "riscv" | "esp32c3" => &["riscv32-esp-elf-addr2line", "addr2line"],
        _ => ADDR2LINE_CANDIDATES,
    };
    preferred.iter().find_map(|name| which_or_sdk(name))
}

pub struct BacktraceDecoder {
    pub elf_path: PathBuf,
    pub arch: String,
    pub toolchain_path: Option<PathBuf>,
}

impl BacktraceDecoder {
    pub fn new(elf_path: impl Into<PathBuf>, arch: impl Into<String>, toolchain_path: Option<PathBuf>) -> Self {
        BacktraceDecoder { elf_path: elf_path.into(), arch: arch.into(), toolchain_path }
    }

    pub fn decode(&self, text: &str) -> BacktraceResult {
        let format = detect_backtrace_format(text);
        let mut entries = match format {
            BacktraceFormat::EspIdf => parse_esp_backtrace(text),
            BacktraceFormat::Zephyr => parse_zephyr_backtrace(text),
            BacktraceFormat::Gdb => parse_gdb_backtrace(text),
            BacktraceFormat::Unknown => Vec::new(),
        };

        if entries.is_empty() {
            return BacktraceResult { entries, format, error: Some("no backtrace entries found in input".into()) };
        }

        let mut error = None;
        match self.resolve_entries(&mut entries) {
            Ok(()) => {}
            Err(e) => error = Some(e.to_string()),
        }

        BacktraceResult { entries, format, error }
    }

    fn resolve_entries(&self, entries: &mut [BacktraceEntry]) -> Result<()> {
        if let Some(tool) = addr2line_for_arch(&self.arch, self.toolchain_path.as_deref()) {
            self.resolve_via_addr2line(&tool, entries)
        } else {
            self.resolve_via_object(entries)
        }
    }

    fn resolve_via_addr2line(&self, tool: &Path, entries: &mut [BacktraceEntry]) -> Result<()> {
        let addrs: Vec<String> = entries.iter().map(|e| format!("0x{:x}", e.address)).collect();
        let output = Command::new(tool)
            .arg("-f")
            .arg("-C")
            .arg("-e")
            .arg(&self.elf_path)
            .args(&addrs)
            .output()?;
        if !output.status.success() {
            return Err(EabError::ExternalToolMissing(format!(
                "{} exited with {:?}",
                tool.display(),
                output.status.code()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        for entry in entries.iter_mut() {
            let Some(function) = lines.next() else { break };
            let Some(location) = lines.next() else { break };
            entry.function = Some(function.trim().to_string());
            if let Some((file, line)) = location.rsplit_once(':') {
                entry.file = Some(file.trim().to_string());
                entry.line = line.trim().parse().ok();
            }
        }
        Ok(())
    }

    fn resolve_via_object(&self, entries: &mut [BacktraceEntry]) -> Result<()> {
        let data = std::fs::read(&self.elf_path)?;
        let file = object::File::parse(&*data).map_err(|e| EabError::FormatInvalid(e.to_string()))?;

        let mut symbols: Vec<(u64, u64, &str)> = Vec::new();
        for symbol in file.symbols() {
            if symbol.is_definition() && symbol.address() != 0 {
                if let Ok(name) = symbol.name() {
                    let size = symbol.size().max(1);
                    symbols.push((symbol.address(), size, name));
                }
            }
        }

        for entry in entries.iter_mut() {
            entry.function = symbols
                .iter()
                .find(|(addr, size, _)| entry.address >= *addr && entry.address < *addr + *size)
                .map(|(_, _, name)| name.to_string());
        }
        Ok(())
    }

    pub fn format_result(&self, result: &BacktraceResult, show_raw: bool) -> String {
        let mut out = format!("backtrace format: {}\n", result.format.as_str());
        for (i, entry) in result.entries.iter().enumerate() {
            let func = entry.function.as_deref().unwrap_or("??");
            let loc = match (&entry.file, entry.line) {
                (Some(f), Some(l)) => format!(" at {f}:{l}"),
                _ => String::new(),
            };
            out.push_str(&format!("#{i} 0x{:08x} in {func}(){loc}\n", entry.address));
            if show_raw {
                if let Some(raw) = &entry.raw_line {
                    out.push_str(&format!("    raw: {raw}\n"));
                }
            }
        }
        if let Some(err) = &result.error {
            out.push_str(&format!("error: {err}\n"));
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_esp_idf_format() {
        let text = "Backtrace:0x400d1234:0x3ffb5678 0x400d5678:0x3ffb9abc";
        assert_eq!(detect_backtrace_format(text), BacktraceFormat::EspIdf);
        let entries = parse_esp_backtrace(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, 0x400d1234);
        assert_eq!(entries[0].pc_address, Some(0x3ffb5678));
    }

    #[test]
    fn detects_zephyr_format() {
        let text = "E: Faulting instruction address (r15/pc): 0x00001234";
        assert_eq!(detect_backtrace_format(text), BacktraceFormat::Zephyr);
        let entries = parse_zephyr_backtrace(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, 0x1234);
    }

    #[test]
    fn detects_gdb_format() {
        let text = "#0  0x08001234 in my_func () at main.c:42";
        assert_eq!(detect_backtrace_format(text), BacktraceFormat::Gdb);
        let entries = parse_gdb_backtrace(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function.as_deref(), Some("my_func"));
        assert_eq!(entries[0].file.as_deref(), Some("main.c"));
        assert_eq!(entries[0].line, Some(42));
    }

    #[test]
    fn unknown_format_yields_no_entries() {
        assert_eq!(detect_backtrace_format("nothing useful here"), BacktraceFormat::Unknown);
    }
}
