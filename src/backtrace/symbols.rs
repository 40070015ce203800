//! Resolve a data symbol name to its load address and size from an ELF
//! file, for commands that let a user name a variable (`--symbol foo`)
//! instead of typing a raw address.
//!
//! Lookup order: parse the ELF symbol table ourselves via the `object`
//! crate (no toolchain required), then fall back to shelling out to `nm`
//! for targets whose ELF the `object` crate can't parse.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use object::{Object, ObjectSymbol};

use crate::error::{EabError, Result};

use super::toolchain::which_or_sdk;

const NM_DATA_TYPES: &[char] = &['B', 'b', 'D', 'd', 'R', 'r', 'G', 'g', 'S', 's'];
const NM_CANDIDATES: &[&str] = &["arm-none-eabi-nm", "arm-zephyr-eabi-nm", "nm"];

#[derive(Debug, Clone, Copy)]
pub struct ResolvedSymbol {
    pub address: u64,
    pub size: u64,
}

fn not_found(symbol_name: &str, elf_path: &Path) -> EabError {
    EabError::NotFound(format!(
        "symbol '{symbol_name}' not found in {} (try -O0/-Og, `volatile`, or pass an address directly)",
        elf_path.display()
    ))
}

pub fn resolve_symbol(symbol_name: &str, elf_path: &Path) -> Result<ResolvedSymbol> {
    match resolve_via_object(symbol_name, elf_path) {
        Ok(resolved) => Ok(resolved),
        Err(_) => resolve_via_nm(symbol_name, elf_path),
    }
}

fn resolve_via_object(symbol_name: &str, elf_path: &Path) -> Result<ResolvedSymbol> {
    let data = std::fs::read(elf_path)?;
    let file = object::File::parse(&*data).map_err(|e| EabError::FormatInvalid(e.to_string()))?;

    for symbol in file.symbols() {
        if symbol.name().ok() == Some(symbol_name) && symbol.address() != 0 {
            let size = if symbol.size() > 0 { symbol.size() } else { 4 };
            return Ok(ResolvedSymbol { address: symbol.address(), size });
        }
    }
    Err(not_found(symbol_name, elf_path))
}

fn resolve_via_nm(symbol_name: &str, elf_path: &Path) -> Result<ResolvedSymbol> {
    let nm_tool = NM_CANDIDATES
        .iter()
        .find_map(|name| which_or_sdk(name))
        .ok_or_else(|| {
            EabError::ExternalToolMissing(format!(
                "cannot resolve symbol '{symbol_name}': no ELF symbol table match and no nm on PATH"
            ))
        })?;

    let output = wait_with_timeout(
        Command::new(&nm_tool).arg("-S").arg("-C").arg(elf_path),
        Duration::from_secs(15),
    )?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || *parts.last().unwrap() != symbol_name {
            continue;
        }
        let sym_type = parts[parts.len() - 2];
        if sym_type.len() != 1 || !NM_DATA_TYPES.contains(&sym_type.chars().next().unwrap()) {
            continue;
        }
        let Ok(address) = u64::from_str_radix(parts[0], 16) else { continue };
        let size = if parts.len() == 4 {
            u64::from_str_radix(parts[1], 16).unwrap_or(4).max(4)
        } else {
            4
        };
        return Ok(ResolvedSymbol { address, size });
    }

    Err(not_found(symbol_name, elf_path))
}

fn wait_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<std::process::Output> {
    let start = std::time::Instant::now();
    let mut child = cmd
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;
    loop {
        if let Some(_status) = child.try_wait()? {
            return Ok(child.wait_with_output()?);
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            return Err(EabError::Timeout("nm did not exit within 15s".into()));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_elf_file_is_not_found_rather_than_panicking() {
        let err = resolve_symbol("conn_interval", Path::new("/nonexistent/firmware.elf")).unwrap_err();
        assert!(matches!(err, EabError::Io(_) | EabError::NotFound(_) | EabError::ExternalToolMissing(_)));
    }
}
