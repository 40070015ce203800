//! Locates cross toolchain binaries (`nm`, `addr2line`-family tools) that
//! may live outside `PATH` in a vendor SDK install.

use std::path::PathBuf;

/// Find a toolchain binary on `PATH`, falling back to known Zephyr SDK and
/// ESP-IDF install directories under the user's home directory.
pub fn which_or_sdk(name: &str) -> Option<PathBuf> {
    if let Ok(found) = which::which(name) {
        return Some(found);
    }
    find_in_sdk_dirs(name)
}

fn find_in_sdk_dirs(name: &str) -> Option<PathBuf> {
    let home = dirs_next::home_dir()?;

    if let Some(path) = newest_matching_glob(&home, "zephyr-sdk-*", &["arm-zephyr-eabi", "bin", name]) {
        return Some(path);
    }
    if let Some(path) = newest_matching_glob(
        &home.join(".espressif/tools/riscv32-esp-elf-gdb"),
        "*",
        &["riscv32-esp-elf-gdb", "bin", name],
    ) {
        return Some(path);
    }
    // ESP-IDF's xtensa GDB directory name is itself a glob ("xtensa-*-elf-gdb");
    // search both the version directory and the toolchain directory.
    if let Ok(entries) = std::fs::read_dir(home.join(".espressif/tools")) {
        let mut xtensa_dirs: Vec<_> = entries
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("xtensa-") && e.file_name().to_string_lossy().ends_with("-elf-gdb"))
            .collect();
        xtensa_dirs.sort_by_key(|e| e.file_name());
        for dir in xtensa_dirs.into_iter().rev() {
            if let Some(path) = newest_matching_glob(&dir.path(), "*", &[&dir.file_name().to_string_lossy(), "bin", name]) {
                return Some(path);
            }
        }
    }
    None
}

/// Looks for `<base>/<version-glob>/<tail...>`, preferring the
/// lexicographically-newest version directory, matching the Python
/// original's `sorted(..., reverse=True)` selection.
fn newest_matching_glob(base: &std::path::Path, version_glob_prefix: &str, tail: &[&str]) -> Option<PathBuf> {
    let prefix = version_glob_prefix.trim_end_matches('*');
    let mut entries: Vec<_> = std::fs::read_dir(base)
        .ok()?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries.into_iter().rev() {
        let mut candidate = entry.path();
        for segment in tail {
            candidate.push(segment);
        }
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
