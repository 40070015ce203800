//! ARM Cortex-M fault analysis: read the System Control Block's fault
//! status registers and turn the bit soup into named flags and plain-
//! language suggestions.
//!
//! Reference: ARMv7-M Architecture Reference Manual, System Control Block
//! (CFSR/HFSR/MMFAR/BFAR at 0xE000ED28-0xE000ED3B).

use crate::error::Result;

use super::{FaultDecoder, FaultReport, MemoryReader};

const CFSR: u64 = 0xE000_ED28;
const HFSR: u64 = 0xE000_ED2C;
const MMFAR: u64 = 0xE000_ED34;
const BFAR: u64 = 0xE000_ED38;

const MMFSR_FLAGS: &[(u32, &str)] = &[
    (0, "IACCVIOL"),
    (1, "DACCVIOL"),
    (3, "MUNSTKERR"),
    (4, "MSTKERR"),
    (5, "MLSPERR"),
    (7, "MMARVALID"),
];

const BFSR_FLAGS: &[(u32, &str)] = &[
    (0, "IBUSERR"),
    (1, "PRECISERR"),
    (2, "IMPRECISERR"),
    (3, "UNSTKERR"),
    (4, "STKERR"),
    (5, "LSPERR"),
    (7, "BFARVALID"),
];

const UFSR_FLAGS: &[(u32, &str)] = &[
    (0, "UNDEFINSTR"),
    (1, "INVSTATE"),
    (2, "INVPC"),
    (3, "NOCPU"),
    (8, "UNALIGNED"),
    (9, "DIVBYZERO"),
];

const HFSR_FLAGS: &[(u32, &str)] = &[(1, "VECTTBL"), (30, "FORCED"), (31, "DEBUGEVT")];

fn active_flags(value: u32, table: &[(u32, &str)]) -> Vec<String> {
    table.iter().filter(|(bit, _)| value & (1 << bit) != 0).map(|(_, name)| name.to_string()).collect()
}

fn read_u32(memory_reader: &mut MemoryReader, address: u64) -> Option<u32> {
    let data = memory_reader(address, 4)?;
    if data.len() < 4 {
        return None;
    }
    Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

fn suggestions_for(mmfsr: &[String], bfsr: &[String], ufsr: &[String], hfsr: &[String]) -> Vec<String> {
    let mut out = Vec::new();

    if mmfsr.iter().any(|f| f == "IACCVIOL" || f == "DACCVIOL") {
        out.push("Memory management fault — code or data access violated MPU region permissions".into());
    }
    if mmfsr.iter().any(|f| f == "MSTKERR" || f == "MUNSTKERR") {
        out.push("Stacking/unstacking fault during exception entry/exit — check stack pointer and MPU stack guard".into());
    }
    if bfsr.iter().any(|f| f == "PRECISERR") {
        out.push("Precise bus fault — faulting instruction address is in BFAR-adjacent PC, check for a wild pointer dereference".into());
    }
    if bfsr.iter().any(|f| f == "IMPRECISERR") {
        out.push("Imprecise bus fault — the faulting access can't be pinned to one instruction, check buffered writes".into());
    }
    if ufsr.iter().any(|f| f == "UNDEFINSTR") {
        out.push("Undefined instruction — check for corrupted flash, a jump into data, or a mismatched FPU/DSP instruction set".into());
    }
    if ufsr.iter().any(|f| f == "INVPC") {
        out.push("Invalid PC load — an EXC_RETURN or vector table entry did not point to valid code".into());
    }
    if ufsr.iter().any(|f| f == "UNALIGNED") {
        out.push("Unaligned access trapped — check struct packing and pointer casts".into());
    }
    if ufsr.iter().any(|f| f == "DIVBYZERO") {
        out.push("Division by zero trapped — check divisor validation".into());
    }
    if hfsr.iter().any(|f| f == "FORCED") {
        out.push("HardFault escalated from a configurable fault — the original fault handler was disabled or itself faulted".into());
    }
    if hfsr.iter().any(|f| f == "VECTTBL") {
        out.push("Vector table read fault — the vector table base (VTOR) or an entry is corrupted".into());
    }

    if out.is_empty() {
        out.push("No active faults detected — system appears healthy".into());
    }
    out
}

pub struct CortexMDecoder;

impl FaultDecoder for CortexMDecoder {
    fn name(&self) -> &str {
        "ARM Cortex-M"
    }

    fn analyze(&self, memory_reader: &mut MemoryReader) -> Result<FaultReport> {
        let mut report = FaultReport::new("cortex-m");

        let cfsr = read_u32(memory_reader, CFSR).unwrap_or(0);
        let hfsr = read_u32(memory_reader, HFSR).unwrap_or(0);
        report.fault_registers.insert("CFSR".into(), cfsr);
        report.fault_registers.insert("HFSR".into(), hfsr);

        let mmfsr_raw = cfsr & 0xFF;
        let bfsr_raw = (cfsr >> 8) & 0xFF;
        let ufsr_raw = (cfsr >> 16) & 0xFFFF;

        let mmfsr = active_flags(mmfsr_raw, MMFSR_FLAGS);
        let bfsr = active_flags(bfsr_raw, BFSR_FLAGS);
        let ufsr = active_flags(ufsr_raw, UFSR_FLAGS);
        let hfsr_flags = active_flags(hfsr, HFSR_FLAGS);

        if mmfsr.contains(&"MMARVALID".to_string()) {
            if let Some(mmfar) = read_u32(memory_reader, MMFAR) {
                report.fault_registers.insert("MMFAR".into(), mmfar);
            }
        }
        if bfsr.contains(&"BFARVALID".to_string()) {
            if let Some(bfar) = read_u32(memory_reader, BFAR) {
                report.fault_registers.insert("BFAR".into(), bfar);
            }
        }

        for flag in &mmfsr {
            report.faults.push(format!("MemManage: {flag}"));
        }
        for flag in &bfsr {
            report.faults.push(format!("BusFault: {flag}"));
        }
        for flag in &ufsr {
            report.faults.push(format!("UsageFault: {flag}"));
        }
        for flag in &hfsr_flags {
            report.faults.push(format!("HardFault: {flag}"));
        }

        report.suggestions = suggestions_for(&mmfsr, &bfsr, &ufsr, &hfsr_flags);
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn fake_reader(regs: HashMap<u64, u32>) -> impl FnMut(u64, u8) -> Option<Vec<u8>> {
        move |addr, _size| regs.get(&addr).map(|v| v.to_le_bytes().to_vec())
    }

    #[test]
    fn decodes_precise_bus_fault() {
        let mut regs = HashMap::new();
        // BFSR.PRECISERR (bit 9 of CFSR) + BFARVALID (bit 15)
        regs.insert(CFSR, (1 << 9) | (1 << 15));
        regs.insert(BFAR, 0x2000_1000);
        let mut reader_fn = fake_reader(regs);
        let reader: &mut MemoryReader = &mut reader_fn;
        let report = CortexMDecoder.analyze(reader).unwrap();
        assert!(report.faults.iter().any(|f| f.contains("PRECISERR")));
        assert_eq!(report.fault_registers.get("BFAR"), Some(&0x2000_1000));
    }

    #[test]
    fn healthy_chip_has_no_faults() {
        let mut reader_fn = fake_reader(HashMap::new());
        let reader: &mut MemoryReader = &mut reader_fn;
        let report = CortexMDecoder.analyze(reader).unwrap();
        assert!(!report.has_faults());
        assert!(report.suggestions[0].contains("healthy"));
    }
}
