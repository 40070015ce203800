//! TI C2000 fault decoder: unlike Cortex-M (SCB fault registers at fixed
//! addresses), C2000 fault state lives in chip-specific NMI/PIE/watchdog
//! registers whose addresses and bit layouts come entirely from a loaded
//! [`RegisterMap`] rather than being hardcoded here.

use crate::error::Result;
use crate::regmap::{decode_register, DecodedRegister, RegisterMap};

use super::{FaultDecoder, FaultReport, MemoryReader};

fn generate_c2000_suggestions(
    nmi_flags: &[String],
    reset_flags: &[String],
    wd_disabled: bool,
    wd_flag: bool,
) -> Vec<String> {
    let mut suggestions = Vec::new();

    if nmi_flags.iter().any(|f| f == "CLOCKFAIL") {
        suggestions.push(
            "Clock failure detected — check external crystal, verify CLKSRCCTL1 oscillator source, inspect PLL lock".to_string(),
        );
    }
    if nmi_flags.iter().any(|f| f == "RAMUNCERR") {
        suggestions.push(
            "RAM uncorrectable ECC error — possible memory corruption, check for wild pointers or DMA overruns".to_string(),
        );
    }
    if nmi_flags.iter().any(|f| f == "FLUNCERR") {
        suggestions.push("Flash uncorrectable ECC error — flash may be corrupted, try erasing and reflashing".to_string());
    }
    if nmi_flags.iter().any(|f| f == "PIEVECTERR") {
        suggestions.push(
            "PIE vector fetch error — interrupt vector table corrupted, check for stack overflows or wild writes near 0x0D00".to_string(),
        );
    }
    if reset_flags.iter().any(|f| f == "WDRSN" || f == "NMIWDRSN") {
        suggestions.push(
            "Watchdog caused reset — firmware is not servicing the watchdog, check for infinite loops or blocked ISRs".to_string(),
        );
    }
    if wd_flag && !wd_disabled {
        suggestions.push(
            "Watchdog reset status flag is set — a watchdog reset occurred since last POR. Service watchdog more frequently or increase prescaler.".to_string(),
        );
    }

    if wd_disabled {
        suggestions.push("Watchdog is disabled (WDDIS=1) — consider enabling for production".to_string());
    } else {
        suggestions.push("Watchdog is enabled (WDDIS=0)".to_string());
    }

    if suggestions.is_empty() {
        suggestions.push("No active faults detected — system appears healthy".to_string());
    }
    suggestions
}

pub struct C2000Decoder<'a> {
    pub regmap: &'a RegisterMap,
}

impl<'a> C2000Decoder<'a> {
    pub fn new(regmap: &'a RegisterMap) -> Self {
        C2000Decoder { regmap }
    }

    fn decode_group_le(&self, group_name: &str, memory_reader: &mut MemoryReader, report: &mut FaultReport) -> Vec<DecodedRegister> {
        let Some(group) = self.regmap.get_group(group_name) else { return Vec::new() };
        let mut decoded = Vec::new();
        for reg in group.registers.values() {
            let Some(data) = memory_reader(reg.address, reg.size) else { continue };
            let raw = crate::regmap::decode::bytes_to_int(&data, reg.size, false);
            report.fault_registers.insert(reg.name.clone(), raw as u32);
            decoded.push(decode_register(reg, raw));
        }
        decoded
    }
}

impl<'a> FaultDecoder for C2000Decoder<'a> {
    fn name(&self) -> &str {
        "TI C2000"
    }

    fn analyze(&self, memory_reader: &mut MemoryReader) -> Result<FaultReport> {
        let mut report = FaultReport::new("c2000");

        let mut decoded_registers = self.decode_group_le("fault_registers", memory_reader, &mut report);
        decoded_registers.extend(self.decode_group_le("watchdog", memory_reader, &mut report));

        let mut nmi_flags = Vec::new();
        let mut reset_flags = Vec::new();
        let mut wd_disabled = false;
        let mut wd_flag = false;

        for dreg in &decoded_registers {
            match dreg.name.as_str() {
                "NMIFLG" => {
                    nmi_flags = dreg.active_flags.clone();
                    for flag in &nmi_flags {
                        report.faults.push(format!("NMI: {flag}"));
                    }
                }
                "NMISHDFLG" => {
                    if dreg.raw_value != 0 {
                        report.faults.push(format!("NMI shadow flags latched: 0x{:04X}", dreg.raw_value));
                    }
                }
                "RESC" => {
                    reset_flags = dreg.active_flags.clone();
                    for flag in &reset_flags {
                        report.faults.push(format!("Reset cause: {flag}"));
                    }
                }
                "WDCR" => {
                    for f in &dreg.fields {
                        match f.name.as_str() {
                            "WDDIS" => wd_disabled = f.raw_value == 1,
                            "WDFLG" => wd_flag = f.raw_value == 1,
                            _ => {}
                        }
                    }
                }
                name if name.starts_with("PIEIFR") => {
                    if dreg.raw_value != 0 {
                        report.faults.push(format!("Pending interrupts in {name}: 0x{:04X}", dreg.raw_value));
                    }
                }
                _ => {}
            }
        }

        report.suggestions = generate_c2000_suggestions(&nmi_flags, &reset_flags, wd_disabled, wd_flag);
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regmap::model::{BitField, Register, RegisterGroup};
    use indexmap::IndexMap;
    use std::collections::HashMap;

    fn sample_regmap() -> RegisterMap {
        let mut nmiflg_fields = Vec::new();
        nmiflg_fields.push(BitField { name: "CLOCKFAIL".into(), bit: Some(1), bits: None, description: String::new(), values: None });

        let mut registers = IndexMap::new();
        registers.insert(
            "NMIFLG".to_string(),
            Register { name: "NMIFLG".into(), address: 0x7060, size: 2, description: String::new(), bit_fields: nmiflg_fields, write_to_clear_matched: false },
        );

        let mut groups = IndexMap::new();
        groups.insert(
            "fault_registers".to_string(),
            RegisterGroup { name: "fault_registers".into(), registers, description: String::new() },
        );

        RegisterMap { chip: "f28003x".into(), family: "c2000".into(), cpu_freq_hz: 100_000_000, groups }
    }

    #[test]
    fn clock_failure_flag_produces_suggestion() {
        let regmap = sample_regmap();
        let mut regs = HashMap::new();
        regs.insert(0x7060u64, 0b10u32);
        let mut reader_fn = move |addr: u64, _size: u8| regs.get(&addr).map(|v| v.to_le_bytes().to_vec());
        let reader: &mut MemoryReader = &mut reader_fn;

        let decoder = C2000Decoder::new(&regmap);
        let report = decoder.analyze(reader).unwrap();

        assert!(report.faults.iter().any(|f| f == "NMI: CLOCKFAIL"));
        assert!(report.suggestions.iter().any(|s| s.contains("Clock failure")));
    }

    #[test]
    fn no_faults_still_reports_watchdog_state() {
        let regmap = sample_regmap();
        let mut reader_fn = |_addr: u64, _size: u8| Some(vec![0u8, 0u8]);
        let reader: &mut MemoryReader = &mut reader_fn;

        let decoder = C2000Decoder::new(&regmap);
        let report = decoder.analyze(reader).unwrap();
        assert!(report.suggestions.iter().any(|s| s.contains("Watchdog is enabled")));
    }
}
