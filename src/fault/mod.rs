pub mod c2000;
pub mod cortex_m;

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::Result;

/// Decoded fault state for one analysis pass: which fault flags fired,
/// the raw register values they came from, and actionable next steps.
#[derive(Debug, Clone, Default)]
pub struct FaultReport {
    pub arch: String,
    pub fault_registers: BTreeMap<String, u32>,
    pub faults: Vec<String>,
    pub suggestions: Vec<String>,
}

impl FaultReport {
    pub fn new(arch: impl Into<String>) -> Self {
        FaultReport { arch: arch.into(), ..Default::default() }
    }

    pub fn has_faults(&self) -> bool {
        !self.faults.is_empty()
    }
}

/// A `memory_reader` reads `size` bytes at `address` from the attached
/// target, returning `None` if the read failed (register not present on
/// this chip revision, target disconnected mid-read, etc).
pub type MemoryReader<'a> = dyn FnMut(u64, u8) -> Option<Vec<u8>> + 'a;

/// Common shape for a chip family's fault decoder: read the fault-related
/// registers, cross-reference flags, and produce an actionable report.
pub trait FaultDecoder {
    fn name(&self) -> &str;

    fn analyze(&self, memory_reader: &mut MemoryReader) -> Result<FaultReport>;

    fn format_report(&self, report: &FaultReport) -> String {
        let mut lines = vec![format!("=== {} Fault Analysis ===", self.name()), String::new()];

        if report.faults.is_empty() {
            lines.push("No active faults detected.".into());
        } else {
            lines.push("Active Faults:".into());
            for f in &report.faults {
                lines.push(format!("  - {f}"));
            }
        }

        lines.push(String::new());
        lines.push("Register Values:".into());
        for (name, value) in &report.fault_registers {
            lines.push(format!("  {name:20} = 0x{value:08X}"));
        }

        if !report.suggestions.is_empty() {
            lines.push(String::new());
            lines.push("Suggestions:".into());
            for s in &report.suggestions {
                lines.push(format!("  - {s}"));
            }
        }

        lines.join("\n")
    }

    fn to_json(&self, report: &FaultReport) -> Value {
        json!({
            "arch": report.arch,
            "faults": report.faults,
            "registers": report.fault_registers.iter()
                .map(|(name, val)| (name.clone(), format!("0x{val:08X}")))
                .collect::<BTreeMap<_, _>>(),
            "suggestions": report.suggestions,
            "has_faults": report.has_faults(),
        })
    }
}
