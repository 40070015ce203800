use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named bit or bit range within a register.
///
/// Exactly one of `bit` / `bits` is set; `RegisterMap::load` rejects
/// definitions that set both or neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    pub name: String,
    #[serde(default)]
    pub bit: Option<u32>,
    #[serde(default)]
    pub bits: Option<(u32, u32)>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub values: Option<BTreeMap<String, String>>,
}

impl BitField {
    pub fn mask(&self) -> u64 {
        if let Some(bit) = self.bit {
            return 1u64 << bit;
        }
        if let Some((low, high)) = self.bits {
            let width = high - low + 1;
            return ((1u64 << width) - 1) << low;
        }
        0
    }

    pub fn shift(&self) -> u32 {
        if let Some(bit) = self.bit {
            return bit;
        }
        if let Some((low, _high)) = self.bits {
            return low;
        }
        0
    }

    pub fn extract(&self, raw: u64) -> u64 {
        (raw & self.mask()) >> self.shift()
    }

    /// Extract and decode to an enum string if `values` defines one, else
    /// the raw extracted value as a decimal string.
    pub fn decode(&self, raw: u64) -> String {
        let val = self.extract(raw);
        if let Some(values) = &self.values {
            if let Some(named) = values.get(&val.to_string()) {
                return named.clone();
            }
            return format!("unknown({val})");
        }
        val.to_string()
    }

    /// True for a single-bit field with no enum mapping — these are the
    /// fields that participate in `Register::active_flags`.
    pub fn is_flag(&self) -> bool {
        self.bit.is_some() && self.values.is_none()
    }
}

/// A memory-mapped register with optional bit-field definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub address: u64,
    #[serde(default = "default_register_size")]
    pub size: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bit_fields: Vec<BitField>,
    /// Per-chip quirk: some cores require a write-back to the comparator's
    /// match flag before it will fire again, rather than auto-clearing it.
    #[serde(default)]
    pub write_to_clear_matched: bool,
}

fn default_register_size() -> u8 {
    2
}

impl Register {
    pub fn decode(&self, raw: u64) -> BTreeMap<String, String> {
        self.bit_fields
            .iter()
            .map(|bf| (bf.name.clone(), bf.decode(raw)))
            .collect()
    }

    pub fn active_flags(&self, raw: u64) -> Vec<String> {
        self.bit_fields
            .iter()
            .filter(|bf| bf.bit.is_some() && bf.extract(raw) == 1)
            .map(|bf| bf.name.clone())
            .collect()
    }
}

/// A named group of related registers (e.g. `fault_registers`, `erad`).
///
/// Backed by an `IndexMap` so iteration order matches declaration order in
/// the source JSON, not hash order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterGroup {
    pub name: String,
    #[serde(default)]
    pub registers: IndexMap<String, Register>,
    #[serde(default)]
    pub description: String,
}

/// Complete register map for a chip, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMap {
    pub chip: String,
    pub family: String,
    #[serde(default)]
    pub cpu_freq_hz: u64,
    #[serde(default)]
    pub groups: IndexMap<String, RegisterGroup>,
}

impl RegisterMap {
    pub fn get_register(&self, group: &str, name: &str) -> Option<&Register> {
        self.groups.get(group)?.registers.get(name)
    }

    pub fn get_group(&self, name: &str) -> Option<&RegisterGroup> {
        self.groups.get(name)
    }

    pub fn all_registers(&self) -> Vec<&Register> {
        self.groups
            .values()
            .flat_map(|g| g.registers.values())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_field() -> BitField {
        BitField {
            name: "enabled".into(),
            bit: Some(3),
            bits: None,
            description: String::new(),
            values: None,
        }
    }

    #[test]
    fn single_bit_mask_and_shift() {
        let bf = sample_field();
        assert_eq!(bf.mask(), 0b1000);
        assert_eq!(bf.shift(), 3);
        assert_eq!(bf.extract(0b1111), 1);
        assert_eq!(bf.extract(0b0111), 0);
    }

    #[test]
    fn bit_range_mask_and_shift() {
        let bf = BitField {
            name: "mode".into(),
            bit: None,
            bits: Some((4, 6)),
            description: String::new(),
            values: None,
        };
        assert_eq!(bf.mask(), 0b0111_0000);
        assert_eq!(bf.extract(0b0101_0000), 0b101);
    }

    #[test]
    fn enum_decode_falls_back_to_unknown() {
        let mut values = BTreeMap::new();
        values.insert("0".to_string(), "disabled".to_string());
        values.insert("1".to_string(), "enabled".to_string());
        let bf = BitField {
            name: "mode".into(),
            bit: None,
            bits: Some((0, 1)),
            description: String::new(),
            values: Some(values),
        };
        assert_eq!(bf.decode(0b01), "enabled");
        assert_eq!(bf.decode(0b10), "unknown(2)");
    }

    #[test]
    fn active_flags_only_reports_set_single_bit_fields() {
        let reg = Register {
            name: "CTRL".into(),
            address: 0x4000_0000,
            size: 4,
            description: String::new(),
            bit_fields: vec![sample_field()],
            write_to_clear_matched: false,
        };
        assert_eq!(reg.active_flags(0b1000), vec!["enabled".to_string()]);
        assert!(reg.active_flags(0).is_empty());
    }
}
