//! Generic register decoder, chip-agnostic: turns raw bytes from any memory
//! read transport into structured field values using a [`Register`]
//! definition loaded from a chip's `RegisterMap`.

use serde::Serialize;

use super::model::{Register, RegisterGroup};

#[derive(Debug, Clone, Serialize)]
pub struct DecodedField {
    pub name: String,
    pub raw_value: u64,
    pub decoded: String,
    pub description: String,
    pub is_flag: bool,
    pub is_set: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecodedRegister {
    pub name: String,
    pub address: u64,
    pub raw_value: u64,
    pub size: u8,
    pub description: String,
    pub fields: Vec<DecodedField>,
    pub active_flags: Vec<String>,
}

impl DecodedRegister {
    pub fn hex_value(&self) -> String {
        format!("0x{:0width$X}", self.raw_value, width = self.size as usize * 2)
    }
}

/// Convert raw bytes to an integer, little-endian by default. Short reads
/// are zero-padded on the high end rather than rejected, matching how a
/// partial memory read from a flaky probe link is still worth decoding.
pub fn bytes_to_int(data: &[u8], size: u8, big_endian: bool) -> u64 {
    let size = size as usize;
    let mut buf = [0u8; 8];
    let n = data.len().min(size).min(8);
    if big_endian {
        // Right-align the available bytes within the `size`-byte window,
        // then read the full 8-byte buffer as big-endian.
        let offset = 8 - size;
        buf[offset..offset + n].copy_from_slice(&data[..n]);
        u64::from_be_bytes(buf)
    } else {
        buf[..n].copy_from_slice(&data[..n]);
        u64::from_le_bytes(buf)
    }
}

pub fn decode_register(register: &Register, raw_value: u64) -> DecodedRegister {
    let mut fields = Vec::with_capacity(register.bit_fields.len());
    let mut active_flags = Vec::new();

    for bf in &register.bit_fields {
        let extracted = bf.extract(raw_value);
        let decoded = bf.decode(raw_value);
        let is_flag = bf.is_flag();
        let is_set = is_flag && extracted == 1;

        if is_set {
            active_flags.push(bf.name.clone());
        }

        fields.push(DecodedField {
            name: bf.name.clone(),
            raw_value: extracted,
            decoded,
            description: bf.description.clone(),
            is_flag,
            is_set,
        });
    }

    DecodedRegister {
        name: register.name.clone(),
        address: register.address,
        raw_value,
        size: register.size,
        description: register.description.clone(),
        fields,
        active_flags,
    }
}

pub fn decode_register_bytes(register: &Register, data: &[u8], big_endian: bool) -> DecodedRegister {
    let raw_value = bytes_to_int(data, register.size, big_endian);
    decode_register(register, raw_value)
}

/// Decode every register in a group by reading memory through `memory_reader`.
/// Registers the reader can't satisfy (returns `None`) are skipped rather
/// than treated as an error — a partially-populated fault dump is still
/// useful.
pub fn decode_group<F>(group: &RegisterGroup, mut memory_reader: F, big_endian: bool) -> Vec<DecodedRegister>
where
    F: FnMut(u64, u8) -> Option<Vec<u8>>,
{
    group
        .registers
        .values()
        .filter_map(|reg| {
            memory_reader(reg.address, reg.size).map(|data| decode_register_bytes(reg, &data, big_endian))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regmap::model::BitField;
    use indexmap::IndexMap;

    fn ctrl_register() -> Register {
        Register {
            name: "CTRL".into(),
            address: 0x4000_0000,
            size: 2,
            description: "control register".into(),
            bit_fields: vec![BitField {
                name: "enable".into(),
                bit: Some(0),
                bits: None,
                description: String::new(),
                values: None,
            }],
            write_to_clear_matched: false,
        }
    }

    #[test]
    fn short_read_is_zero_padded() {
        assert_eq!(bytes_to_int(&[0x01], 2, false), 1);
        assert_eq!(bytes_to_int(&[], 2, false), 0);
    }

    #[test]
    fn hex_value_matches_register_width() {
        let decoded = decode_register(&ctrl_register(), 0x0001);
        assert_eq!(decoded.hex_value(), "0x0001");
    }

    #[test]
    fn decode_group_skips_unreadable_registers() {
        let mut registers = IndexMap::new();
        registers.insert("CTRL".to_string(), ctrl_register());
        registers.insert(
            "UNREACHABLE".to_string(),
            Register {
                name: "UNREACHABLE".into(),
                address: 0xdead_0000,
                size: 2,
                description: String::new(),
                bit_fields: vec![],
                write_to_clear_matched: false,
            },
        );
        let group = RegisterGroup {
            name: "status".into(),
            registers,
            description: String::new(),
        };

        let decoded = decode_group(
            &group,
            |addr, _size| if addr == 0x4000_0000 { Some(vec![0x01, 0x00]) } else { None },
            false,
        );

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "CTRL");
        assert_eq!(decoded[0].active_flags, vec!["enable".to_string()]);
    }
}
