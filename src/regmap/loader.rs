//! Validating loader for chip register-map JSON files.
//!
//! The Python prototype this is ported from trusted its dynamically-typed
//! dataclasses to hold whatever the JSON contained; a malformed bit-field
//! definition (both `bit` and `bits` set, or a bit position outside the
//! register's width) would only surface as a wrong decode at read time. We
//! reject those definitions up front instead.

use std::path::Path;

use crate::error::{EabError, Result};

use super::model::{Register, RegisterMap};

pub fn load_register_map(path: &Path) -> Result<RegisterMap> {
    let raw = std::fs::read_to_string(path)?;
    let map: RegisterMap = serde_json::from_str(&raw)
        .map_err(|e| EabError::FormatInvalid(format!("{}: {e}", path.display())))?;
    validate(&map)?;
    Ok(map)
}

fn validate(map: &RegisterMap) -> Result<()> {
    for group in map.groups.values() {
        for register in group.registers.values() {
            validate_register(register)?;
        }
    }
    Ok(())
}

fn validate_register(register: &Register) -> Result<()> {
    let width_bits = register.size as u32 * 8;
    for bf in &register.bit_fields {
        match (bf.bit, bf.bits) {
            (Some(_), Some(_)) => {
                return Err(EabError::FormatInvalid(format!(
                    "{}.{}: sets both `bit` and `bits`",
                    register.name, bf.name
                )));
            }
            (None, None) => {
                return Err(EabError::FormatInvalid(format!(
                    "{}.{}: sets neither `bit` nor `bits`",
                    register.name, bf.name
                )));
            }
            (Some(bit), None) => {
                if bit >= width_bits {
                    return Err(EabError::FormatInvalid(format!(
                        "{}.{}: bit {bit} outside {width_bits}-bit register",
                        register.name, bf.name
                    )));
                }
            }
            (None, Some((low, high))) => {
                if low > high || high >= width_bits {
                    return Err(EabError::FormatInvalid(format!(
                        "{}.{}: bit range ({low}, {high}) outside {width_bits}-bit register",
                        register.name, bf.name
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_temp(json: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_a_valid_map() {
        let json = r#"{
            "chip": "f28003x",
            "family": "c2000",
            "cpu_freq_hz": 100000000,
            "groups": {
                "nmi": {
                    "name": "nmi",
                    "registers": {
                        "NMIFLG": {
                            "name": "NMIFLG",
                            "address": 32,
                            "size": 2,
                            "bit_fields": [
                                {"name": "CLOCKFAIL", "bit": 1}
                            ]
                        }
                    }
                }
            }
        }"#;
        let f = write_temp(json);
        let map = load_register_map(f.path()).unwrap();
        assert_eq!(map.chip, "f28003x");
        assert!(map.get_register("nmi", "NMIFLG").is_some());
    }

    #[test]
    fn rejects_bit_and_bits_both_set() {
        let json = r#"{
            "chip": "x", "family": "y", "groups": {
                "g": {"name": "g", "registers": {
                    "R": {"name": "R", "address": 0, "size": 2,
                          "bit_fields": [{"name": "bad", "bit": 1, "bits": [0, 1]}]}
                }}
            }
        }"#;
        let f = write_temp(json);
        let err = load_register_map(f.path()).unwrap_err();
        assert_eq!(err.kind().as_str(), "format-invalid");
    }

    #[test]
    fn rejects_bit_outside_register_width() {
        let json = r#"{
            "chip": "x", "family": "y", "groups": {
                "g": {"name": "g", "registers": {
                    "R": {"name": "R", "address": 0, "size": 1,
                          "bit_fields": [{"name": "bad", "bit": 9}]}
                }}
            }
        }"#;
        let f = write_temp(json);
        assert!(load_register_map(f.path()).is_err());
    }
}
