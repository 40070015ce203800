//! Exercises the same path `eabctl fault --decoder c2000 --regmap <file>`
//! takes: load a register map from JSON on disk, then run the C2000 fault
//! decoder against simulated memory reads keyed by the addresses that map
//! declares.

use std::collections::HashMap;
use std::io::Write;

use eab::fault::{c2000::C2000Decoder, FaultDecoder};
use eab::regmap::load_register_map;

const REGMAP_JSON: &str = r#"{
    "chip": "f28003x",
    "family": "c2000",
    "cpu_freq_hz": 100000000,
    "groups": {
        "fault_registers": {
            "name": "fault_registers",
            "registers": {
                "NMIFLG": {
                    "name": "NMIFLG",
                    "address": 28768,
                    "size": 2,
                    "bit_fields": [
                        { "name": "CLOCKFAIL", "bit": 1 }
                    ]
                },
                "RESC": {
                    "name": "RESC",
                    "address": 28776,
                    "size": 2,
                    "bit_fields": [
                        { "name": "WDRSN", "bit": 0 }
                    ]
                }
            }
        },
        "watchdog": {
            "name": "watchdog",
            "registers": {
                "WDCR": {
                    "name": "WDCR",
                    "address": 28800,
                    "size": 2,
                    "bit_fields": [
                        { "name": "WDDIS", "bit": 5 },
                        { "name": "WDFLG", "bit": 7 }
                    ]
                }
            }
        }
    }
}"#;

#[test]
fn clock_fail_and_watchdog_reset_surface_through_the_full_file_pipeline() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(REGMAP_JSON.as_bytes()).unwrap();

    let regmap = load_register_map(f.path()).unwrap();
    let decoder = C2000Decoder::new(&regmap);

    // NMIFLG.CLOCKFAIL set, RESC.WDRSN set, WDCR.WDFLG set with WDDIS clear.
    let mut memory = HashMap::new();
    memory.insert((0x7060u64, 2u8), vec![0b0000_0010u8, 0x00]);
    memory.insert((0x7068u64, 2u8), vec![0b0000_0001u8, 0x00]);
    memory.insert((0x7080u64, 2u8), vec![0b1000_0000u8, 0x00]);

    let mut reader = |address: u64, size: u8| -> Option<Vec<u8>> { memory.get(&(address, size)).cloned() };
    let report = decoder.analyze(&mut reader).unwrap();

    assert!(report.faults.iter().any(|f| f.contains("CLOCKFAIL")));
    assert!(report.faults.iter().any(|f| f.contains("Reset cause: WDRSN")));
    assert!(report.suggestions.iter().any(|s| s.contains("Watchdog caused reset")));

    let json = decoder.to_json(&report);
    assert_eq!(json["arch"], "c2000");
    assert_eq!(json["has_faults"], true);
}
