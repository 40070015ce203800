//! `.rttbin` -> CSV: one row per frame, `timestamp,channel,payload_hex,payload_length`.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use crate::capture::format::Reader;
use crate::error::Result;

pub fn to_csv(rttbin_path: &Path, output_path: &Path) -> Result<()> {
    let input = File::open(rttbin_path)?;
    let mut reader = Reader::new(BufReader::new(input))?;
    let timestamp_hz = reader.header.timestamp_hz;

    let mut out = File::create(output_path)?;
    writeln!(out, "timestamp,channel,payload_hex,payload_length")?;

    while let Some(frame) = reader.read_frame()? {
        let ts_field = if timestamp_hz > 0 {
            format!("{:.6}", frame.timestamp as f64 / timestamp_hz as f64)
        } else {
            frame.timestamp.to_string()
        };
        let hex: String = frame.payload.iter().map(|b| format!("{b:02x}")).collect();
        writeln!(out, "{ts_field},{},{hex},{}", frame.channel, frame.payload.len())?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::format::Writer;

    #[test]
    fn writes_header_and_one_row_per_frame() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, &[0], 2, 0, 1000, 0).unwrap();
            w.write_frame(0, &[0xAB], 500).unwrap();
        }
        let input = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(input.path(), &buf).unwrap();
        let output = tempfile::NamedTempFile::new().unwrap();

        to_csv(input.path(), output.path()).unwrap();
        let contents = std::fs::read_to_string(output.path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "timestamp,channel,payload_hex,payload_length");
        assert_eq!(lines.next().unwrap(), "0.500000,0,ab,1");
    }
}
