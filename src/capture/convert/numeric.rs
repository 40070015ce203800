//! Decode a finished `.rttbin` file into per-channel sample vectors. Works
//! on closed files only, never a live capture.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::capture::format::Reader;
use crate::error::{EabError, Result};

#[derive(Debug, Clone)]
pub enum Samples {
    U8(Vec<u8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

/// Concatenate every frame per channel and reinterpret the bytes as
/// fixed-width samples, trimming any trailing partial sample.
pub fn to_samples(path: &Path, sample_width_override: Option<u8>) -> Result<BTreeMap<u8, Samples>> {
    let file = File::open(path)?;
    let mut reader = Reader::new(BufReader::new(file))?;
    let sample_width = sample_width_override.unwrap_or(reader.header.sample_width);
    if !matches!(sample_width, 1 | 2 | 4) {
        return Err(EabError::InvalidArgument(format!(
            "unsupported sample_width: {sample_width} (must be 1, 2, or 4)"
        )));
    }

    let mut raw_per_channel: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    while let Some(frame) = reader.read_frame()? {
        raw_per_channel.entry(frame.channel).or_default().extend(frame.payload);
    }

    let mut result = BTreeMap::new();
    for (channel, raw) in raw_per_channel {
        let trimmed_len = raw.len() - (raw.len() % sample_width as usize);
        let raw = &raw[..trimmed_len];
        let samples = match sample_width {
            1 => Samples::U8(raw.to_vec()),
            2 => Samples::I16(raw.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect()),
            4 => Samples::I32(
                raw.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect(),
            ),
            _ => unreachable!(),
        };
        result.insert(channel, samples);
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::format::Writer;

    #[test]
    fn trims_partial_trailing_sample() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, &[0], 2, 0, 0, 0).unwrap();
            w.write_frame(0, &[0x01, 0x00, 0x02, 0x00, 0xFF], 0).unwrap();
        }
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &buf).unwrap();
        let result = to_samples(tmp.path(), None).unwrap();
        match result.get(&0).unwrap() {
            Samples::I16(v) => assert_eq!(v, &vec![1, 2]),
            _ => panic!("expected i16 samples"),
        }
    }
}
