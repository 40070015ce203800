//! `.rttbin` -> WAV, for listening to or plotting a single audio-rate
//! channel. Writes a minimal canonical PCM RIFF file directly; the payload
//! is already raw little-endian samples so no resampling is needed.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use byteorder::{WriteBytesExt, LE};

use crate::capture::format::Reader;
use crate::error::{EabError, Result};

pub fn to_wav(
    rttbin_path: &Path,
    output_path: &Path,
    channel: u8,
    sample_rate_override: Option<u32>,
    sample_width_override: Option<u8>,
) -> Result<()> {
    let input = File::open(rttbin_path)?;
    let mut reader = Reader::new(BufReader::new(input))?;

    let sample_rate = sample_rate_override.unwrap_or(reader.header.sample_rate);
    let sample_width = sample_width_override.unwrap_or(reader.header.sample_width);
    if sample_rate == 0 {
        return Err(EabError::InvalidArgument("sample_rate required for WAV (file header has 0)".into()));
    }
    if !matches!(sample_width, 1 | 2 | 4) {
        return Err(EabError::InvalidArgument(format!("unsupported sample_width for WAV: {sample_width}")));
    }

    let mut raw = Vec::new();
    while let Some(frame) = reader.read_frame()? {
        if frame.channel == channel {
            raw.extend(frame.payload);
        }
    }
    let trimmed_len = raw.len() - (raw.len() % sample_width as usize);
    raw.truncate(trimmed_len);

    write_pcm_wav(output_path, 1, sample_rate, sample_width as u16, &raw)
}

fn write_pcm_wav(path: &Path, num_channels: u16, sample_rate: u32, bits_per_sample_width: u16, data: &[u8]) -> Result<()> {
    let bits_per_sample = bits_per_sample_width * 8;
    let block_align = num_channels * bits_per_sample_width;
    let byte_rate = sample_rate * block_align as u32;

    let mut f = File::create(path)?;
    f.write_all(b"RIFF")?;
    f.write_u32::<LE>(36 + data.len() as u32)?;
    f.write_all(b"WAVE")?;

    f.write_all(b"fmt ")?;
    f.write_u32::<LE>(16)?;
    f.write_u16::<LE>(1)?; // PCM
    f.write_u16::<LE>(num_channels)?;
    f.write_u32::<LE>(sample_rate)?;
    f.write_u32::<LE>(byte_rate)?;
    f.write_u16::<LE>(block_align)?;
    f.write_u16::<LE>(bits_per_sample)?;

    f.write_all(b"data")?;
    f.write_u32::<LE>(data.len() as u32)?;
    f.write_all(data)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::format::Writer;

    #[test]
    fn writes_a_valid_riff_header() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, &[0], 2, 8000, 0, 0).unwrap();
            w.write_frame(0, &[0x01, 0x00, 0x02, 0x00], 0).unwrap();
        }
        let input = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(input.path(), &buf).unwrap();
        let output = tempfile::NamedTempFile::new().unwrap();

        to_wav(input.path(), output.path(), 0, None, None).unwrap();
        let bytes = std::fs::read(output.path()).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[36..40], b"data");
    }

    #[test]
    fn missing_sample_rate_is_rejected() {
        let mut buf = Vec::new();
        {
            Writer::new(&mut buf, &[0], 2, 0, 0, 0).unwrap();
        }
        let input = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(input.path(), &buf).unwrap();
        let output = tempfile::NamedTempFile::new().unwrap();
        let err = to_wav(input.path(), output.path(), 0, None, None).unwrap_err();
        assert_eq!(err.kind().as_str(), "invalid-argument");
    }
}
