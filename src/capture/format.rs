//! Binary capture format (`.rttbin`): a 64-byte header followed by
//! variable-length frames, one per channel read.
//!
//! ```text
//! Header (64 bytes, fixed):
//!     magic:         4B  "RTTB"
//!     version:       1B  (1)
//!     header_size:   1B  (64)
//!     channel_count: 1B
//!     sample_width:  1B  (bytes per sample: 1, 2, or 4)
//!     sample_rate:   4B  u32 LE (Hz, 0 = unknown/variable)
//!     timestamp_hz:  4B  u32 LE (timestamp resolution, 0 = none)
//!     start_time_us: 8B  u64 LE (Unix epoch microseconds)
//!     channel_mask:  4B  u32 LE (bitmask of active channels)
//!     reserved:      36B (zero-filled)
//!
//! Frame (variable, repeated):
//!     timestamp:     4B  u32 LE (ticks since start)
//!     channel:       1B  u8
//!     length:        2B  u16 LE (payload bytes)
//!     payload:       <length> bytes
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::error::{EabError, Result};

pub const MAGIC: &[u8; 4] = b"RTTB";
pub const VERSION: u8 = 1;
pub const HEADER_SIZE: u8 = 64;
const RESERVED_LEN: usize = 36;
const FRAME_HEADER_SIZE: u64 = 7; // u32 + u8 + u16
const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u8,
    pub header_size: u8,
    pub channel_count: u8,
    pub sample_width: u8,
    pub sample_rate: u32,
    pub timestamp_hz: u32,
    pub start_time_us: u64,
    pub channel_mask: u32,
}

pub fn channel_mask(channels: &[u8]) -> u32 {
    channels.iter().fold(0u32, |mask, &ch| mask | (1u32 << ch))
}

fn write_header<W: Write>(w: &mut W, header: &Header) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_u8(header.version)?;
    w.write_u8(header.header_size)?;
    w.write_u8(header.channel_count)?;
    w.write_u8(header.sample_width)?;
    w.write_u32::<LE>(header.sample_rate)?;
    w.write_u32::<LE>(header.timestamp_hz)?;
    w.write_u64::<LE>(header.start_time_us)?;
    w.write_u32::<LE>(header.channel_mask)?;
    w.write_all(&[0u8; RESERVED_LEN])?;
    Ok(())
}

fn read_header<R: Read>(r: &mut R) -> Result<Header> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| EabError::FormatInvalid("file too small for header".into()))?;
    if &magic != MAGIC {
        return Err(EabError::FormatInvalid(format!("bad magic {magic:?}, expected {MAGIC:?}")));
    }

    let version = r.read_u8()?;
    if version > VERSION {
        return Err(EabError::FormatInvalid(format!("unsupported version {version} (max {VERSION})")));
    }
    let header_size = r.read_u8()?;
    let channel_count = r.read_u8()?;
    let sample_width = r.read_u8()?;
    let sample_rate = r.read_u32::<LE>()?;
    let timestamp_hz = r.read_u32::<LE>()?;
    let start_time_us = r.read_u64::<LE>()?;
    let channel_mask = r.read_u32::<LE>()?;
    let mut reserved = [0u8; RESERVED_LEN];
    r.read_exact(&mut reserved)?;

    Ok(Header {
        version,
        header_size,
        channel_count,
        sample_width,
        sample_rate,
        timestamp_hz,
        start_time_us,
        channel_mask,
    })
}

/// Appends frames to a capture file, one [`Writer`] per in-progress capture.
pub struct Writer<W: Write> {
    inner: W,
    start_time_us: u64,
    frame_count: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(
        mut inner: W,
        channels: &[u8],
        sample_width: u8,
        sample_rate: u32,
        timestamp_hz: u32,
        start_time_us: u64,
    ) -> Result<Self> {
        let header = Header {
            version: VERSION,
            header_size: HEADER_SIZE,
            channel_count: channels.len() as u8,
            sample_width,
            sample_rate,
            timestamp_hz,
            start_time_us,
            channel_mask: channel_mask(channels),
        };
        write_header(&mut inner, &header)?;
        Ok(Writer { inner, start_time_us, frame_count: 0 })
    }

    pub fn write_frame(&mut self, channel: u8, payload: &[u8], timestamp: u32) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EabError::Oversize(format!(
                "payload too large: {} bytes (max {MAX_PAYLOAD_LEN})",
                payload.len()
            )));
        }
        self.inner.write_u32::<LE>(timestamp)?;
        self.inner.write_u8(channel)?;
        self.inner.write_u16::<LE>(payload.len() as u16)?;
        self.inner.write_all(payload)?;
        self.frame_count += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn start_time_us(&self) -> u64 {
        self.start_time_us
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: u32,
    pub channel: u8,
    pub payload: Vec<u8>,
}

/// Reads frames sequentially from a capture file. A trailing frame whose
/// payload was cut short by a crash mid-write is treated as EOF, not an
/// error — partial data at the tail is expected during a non-graceful stop.
#[derive(Debug)]
pub struct Reader<R: Read + Seek> {
    inner: R,
    pub header: Header,
}

impl<R: Read + Seek> Reader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let header = read_header(&mut inner)?;
        if header.header_size as u64 > 64 {
            inner.seek(SeekFrom::Start(header.header_size as u64))?;
        }
        Ok(Reader { inner, header })
    }

    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut hdr = [0u8; FRAME_HEADER_SIZE as usize];
        match self.inner.read_exact(&mut hdr) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let mut cursor = &hdr[..];
        let timestamp = cursor.read_u32::<LE>()?;
        let channel = cursor.read_u8()?;
        let length = cursor.read_u16::<LE>()? as usize;

        let mut payload = vec![0u8; length];
        match self.inner.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        Ok(Some(Frame { timestamp, channel, payload }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_handful_of_frames() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, &[0, 1], 2, 10_000, 1_000_000, 1_700_000_000_000_000).unwrap();
            w.write_frame(0, b"hello", 1).unwrap();
            w.write_frame(1, b"world!!", 2).unwrap();
            w.flush().unwrap();
        }

        let mut r = Reader::new(Cursor::new(buf)).unwrap();
        assert_eq!(r.header.channel_count, 2);
        assert_eq!(r.header.channel_mask, 0b11);

        let mut frames = Vec::new();
        while let Some(frame) = r.read_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channel, 0);
        assert_eq!(frames[0].payload, b"hello");
        assert_eq!(frames[1].timestamp, 2);
    }

    #[test]
    fn rejects_oversize_payload() {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf, &[0], 2, 0, 0, 0).unwrap();
        let big = vec![0u8; 65536];
        let err = w.write_frame(0, &big, 0).unwrap_err();
        assert_eq!(err.kind().as_str(), "oversize");
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 64];
        let err = Reader::new(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind().as_str(), "format-invalid");
    }

    #[test]
    fn truncated_trailing_frame_reads_as_eof() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, &[0], 2, 0, 0, 0).unwrap();
            w.write_frame(0, b"ok", 0).unwrap();
        }
        // Simulate a writer killed mid-payload: frame header present, payload cut short.
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.push(0u8);
        buf.extend_from_slice(&10u16.to_le_bytes());
        buf.extend_from_slice(b"short");

        let mut r = Reader::new(Cursor::new(buf)).unwrap();
        let first = r.read_frame().unwrap();
        assert!(first.is_some());
        let second = r.read_frame().unwrap();
        assert!(second.is_none());
    }
}
