//! Self-delimiting deflate frames.
//!
//! A frame is a 16-byte header (magic, compressed length, uncompressed length, CRC32 of the
//! uncompressed payload) followed by a raw deflate stream. Frames can be appended back to back
//! and re-read from their start offset alone.

use flate2::Compression;
use flate2::Crc;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{self, Read, Write};
use thiserror::Error;

pub const FRAME_MAGIC: [u8; 4] = *b"GBF\x01";
pub const FRAME_HEADER_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error while (de)compressing a frame: {0}")]
    Io(#[from] io::Error),
    #[error("frame does not start with the frame magic")]
    BadMagic,
    #[error("frame truncated: header announces {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },
    #[error("frame inflated to {actual} bytes, header announces {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("frame checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    Checksum { stored: u32, computed: u32 },
    #[error("frame payload exceeds the 4 GiB frame limit")]
    TooLarge,
}

/// The decoded fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub compressed_len: u32,
    pub uncompressed_len: u32,
    pub crc32: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_LEN,
                available: bytes.len(),
            });
        }
        if bytes[..4] != FRAME_MAGIC {
            return Err(FrameError::BadMagic);
        }
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Ok(Self {
            compressed_len: word(4),
            uncompressed_len: word(8),
            crc32: word(12),
        })
    }

    /// Total length of the frame, header included.
    #[inline]
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.compressed_len as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlockCompressor {
    level: Compression,
}

impl Default for BlockCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

impl BlockCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    /// Compresses the concatenation of `sections` into one frame, replacing `frame`'s content.
    pub fn compress_into(&self, sections: &[&[u8]], frame: &mut Vec<u8>) -> Result<(), FrameError> {
        frame.clear();
        frame.extend_from_slice(&[0u8; FRAME_HEADER_LEN]);

        let mut crc = Crc::new();
        let mut encoder = DeflateEncoder::new(std::mem::take(frame), self.level);
        for section in sections {
            crc.update(section);
            encoder.write_all(section)?;
        }
        *frame = encoder.finish()?;

        let total: usize = sections.iter().map(|section| section.len()).sum();
        let uncompressed = u32::try_from(total).map_err(|_| FrameError::TooLarge)?;
        let compressed =
            u32::try_from(frame.len() - FRAME_HEADER_LEN).map_err(|_| FrameError::TooLarge)?;
        frame[..4].copy_from_slice(&FRAME_MAGIC);
        frame[4..8].copy_from_slice(&compressed.to_le_bytes());
        frame[8..12].copy_from_slice(&uncompressed.to_le_bytes());
        frame[12..16].copy_from_slice(&crc.sum().to_le_bytes());
        Ok(())
    }

    pub fn compress(&self, sections: &[&[u8]]) -> Result<Vec<u8>, FrameError> {
        let mut frame = Vec::new();
        self.compress_into(sections, &mut frame)?;
        Ok(frame)
    }
}

/// Inflates the frame starting at the beginning of `bytes`. Trailing bytes are ignored.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
    let header = FrameHeader::parse(bytes)?;
    let end = header.frame_len();
    if bytes.len() < end {
        return Err(FrameError::Truncated {
            expected: end,
            available: bytes.len(),
        });
    }

    let expected = header.uncompressed_len as usize;
    let mut out = Vec::with_capacity(expected);
    DeflateDecoder::new(&bytes[FRAME_HEADER_LEN..end]).read_to_end(&mut out)?;
    if out.len() != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: out.len(),
        });
    }

    let mut crc = Crc::new();
    crc.update(&out);
    if crc.sum() != header.crc32 {
        return Err(FrameError::Checksum {
            stored: header.crc32,
            computed: crc.sum(),
        });
    }
    Ok(out)
}
