// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;
use thiserror::Error;

/// A single diploid, bi-allelic genotype call as stored on disk (2 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Genotype {
    HomRef = 0,
    Het = 1,
    HomAlt = 2,
    Missing = 3,
}

impl Genotype {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decodes the low two bits of `code`. Every 2-bit pattern is a valid call.
    #[inline]
    pub fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => Self::HomRef,
            1 => Self::Het,
            2 => Self::HomAlt,
            _ => Self::Missing,
        }
    }

    /// Number of alternate allele copies, or `None` for a missing call.
    #[inline]
    pub fn alt_dosage(self) -> Option<u8> {
        match self {
            Self::HomRef => Some(0),
            Self::Het => Some(1),
            Self::HomAlt => Some(2),
            Self::Missing => None,
        }
    }
}

/// The packed field width shared by RLE run words and simple-code words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitWidth {
    W8,
    W16,
    W32,
    W64,
}

impl BitWidth {
    /// Picks the narrowest word that can describe a cohort of `sample_count` samples.
    pub fn from_sample_count(sample_count: u64) -> Self {
        if sample_count < u64::from(u8::MAX) {
            Self::W8
        } else if sample_count < u64::from(u16::MAX) {
            Self::W16
        } else if sample_count < u64::from(u32::MAX) {
            Self::W32
        } else {
            Self::W64
        }
    }

    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::W8),
            2 => Some(Self::W16),
            4 => Some(Self::W32),
            8 => Some(Self::W64),
            _ => None,
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// The longest run a single word can hold; longer runs are split.
    #[inline]
    pub fn max_run_length(self) -> u64 {
        (1u64 << (self.bits() - 2)) - 1
    }

    /// Number of 2-bit sample codes packed into one simple word.
    #[inline]
    pub fn codes_per_word(self) -> usize {
        self.bits() as usize / 2
    }

    #[inline]
    pub fn write_word(self, buf: &mut Vec<u8>, word: u64) {
        match self {
            Self::W8 => buf.push(word as u8),
            Self::W16 => buf.extend_from_slice(&(word as u16).to_le_bytes()),
            Self::W32 => buf.extend_from_slice(&(word as u32).to_le_bytes()),
            Self::W64 => buf.extend_from_slice(&word.to_le_bytes()),
        }
    }

    /// Reads one word from the start of `bytes`. The caller guarantees the length.
    #[inline]
    pub fn read_word(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        let width = self.bytes();
        raw[..width].copy_from_slice(&bytes[..width]);
        u64::from_le_bytes(raw)
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// One run-length record: `length` consecutive samples carrying `genotype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub length: u64,
    pub genotype: Genotype,
}

impl Run {
    #[inline]
    pub fn pack(self) -> u64 {
        (self.length << 2) | u64::from(self.genotype.code())
    }

    #[inline]
    pub fn unpack(word: u64) -> Self {
        Self {
            length: word >> 2,
            genotype: Genotype::from_code((word & 0b11) as u8),
        }
    }
}

/// A contig (chromosome) as declared in a file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigDescriptor {
    pub name: String,
    pub length: u64,
}

/// The variable-length auxiliary payload stored in a block's complex-metadata section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxPayload {
    pub id: String,
    pub ref_allele: String,
    pub alt_allele: String,
}

/// An already-parsed variant line, as produced by a genotype source.
#[derive(Debug, Clone, PartialEq)]
pub struct GenotypeLine {
    pub contig_id: u32,
    pub position: u64,
    pub aux: AuxPayload,
    pub genotypes: Vec<Genotype>,
}

pub const META_FLAG_RLE: u8 = 1;
pub const META_FLAG_HAS_MISSING: u8 = 1 << 1;

/// Serialised size of a [`MetaEntry`].
pub const META_ENTRY_LEN: usize = 41;

/// The fixed-size, per-variant record of a block's metadata section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaEntry {
    pub flags: u8,
    pub contig_id: u32,
    pub position: u64,
    pub maf: f64,
    pub hwe_p: f64,
    /// RLE words for run-length encoded variants, simple words otherwise.
    pub n_runs: u32,
    /// Byte offset into the RLE or simple section, depending on the encoding flag.
    pub code_offset: u32,
    /// Byte offset into the complex-metadata section.
    pub complex_offset: u32,
}

impl MetaEntry {
    #[inline]
    pub fn is_rle(&self) -> bool {
        self.flags & META_FLAG_RLE != 0
    }

    #[inline]
    pub fn has_missing(&self) -> bool {
        self.flags & META_FLAG_HAS_MISSING != 0
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.flags);
        buf.extend_from_slice(&self.contig_id.to_le_bytes());
        buf.extend_from_slice(&self.position.to_le_bytes());
        buf.extend_from_slice(&self.maf.to_le_bytes());
        buf.extend_from_slice(&self.hwe_p.to_le_bytes());
        buf.extend_from_slice(&self.n_runs.to_le_bytes());
        buf.extend_from_slice(&self.code_offset.to_le_bytes());
        buf.extend_from_slice(&self.complex_offset.to_le_bytes());
    }

    pub fn read_from(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut reader = ByteReader::new(bytes);
        Ok(Self {
            flags: reader.u8()?,
            contig_id: reader.u32()?,
            position: reader.u64()?,
            maf: reader.f64()?,
            hwe_p: reader.f64()?,
            n_runs: reader.u32()?,
            code_offset: reader.u32()?,
            complex_offset: reader.u32()?,
        })
    }
}

/// Errors raised while parsing any of the on-disk structures.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of data: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("bad magic bytes in {0}")]
    BadMagic(&'static str),
    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("impossible bit width: {0} bytes")]
    InvalidBitWidth(u8),
    #[error("string field is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("result payload of {0} bytes exceeds the 65535-byte record limit")]
    PayloadTooLarge(usize),
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

/// A bounds-checked little-endian cursor over a byte slice.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let available = self.bytes.len() - self.offset;
        if len > available {
            return Err(FormatError::Truncated {
                offset: self.offset,
                needed: len,
                available,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64, FormatError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Reads a `u32`-length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String, FormatError> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }
}

/// Appends a `u32`-length-prefixed string.
pub fn put_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}
