// ========================================================================================
//                      Block directory: index entries and footer
// ========================================================================================

use crate::types::{ByteReader, FormatError};
use itertools::Itertools;

pub const INDEX_ENTRY_LEN: usize = 64;

/// Words written at the very end of every finalized file.
pub const EOF_SENTINEL: [u64; 4] = [
    0x4745_4E4F_424C_4F4B,
    0x0BAD_F00D_CAFE_D00D,
    0x4547_4E45_4E44_4F46,
    0x7FFF_FFFF_FFFF_FFFF,
];

pub const FOOTER_LEN: usize = 5 * 8 + EOF_SENTINEL.len() * 8;

/// One row of the block directory.
///
/// The same row describes an ingestion block (with its four section lengths) and a block of
/// result records (section lengths left at zero).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub contig_id: u32,
    pub min_position: u64,
    pub max_position: u64,
    pub n_variants: u32,
    pub byte_offset: u64,
    pub byte_offset_end: u64,
    pub uncompressed_size: u64,
    pub l_meta: u32,
    pub l_rle: u32,
    pub l_simple: u32,
    pub l_complex: u32,
}

impl IndexEntry {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_variants == 0
    }

    /// Records one more variant at `position`, opening the entry if it is empty.
    pub fn extend(&mut self, contig_id: u32, position: u64) {
        if self.is_empty() {
            self.contig_id = contig_id;
            self.min_position = position;
        }
        self.max_position = position;
        self.n_variants += 1;
    }

    /// Like [`IndexEntry::extend`], for rows whose positions arrive in any order.
    pub fn extend_range(&mut self, contig_id: u32, position: u64) {
        if self.is_empty() {
            self.contig_id = contig_id;
            self.min_position = position;
            self.max_position = position;
        } else {
            self.min_position = self.min_position.min(position);
            self.max_position = self.max_position.max(position);
        }
        self.n_variants += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn compressed_size(&self) -> u64 {
        self.byte_offset_end.saturating_sub(self.byte_offset)
    }

    /// The compressed frame of this entry, refused unless it lies inside `file` before the
    /// footer.
    pub fn frame<'a>(&self, file: &'a [u8]) -> Result<&'a [u8], FormatError> {
        bounded(file, self.byte_offset, Some(self.byte_offset_end)).ok_or_else(|| {
            FormatError::Corrupt(format!(
                "block range {}..{} lies outside the data section",
                self.byte_offset, self.byte_offset_end
            ))
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.contig_id.to_le_bytes());
        buf.extend_from_slice(&self.min_position.to_le_bytes());
        buf.extend_from_slice(&self.max_position.to_le_bytes());
        buf.extend_from_slice(&self.n_variants.to_le_bytes());
        buf.extend_from_slice(&self.byte_offset.to_le_bytes());
        buf.extend_from_slice(&self.byte_offset_end.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        buf.extend_from_slice(&self.l_meta.to_le_bytes());
        buf.extend_from_slice(&self.l_rle.to_le_bytes());
        buf.extend_from_slice(&self.l_simple.to_le_bytes());
        buf.extend_from_slice(&self.l_complex.to_le_bytes());
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            contig_id: reader.u32()?,
            min_position: reader.u64()?,
            max_position: reader.u64()?,
            n_variants: reader.u32()?,
            byte_offset: reader.u64()?,
            byte_offset_end: reader.u64()?,
            uncompressed_size: reader.u64()?,
            l_meta: reader.u32()?,
            l_rle: reader.u32()?,
            l_simple: reader.u32()?,
            l_complex: reader.u32()?,
        })
    }
}

/// Append-only directory of finalized entries, in flush order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndex {
    entries: Vec<IndexEntry>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, block: usize) -> Option<&IndexEntry> {
        self.entries.get(block)
    }

    pub fn total_variants(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.n_variants)).sum()
    }

    pub fn serialized_len(&self) -> usize {
        self.entries.len() * INDEX_ENTRY_LEN
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.serialized_len());
        for entry in &self.entries {
            entry.write_to(buf);
        }
    }

    pub fn read_from(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() % INDEX_ENTRY_LEN != 0 {
            return Err(FormatError::Corrupt(format!(
                "index length {} is not a multiple of {INDEX_ENTRY_LEN}",
                bytes.len()
            )));
        }
        let mut reader = ByteReader::new(bytes);
        let entries = (0..bytes.len() / INDEX_ENTRY_LEN)
            .map(|_| IndexEntry::read_from(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Checks the directory invariants of an ingestion file: each block ends where the next
    /// begins, each position range is ordered, and contig ids never decrease.
    pub fn validate(&self) -> Result<(), FormatError> {
        for (block, entry) in self.entries.iter().enumerate() {
            if entry.min_position > entry.max_position {
                return Err(FormatError::Corrupt(format!(
                    "block {block}: min position {} > max position {}",
                    entry.min_position, entry.max_position
                )));
            }
            if entry.byte_offset_end < entry.byte_offset {
                return Err(FormatError::Corrupt(format!(
                    "block {block}: end offset precedes start offset"
                )));
            }
        }
        for (block, (current, next)) in self.entries.iter().tuple_windows().enumerate() {
            if current.byte_offset_end != next.byte_offset {
                return Err(FormatError::Corrupt(format!(
                    "block {block} ends at {} but block {} starts at {}",
                    current.byte_offset_end,
                    block + 1,
                    next.byte_offset
                )));
            }
            if next.contig_id < current.contig_id {
                return Err(FormatError::Corrupt(format!(
                    "contig id decreases between blocks {block} and {}",
                    block + 1
                )));
            }
        }
        Ok(())
    }
}

/// Trailer anchoring the serialized index; always the last `FOOTER_LEN` bytes of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_len: u64,
    pub n_blocks: u64,
    pub n_variants: u64,
    pub largest_uncompressed: u64,
}

impl Footer {
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.index_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_len.to_le_bytes());
        buf.extend_from_slice(&self.n_blocks.to_le_bytes());
        buf.extend_from_slice(&self.n_variants.to_le_bytes());
        buf.extend_from_slice(&self.largest_uncompressed.to_le_bytes());
        for word in EOF_SENTINEL {
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Parses the footer from the tail of a complete file.
    pub fn read_from_tail(file: &[u8]) -> Result<Self, FormatError> {
        if file.len() < FOOTER_LEN {
            return Err(FormatError::Truncated {
                offset: 0,
                needed: FOOTER_LEN,
                available: file.len(),
            });
        }
        let mut reader = ByteReader::new(&file[file.len() - FOOTER_LEN..]);
        let footer = Self {
            index_offset: reader.u64()?,
            index_len: reader.u64()?,
            n_blocks: reader.u64()?,
            n_variants: reader.u64()?,
            largest_uncompressed: reader.u64()?,
        };
        for expected in EOF_SENTINEL {
            if reader.u64()? != expected {
                return Err(FormatError::BadMagic("end-of-file sentinel"));
            }
        }
        Ok(footer)
    }

    /// The serialized index bytes this footer points at.
    pub fn index_bytes<'a>(&self, file: &'a [u8]) -> Result<&'a [u8], FormatError> {
        let end = self.index_offset.checked_add(self.index_len);
        bounded(file, self.index_offset, end).ok_or_else(|| {
            FormatError::Corrupt(format!(
                "index at {} with {} bytes overlaps the footer",
                self.index_offset, self.index_len
            ))
        })
    }
}

/// `file[start..end]` when the range is ordered and ends before the footer.
fn bounded(file: &[u8], start: u64, end: Option<u64>) -> Option<&[u8]> {
    let start = usize::try_from(start).ok()?;
    let end = usize::try_from(end?).ok()?;
    let limit = file.len().checked_sub(FOOTER_LEN)?;
    (start <= end && end <= limit).then(|| &file[start..end])
}
