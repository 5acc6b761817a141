//! Random access to a finished store: header, block directory and individual blocks.

use crate::compressor::{FrameError, FrameHeader, decompress};
use crate::header::StoreHeader;
use crate::index::{BlockIndex, Footer, IndexEntry};
use crate::iterator::BlockIterator;
use crate::types::{BitWidth, ByteReader, FormatError};
use log::info;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error while reading the store: {0}")]
    Io(#[from] io::Error),
    #[error("malformed store: {0}")]
    Format(#[from] FormatError),
    #[error("malformed block frame: {0}")]
    Frame(#[from] FrameError),
    #[error("block {block} does not exist (store has {n_blocks})")]
    NoSuchBlock { block: usize, n_blocks: usize },
}

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => &map[..],
            Backing::Owned(bytes) => bytes.as_slice(),
        }
    }
}

pub struct StoreReader {
    bytes: Backing,
    header: StoreHeader,
    index: BlockIndex,
    footer: Footer,
}

/// The decompressed payload of one block together with its directory row.
#[derive(Debug, Clone)]
pub struct DecompressedBlock {
    pub data: Vec<u8>,
    pub entry: IndexEntry,
}

impl DecompressedBlock {
    pub fn iter(&self, sample_count: u64) -> Result<BlockIterator<'_>, FormatError> {
        BlockIterator::new(&self.data, &self.entry, sample_count)
    }
}

impl StoreReader {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        // SAFETY: the store is opened read-only and never modified while mapped.
        let map = unsafe { Mmap::map(&file)? };
        let reader = Self::from_backing(Backing::Mapped(map))?;
        info!(
            "Opened store '{}': {} samples, {} blocks, {} variants",
            path.display(),
            reader.header.sample_count,
            reader.index.len(),
            reader.footer.n_variants
        );
        Ok(reader)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, StoreError> {
        Self::from_backing(Backing::Owned(bytes))
    }

    fn from_backing(bytes: Backing) -> Result<Self, StoreError> {
        let mut cursor = ByteReader::new(&bytes);
        let header = StoreHeader::parse(&mut cursor)?;
        let data_start = cursor.offset() as u64;

        let footer = Footer::read_from_tail(&bytes)?;
        let index = BlockIndex::read_from(footer.index_bytes(&bytes)?)?;
        index.validate()?;
        if index.len() as u64 != footer.n_blocks || index.total_variants() != footer.n_variants {
            return Err(FormatError::Corrupt(
                "footer totals disagree with the block index".into(),
            )
            .into());
        }
        if let Some(first) = index.entries().first() {
            if first.byte_offset != data_start {
                return Err(FormatError::Corrupt(format!(
                    "first block starts at {}, header ends at {data_start}",
                    first.byte_offset
                ))
                .into());
            }
        }
        if let Some(last) = index.entries().last() {
            if last.byte_offset_end != footer.index_offset {
                return Err(FormatError::Corrupt(
                    "last block does not end where the index begins".into(),
                )
                .into());
            }
        }

        Ok(Self {
            bytes,
            header,
            index,
            footer,
        })
    }

    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn bit_width(&self) -> BitWidth {
        self.header.bit_width()
    }

    pub fn sample_count(&self) -> u64 {
        self.header.sample_count
    }

    pub fn n_blocks(&self) -> usize {
        self.index.len()
    }

    /// Inflates block `block`.
    pub fn block(&self, block: usize) -> Result<DecompressedBlock, StoreError> {
        let entry = *self.index.get(block).ok_or(StoreError::NoSuchBlock {
            block,
            n_blocks: self.index.len(),
        })?;
        let frame = entry.frame(&self.bytes)?;
        let frame_header = FrameHeader::parse(frame)?;
        if frame_header.frame_len() != frame.len() {
            return Err(FormatError::Corrupt(format!(
                "block {block}: frame is {} bytes, index says {}",
                frame_header.frame_len(),
                frame.len()
            ))
            .into());
        }
        let data = decompress(frame)?;
        if data.len() as u64 != entry.uncompressed_size {
            return Err(FormatError::Corrupt(format!(
                "block {block}: inflated to {} bytes, index says {}",
                data.len(),
                entry.uncompressed_size
            ))
            .into());
        }
        Ok(DecompressedBlock { data, entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportSettings;
    use crate::import::ImportWriter;
    use crate::types::{AuxPayload, ContigDescriptor, Genotype, GenotypeLine};

    fn small_store() -> (Vec<u8>, Vec<GenotypeLine>) {
        let header = StoreHeader::new(
            6,
            vec![ContigDescriptor {
                name: "chr7".into(),
                length: 1000,
            }],
        );
        let settings = ImportSettings {
            flush_limit: Some(100),
            ..ImportSettings::default()
        };
        let mut writer = ImportWriter::new(Vec::new(), header, &settings).unwrap();
        let lines: Vec<GenotypeLine> = (0..5)
            .map(|i| GenotypeLine {
                contig_id: 0,
                position: 10 + i,
                aux: AuxPayload::default(),
                genotypes: (0..6)
                    .map(|s| Genotype::from_code(((s + i) % 3) as u8))
                    .collect(),
            })
            .collect();
        for line in &lines {
            assert!(writer.ingest(line).unwrap());
        }
        let (_, bytes) = writer.finish_into_inner().unwrap();
        (bytes, lines)
    }

    #[test]
    fn every_block_decodes_back_to_its_lines() {
        let (bytes, lines) = small_store();
        let reader = StoreReader::from_bytes(bytes).unwrap();
        assert_eq!(reader.sample_count(), 6);
        assert_eq!(reader.bit_width(), BitWidth::W8);
        assert!(reader.n_blocks() > 1);

        let mut decoded = Vec::new();
        for block in 0..reader.n_blocks() {
            let block = reader.block(block).unwrap();
            let mut iter = block.iter(reader.sample_count()).unwrap();
            while iter.advance() {
                decoded.push((iter.current_meta().unwrap().position, iter.genotypes()));
            }
        }
        let expected: Vec<_> = lines
            .iter()
            .map(|line| (line.position, line.genotypes.clone()))
            .collect();
        assert_eq!(decoded, expected);
        assert!(matches!(
            reader.block(99),
            Err(StoreError::NoSuchBlock { block: 99, .. })
        ));
    }

    #[test]
    fn stores_from_disk_are_mapped() {
        let (bytes, _) = small_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cohort.gbk");
        std::fs::write(&path, &bytes).unwrap();
        let reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.footer().n_variants, 5);
        assert_eq!(reader.header().contig_name(0), Some("chr7"));
    }

    #[test]
    fn damaged_stores_are_refused() {
        let (bytes, _) = small_store();
        let truncated = bytes[..bytes.len() - 3].to_vec();
        assert!(StoreReader::from_bytes(truncated).is_err());

        let mut flipped = bytes.clone();
        let reader = StoreReader::from_bytes(bytes).unwrap();
        let first = reader.index().entries()[0];
        // Flip a byte of the stored CRC of block 0.
        flipped[first.byte_offset as usize + 12] ^= 0x5a;
        let damaged = StoreReader::from_bytes(flipped).unwrap();
        assert!(matches!(damaged.block(0), Err(StoreError::Frame(_))));
    }

    #[test]
    fn footer_pointing_past_the_file_is_refused() {
        let (mut bytes, _) = small_store();
        let tail = bytes.len() - crate::index::FOOTER_LEN;
        bytes[tail..tail + 8].copy_from_slice(&(u64::MAX - 8).to_le_bytes());
        bytes[tail + 8..tail + 16].copy_from_slice(&64u64.to_le_bytes());
        assert!(matches!(
            StoreReader::from_bytes(bytes),
            Err(StoreError::Format(FormatError::Corrupt(_)))
        ));
    }
}
