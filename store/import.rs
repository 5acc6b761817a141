// ========================================================================================
//
//                             THE INGESTION BLOCK PIPELINE
//
// ========================================================================================
//
// encode -> filter -> stage -> (contig change | staging over limit) -> compress -> append.
// One writer owns its stream, staging buffers, in-progress index entry and block index.

use crate::compressor::{BlockCompressor, FrameError};
use crate::config::ImportSettings;
use crate::encoder::{BlockBuffers, EncodeError, Encoded, GenotypeEncoder, QualityFilter, RejectReason};
use crate::header::StoreHeader;
use crate::index::{BlockIndex, Footer, IndexEntry};
use crate::shared::files::{OutputNames, STORE_SUFFIX};
use crate::source::{GenotypeSource, SourceError};
use crate::types::GenotypeLine;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error while writing the store: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("contig id {0} is not declared in the store header")]
    UnknownContig(u32),
    #[error(
        "variant on contig {contig} cannot join the open block of contig {block_contig}; flush first"
    )]
    ContigStraddle { block_contig: u32, contig: u32 },
    #[error(
        "input is not sorted: contig {contig} position {position} follows contig {prev_contig} position {prev_position}"
    )]
    Unsorted {
        contig: u32,
        position: u64,
        prev_contig: u32,
        prev_position: u64,
    },
}

/// Dropped variants, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectCounts {
    pub singleton: u64,
    pub low_maf: u64,
    pub low_hwe: u64,
}

impl RejectCounts {
    fn record(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::Singleton => self.singleton += 1,
            RejectReason::LowMaf => self.low_maf += 1,
            RejectReason::LowHwe => self.low_hwe += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.singleton + self.low_maf + self.low_hwe
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub blocks_written: u64,
    pub variants_written: u64,
    pub rejected: RejectCounts,
    pub largest_uncompressed: u64,
    pub bytes_written: u64,
}

pub struct ImportWriter<W: Write> {
    stream: W,
    /// Bytes written to `stream` so far.
    offset: u64,
    header: StoreHeader,
    encoder: GenotypeEncoder,
    compressor: BlockCompressor,
    buffers: BlockBuffers,
    frame: Vec<u8>,
    entry: IndexEntry,
    index: BlockIndex,
    flush_limit: usize,
    last_seen: Option<(u32, u64)>,
    summary: ImportSummary,
}

impl ImportWriter<BufWriter<File>> {
    /// Creates `<path>.gbk` (or `path` itself if it already carries the suffix).
    pub fn create(
        path: &Path,
        header: StoreHeader,
        settings: &ImportSettings,
    ) -> Result<(Self, PathBuf), ImportError> {
        let names = OutputNames::resolve(path, STORE_SUFFIX);
        let file = names.create()?;
        let target = names.target();
        info!("Writing genotype store to '{}'", target.display());
        Ok((Self::new(BufWriter::new(file), header, settings)?, target))
    }
}

impl<W: Write> ImportWriter<W> {
    /// Writes `header` to `stream` and prepares the first block.
    pub fn new(
        mut stream: W,
        header: StoreHeader,
        settings: &ImportSettings,
    ) -> Result<Self, ImportError> {
        let mut preamble = Vec::new();
        header.write_to(&mut preamble);
        stream.write_all(&preamble)?;

        let encoder = GenotypeEncoder::new(
            header.sample_count,
            QualityFilter {
                maf_min: settings.maf_min,
                hwe_min: settings.hwe_min,
            },
        );
        let flush_limit =
            settings.flush_limit_for(header.sample_count, encoder.bit_width().bytes());
        debug!(
            "Import of {} samples uses {} words and a {flush_limit}-byte block threshold",
            header.sample_count,
            encoder.bit_width()
        );

        Ok(Self {
            stream,
            offset: preamble.len() as u64,
            header,
            encoder,
            compressor: BlockCompressor::new(settings.compression_level),
            buffers: BlockBuffers::with_capacity(flush_limit.saturating_add(flush_limit / 4)),
            frame: Vec::new(),
            entry: IndexEntry::default(),
            index: BlockIndex::new(),
            flush_limit,
            last_seen: None,
            summary: ImportSummary::default(),
        })
    }

    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    pub fn flush_limit(&self) -> usize {
        self.flush_limit
    }

    pub fn staged_bytes(&self) -> usize {
        self.buffers.total_len()
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn summary(&self) -> ImportSummary {
        ImportSummary {
            bytes_written: self.offset,
            ..self.summary
        }
    }

    /// Encodes `line` into the open block. Returns whether the variant was kept.
    pub fn add(&mut self, line: &GenotypeLine) -> Result<bool, ImportError> {
        if line.contig_id as usize >= self.header.contigs.len() {
            return Err(ImportError::UnknownContig(line.contig_id));
        }
        if let Some((prev_contig, prev_position)) = self.last_seen {
            if (line.contig_id, line.position) < (prev_contig, prev_position) {
                return Err(ImportError::Unsorted {
                    contig: line.contig_id,
                    position: line.position,
                    prev_contig,
                    prev_position,
                });
            }
        }
        if !self.entry.is_empty() && self.entry.contig_id != line.contig_id {
            return Err(ImportError::ContigStraddle {
                block_contig: self.entry.contig_id,
                contig: line.contig_id,
            });
        }
        self.last_seen = Some((line.contig_id, line.position));

        match self.encoder.encode(line, &mut self.buffers)? {
            Encoded::Accepted(_) => {
                self.entry.extend(line.contig_id, line.position);
                Ok(true)
            }
            Encoded::Rejected(reason) => {
                self.summary.rejected.record(reason);
                Ok(false)
            }
        }
    }

    /// Adds `line`, closing the open block first if it belongs to another contig and
    /// afterwards if staging has grown past the flush limit.
    pub fn ingest(&mut self, line: &GenotypeLine) -> Result<bool, ImportError> {
        if !self.entry.is_empty() && self.entry.contig_id != line.contig_id {
            self.flush()?;
        }
        let accepted = self.add(line)?;
        if self.buffers.total_len() > self.flush_limit {
            self.flush()?;
        }
        Ok(accepted)
    }

    /// Compresses and appends the open block. Returns `false` if nothing was staged.
    pub fn flush(&mut self) -> Result<bool, ImportError> {
        if self.buffers.is_empty() {
            return Ok(false);
        }

        self.compressor
            .compress_into(&self.buffers.sections(), &mut self.frame)?;
        self.stream.write_all(&self.frame)?;

        let uncompressed = self.buffers.total_len() as u64;
        self.entry.byte_offset = self.offset;
        self.offset += self.frame.len() as u64;
        self.entry.byte_offset_end = self.offset;
        self.entry.uncompressed_size = uncompressed;
        self.entry.l_meta = self.buffers.meta.len() as u32;
        self.entry.l_rle = self.buffers.rle.len() as u32;
        self.entry.l_simple = self.buffers.simple.len() as u32;
        self.entry.l_complex = self.buffers.complex.len() as u32;

        self.summary.largest_uncompressed = self.summary.largest_uncompressed.max(uncompressed);
        self.summary.blocks_written += 1;
        self.summary.variants_written += u64::from(self.entry.n_variants);
        debug!(
            "Block {}: contig {} positions {}-{}, {} variants, {uncompressed} -> {} bytes",
            self.index.len(),
            self.entry.contig_id,
            self.entry.min_position,
            self.entry.max_position,
            self.entry.n_variants,
            self.frame.len()
        );

        self.index.push(self.entry);
        self.buffers.clear();
        self.entry.reset();
        Ok(true)
    }

    /// Flushes the last block, appends the index and footer, and returns the stream.
    pub fn finish_into_inner(mut self) -> Result<(ImportSummary, W), ImportError> {
        self.flush()?;

        let mut trailer = Vec::with_capacity(self.index.serialized_len() + crate::index::FOOTER_LEN);
        self.index.write_to(&mut trailer);
        Footer {
            index_offset: self.offset,
            index_len: self.index.serialized_len() as u64,
            n_blocks: self.index.len() as u64,
            n_variants: self.summary.variants_written,
            largest_uncompressed: self.summary.largest_uncompressed,
        }
        .write_to(&mut trailer);
        self.stream.write_all(&trailer)?;
        self.offset += trailer.len() as u64;
        self.stream.flush()?;

        let summary = self.summary();
        if summary.variants_written == 0 {
            warn!("No variants passed the filters; the store contains no blocks");
        }
        info!(
            "Wrote {} variants in {} blocks ({} rejected)",
            summary.variants_written,
            summary.blocks_written,
            summary.rejected.total()
        );
        Ok((summary, self.stream))
    }

    pub fn finish(self) -> Result<ImportSummary, ImportError> {
        self.finish_into_inner().map(|(summary, _)| summary)
    }
}

/// Drains `source` into `writer`. Returns the number of lines read.
pub fn import_source<S, W>(source: &mut S, writer: &mut ImportWriter<W>) -> Result<u64, ImportError>
where
    S: GenotypeSource + ?Sized,
    W: Write,
{
    let mut lines = 0u64;
    while let Some(line) = source.next_line()? {
        writer.ingest(&line)?;
        lines += 1;
        if lines % 100_000 == 0 {
            debug!("{lines} lines ingested");
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FOOTER_LEN;
    use crate::types::{AuxPayload, ContigDescriptor, Genotype, META_ENTRY_LEN};

    fn header(sample_count: u64) -> StoreHeader {
        StoreHeader::new(
            sample_count,
            vec![
                ContigDescriptor {
                    name: "chr1".into(),
                    length: 1_000_000,
                },
                ContigDescriptor {
                    name: "chr2".into(),
                    length: 1_000_000,
                },
            ],
        )
    }

    /// Ten samples, two runs: 41 meta + 2 RLE + 12 complex = 55 staged bytes.
    fn variant(contig_id: u32, position: u64) -> GenotypeLine {
        let mut genotypes = vec![Genotype::HomRef; 5];
        genotypes.extend([Genotype::Het; 5]);
        GenotypeLine {
            contig_id,
            position,
            aux: AuxPayload::default(),
            genotypes,
        }
    }

    fn settings(flush_limit: usize) -> ImportSettings {
        ImportSettings {
            flush_limit: Some(flush_limit),
            ..ImportSettings::default()
        }
    }

    #[test]
    fn flushing_empty_staging_is_a_no_op() {
        let mut writer = ImportWriter::new(Vec::new(), header(10), &settings(200)).unwrap();
        let before = writer.summary();
        assert!(!writer.flush().unwrap());
        assert_eq!(writer.summary(), before);
        assert_eq!(writer.stream.len() as u64, before.bytes_written);
        assert!(writer.index().is_empty());
    }

    #[test]
    fn blocks_close_on_threshold_and_contig_change() {
        let mut writer = ImportWriter::new(Vec::new(), header(10), &settings(200)).unwrap();
        for position in 0..10 {
            assert!(writer.ingest(&variant(0, position * 10)).unwrap());
            assert!(writer.staged_bytes() <= 200);
        }
        for position in 0..3 {
            writer.ingest(&variant(1, position)).unwrap();
        }
        let (summary, bytes) = writer.finish_into_inner().unwrap();

        let footer = Footer::read_from_tail(&bytes).unwrap();
        let index = BlockIndex::read_from(footer.index_bytes(&bytes).unwrap()).unwrap();
        index.validate().unwrap();

        let counts: Vec<u32> = index.entries().iter().map(|e| e.n_variants).collect();
        assert_eq!(counts, [4, 4, 2, 3]);
        let contigs: Vec<u32> = index.entries().iter().map(|e| e.contig_id).collect();
        assert_eq!(contigs, [0, 0, 0, 1]);
        assert_eq!(index.entries()[0].min_position, 0);
        assert_eq!(index.entries()[0].max_position, 30);
        assert_eq!(index.entries()[0].uncompressed_size, 4 * 55);
        assert_eq!(index.entries()[0].l_meta as usize, 4 * META_ENTRY_LEN);

        assert_eq!(summary.blocks_written, 4);
        assert_eq!(summary.variants_written, 13);
        assert_eq!(footer.n_variants, 13);
        assert_eq!(summary.largest_uncompressed, 220);
        assert_eq!(summary.bytes_written as usize, bytes.len());
        assert_eq!(
            footer.index_offset as usize + footer.index_len as usize + FOOTER_LEN,
            bytes.len()
        );
    }

    #[test]
    fn rejected_variants_are_counted_and_leave_no_entry() {
        let mut writer = ImportWriter::new(Vec::new(), header(10), &settings(10_000)).unwrap();
        let mut uniform = variant(0, 5);
        uniform.genotypes = vec![Genotype::HomAlt; 10];
        assert!(!writer.ingest(&uniform).unwrap());
        assert_eq!(writer.staged_bytes(), 0);
        assert!(!writer.flush().unwrap());

        assert!(writer.ingest(&variant(0, 6)).unwrap());
        let summary = writer.finish().unwrap();
        assert_eq!(summary.rejected.singleton, 1);
        assert_eq!(summary.variants_written, 1);
    }

    #[test]
    fn ordering_and_contig_violations_are_errors() {
        let mut writer = ImportWriter::new(Vec::new(), header(10), &settings(10_000)).unwrap();
        writer.add(&variant(0, 50)).unwrap();
        assert!(matches!(
            writer.add(&variant(0, 49)),
            Err(ImportError::Unsorted { position: 49, .. })
        ));
        assert!(matches!(
            writer.add(&variant(1, 1)),
            Err(ImportError::ContigStraddle {
                block_contig: 0,
                contig: 1
            })
        ));
        assert!(matches!(
            writer.add(&variant(7, 1)),
            Err(ImportError::UnknownContig(7))
        ));
        writer.flush().unwrap();
        assert!(writer.add(&variant(1, 1)).unwrap());
    }
}
