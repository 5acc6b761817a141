// ========================================================================================
//
//                           THE GENOTYPE ENCODER
//
// ========================================================================================
//
// Converts one variant's per-sample calls into either run-length words or packed
// "simple" words, whichever is not larger, and appends the result to the staging
// buffers of the block under construction. Summary statistics (MAF, HWE p-value) are
// accumulated during the same pass over the calls and stored in the variant's meta entry.

use crate::hwe::GenotypeCounts;
use crate::types::{
    BitWidth, GenotypeLine, META_FLAG_HAS_MISSING, META_FLAG_RLE, MetaEntry, Run, put_string,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("variant at position {position} has {found} genotype calls, expected {expected}")]
    SampleCountMismatch {
        position: u64,
        found: usize,
        expected: u64,
    },
    #[error("block section grew past the addressable 4 GiB limit")]
    SectionOverflow,
}

/// Per-variant quality floors. A variant strictly below either floor is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityFilter {
    pub maf_min: f64,
    pub hwe_min: f64,
}

/// Why a variant was dropped from the block. Rejections are expected, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The calls collapse to a single run (monomorphic or entirely missing).
    Singleton,
    LowMaf,
    LowHwe,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Singleton => "single run",
            Self::LowMaf => "MAF below floor",
            Self::LowHwe => "HWE p-value below floor",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoded {
    Accepted(MetaEntry),
    Rejected(RejectReason),
}

/// Buffer lengths captured before an encode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMark {
    meta: usize,
    rle: usize,
    simple: usize,
    complex: usize,
}

/// The four staging sections of the block under construction, in on-disk order.
#[derive(Debug, Default)]
pub struct BlockBuffers {
    pub meta: Vec<u8>,
    pub rle: Vec<u8>,
    pub simple: Vec<u8>,
    pub complex: Vec<u8>,
}

impl BlockBuffers {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            meta: Vec::with_capacity(capacity / 8),
            rle: Vec::with_capacity(capacity),
            simple: Vec::with_capacity(capacity / 4),
            complex: Vec::with_capacity(capacity / 8),
        }
    }

    pub fn mark(&self) -> BufferMark {
        BufferMark {
            meta: self.meta.len(),
            rle: self.rle.len(),
            simple: self.simple.len(),
            complex: self.complex.len(),
        }
    }

    /// Restores every section to the length captured in `mark`.
    pub fn rollback(&mut self, mark: BufferMark) {
        self.meta.truncate(mark.meta);
        self.rle.truncate(mark.rle);
        self.simple.truncate(mark.simple);
        self.complex.truncate(mark.complex);
    }

    pub fn total_len(&self) -> usize {
        self.meta.len() + self.rle.len() + self.simple.len() + self.complex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    pub fn clear(&mut self) {
        self.meta.clear();
        self.rle.clear();
        self.simple.clear();
        self.complex.clear();
    }

    pub fn sections(&self) -> [&[u8]; 4] {
        [&self.meta, &self.rle, &self.simple, &self.complex]
    }
}

pub struct GenotypeEncoder {
    sample_count: u64,
    width: BitWidth,
    filter: QualityFilter,
    runs: Vec<Run>,
}

impl GenotypeEncoder {
    pub fn new(sample_count: u64, filter: QualityFilter) -> Self {
        Self {
            sample_count,
            width: BitWidth::from_sample_count(sample_count),
            filter,
            runs: Vec::new(),
        }
    }

    #[inline]
    pub fn bit_width(&self) -> BitWidth {
        self.width
    }

    #[inline]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Encodes `line` into `buffers`.
    ///
    /// On rejection or error the buffers are left exactly as long as they were before the call.
    pub fn encode(
        &mut self,
        line: &GenotypeLine,
        buffers: &mut BlockBuffers,
    ) -> Result<Encoded, EncodeError> {
        if line.genotypes.len() as u64 != self.sample_count {
            return Err(EncodeError::SampleCountMismatch {
                position: line.position,
                found: line.genotypes.len(),
                expected: self.sample_count,
            });
        }

        // Single pass: logical runs and genotype tallies together.
        self.runs.clear();
        let mut counts = GenotypeCounts::default();
        for &genotype in &line.genotypes {
            match genotype.alt_dosage() {
                Some(0) => counts.hom_ref += 1,
                Some(1) => counts.het += 1,
                Some(_) => counts.hom_alt += 1,
                None => counts.missing += 1,
            }
            match self.runs.last_mut() {
                Some(run) if run.genotype == genotype => run.length += 1,
                _ => self.runs.push(Run {
                    length: 1,
                    genotype,
                }),
            }
        }

        if self.runs.len() <= 1 {
            return Ok(Encoded::Rejected(RejectReason::Singleton));
        }
        let maf = counts.minor_allele_frequency();
        if maf < self.filter.maf_min {
            return Ok(Encoded::Rejected(RejectReason::LowMaf));
        }
        let hwe_p = counts.hwe_p();
        if hwe_p < self.filter.hwe_min {
            return Ok(Encoded::Rejected(RejectReason::LowHwe));
        }

        let mark = buffers.mark();
        match self.write_variant(line, maf, hwe_p, counts.missing > 0, buffers) {
            Ok(meta) => Ok(Encoded::Accepted(meta)),
            Err(err) => {
                buffers.rollback(mark);
                Err(err)
            }
        }
    }

    fn write_variant(
        &self,
        line: &GenotypeLine,
        maf: f64,
        hwe_p: f64,
        has_missing: bool,
        buffers: &mut BlockBuffers,
    ) -> Result<MetaEntry, EncodeError> {
        let word_bytes = self.width.bytes();
        let max_run = self.width.max_run_length();
        let rle_words: usize = self
            .runs
            .iter()
            .map(|run| run.length.div_ceil(max_run) as usize)
            .sum();
        let simple_words = line.genotypes.len().div_ceil(self.width.codes_per_word());

        let mut flags = if has_missing { META_FLAG_HAS_MISSING } else { 0 };
        let (n_runs, code_offset) = if rle_words * word_bytes <= simple_words * word_bytes {
            flags |= META_FLAG_RLE;
            let offset = section_offset(&buffers.rle)?;
            for run in &self.runs {
                let mut remaining = run.length;
                while remaining > 0 {
                    let length = remaining.min(max_run);
                    let word = Run {
                        length,
                        genotype: run.genotype,
                    }
                    .pack();
                    self.width.write_word(&mut buffers.rle, word);
                    remaining -= length;
                }
            }
            (rle_words, offset)
        } else {
            let offset = section_offset(&buffers.simple)?;
            for chunk in line.genotypes.chunks(self.width.codes_per_word()) {
                let word = chunk
                    .iter()
                    .enumerate()
                    .fold(0u64, |word, (slot, genotype)| {
                        word | (u64::from(genotype.code()) << (2 * slot))
                    });
                self.width.write_word(&mut buffers.simple, word);
            }
            (simple_words, offset)
        };

        let complex_offset = section_offset(&buffers.complex)?;
        put_string(&mut buffers.complex, &line.aux.id);
        put_string(&mut buffers.complex, &line.aux.ref_allele);
        put_string(&mut buffers.complex, &line.aux.alt_allele);

        let meta = MetaEntry {
            flags,
            contig_id: line.contig_id,
            position: line.position,
            maf,
            hwe_p,
            n_runs: u32::try_from(n_runs).map_err(|_| EncodeError::SectionOverflow)?,
            code_offset,
            complex_offset,
        };
        meta.write_to(&mut buffers.meta);
        Ok(meta)
    }
}

fn section_offset(section: &[u8]) -> Result<u32, EncodeError> {
    u32::try_from(section.len()).map_err(|_| EncodeError::SectionOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuxPayload, Genotype, META_ENTRY_LEN};

    fn line(codes: &[u8]) -> GenotypeLine {
        GenotypeLine {
            contig_id: 0,
            position: 100,
            aux: AuxPayload {
                id: "rs1".into(),
                ref_allele: "A".into(),
                alt_allele: "G".into(),
            },
            genotypes: codes.iter().map(|&code| Genotype::from_code(code)).collect(),
        }
    }

    #[test]
    fn three_runs_are_run_length_encoded() {
        let mut encoder = GenotypeEncoder::new(9, QualityFilter::default());
        let mut buffers = BlockBuffers::default();
        let outcome = encoder
            .encode(&line(&[0, 0, 0, 1, 1, 2, 2, 2, 2]), &mut buffers)
            .unwrap();

        let meta = match outcome {
            Encoded::Accepted(meta) => meta,
            Encoded::Rejected(reason) => panic!("unexpected rejection: {reason}"),
        };
        assert!(meta.is_rle());
        assert_eq!(meta.n_runs, 3);
        assert_eq!(buffers.rle.len(), 3);
        assert_eq!(buffers.meta.len(), META_ENTRY_LEN);
        let total: u64 = buffers
            .rle
            .iter()
            .map(|&word| Run::unpack(u64::from(word)).length)
            .sum();
        assert_eq!(total, 9);
        assert!((meta.maf - 8.0 / 18.0).abs() < 1e-12);
    }

    #[test]
    fn monomorphic_variant_is_rejected_without_residue() {
        let mut encoder = GenotypeEncoder::new(6, QualityFilter::default());
        let mut buffers = BlockBuffers::default();
        encoder
            .encode(&line(&[0, 1, 0, 1, 0, 1]), &mut buffers)
            .unwrap();
        let before = buffers.mark();

        let outcome = encoder.encode(&line(&[0; 6]), &mut buffers).unwrap();
        assert_eq!(outcome, Encoded::Rejected(RejectReason::Singleton));
        assert_eq!(buffers.mark(), before);
    }

    #[test]
    fn maf_and_hwe_floors_reject() {
        let filter = QualityFilter {
            maf_min: 0.2,
            hwe_min: 0.0,
        };
        let mut encoder = GenotypeEncoder::new(10, filter);
        let mut buffers = BlockBuffers::default();
        let outcome = encoder
            .encode(&line(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 1]), &mut buffers)
            .unwrap();
        assert_eq!(outcome, Encoded::Rejected(RejectReason::LowMaf));

        let filter = QualityFilter {
            maf_min: 0.0,
            hwe_min: 0.05,
        };
        let mut encoder = GenotypeEncoder::new(20, filter);
        let codes: Vec<u8> = (0..20).map(|i| if i < 10 { 0 } else { 2 }).collect();
        let outcome = encoder.encode(&line(&codes), &mut buffers).unwrap();
        assert_eq!(outcome, Encoded::Rejected(RejectReason::LowHwe));
        assert!(buffers.is_empty());
    }

    #[test]
    fn alternating_calls_fall_back_to_simple_words() {
        let mut encoder = GenotypeEncoder::new(8, QualityFilter::default());
        let mut buffers = BlockBuffers::default();
        let codes = [0, 1, 0, 1, 0, 1, 0, 1];
        let outcome = encoder.encode(&line(&codes), &mut buffers).unwrap();
        let meta = match outcome {
            Encoded::Accepted(meta) => meta,
            Encoded::Rejected(reason) => panic!("unexpected rejection: {reason}"),
        };
        assert!(!meta.is_rle());
        assert_eq!(meta.n_runs, 2);
        assert_eq!(buffers.simple, vec![0b0100_0100, 0b0100_0100]);
        assert!(buffers.rle.is_empty());
    }

    #[test]
    fn long_runs_are_split_to_fit_the_word() {
        let mut encoder = GenotypeEncoder::new(200, QualityFilter::default());
        let mut buffers = BlockBuffers::default();
        let mut codes = vec![0u8; 150];
        codes.extend(std::iter::repeat_n(1u8, 50));
        let outcome = encoder.encode(&line(&codes), &mut buffers).unwrap();
        let meta = match outcome {
            Encoded::Accepted(meta) => meta,
            Encoded::Rejected(reason) => panic!("unexpected rejection: {reason}"),
        };
        // 150 = 63 + 63 + 24, then 50.
        assert_eq!(meta.n_runs, 4);
        assert_eq!(buffers.rle.len(), 4);
    }

    #[test]
    fn wrong_sample_count_is_an_error_and_leaves_buffers_alone() {
        let mut encoder = GenotypeEncoder::new(4, QualityFilter::default());
        let mut buffers = BlockBuffers::default();
        let err = encoder.encode(&line(&[0, 1, 2]), &mut buffers).unwrap_err();
        assert!(matches!(err, EncodeError::SampleCountMismatch { found: 3, .. }));
        assert_eq!(buffers.total_len(), 0);
    }
}
