// ========================================================================================
//                      Lazy per-variant decoding of one decompressed block
// ========================================================================================

use crate::index::IndexEntry;
use crate::types::{
    AuxPayload, BitWidth, ByteReader, FormatError, Genotype, META_ENTRY_LEN, MetaEntry, Run,
};

/// Walks the variants of one decompressed block.
///
/// The block's four sections are borrowed slices of the decompressed payload; runs and codes
/// are read straight from them one word at a time.
pub struct BlockIterator<'a> {
    rle: &'a [u8],
    simple: &'a [u8],
    complex: &'a [u8],
    metas: Vec<MetaEntry>,
    width: BitWidth,
    sample_count: u64,
    /// Index of the current variant plus one; zero before the first `advance`.
    position: usize,
    /// Words consumed (RLE) or codes consumed (simple) of the current variant.
    cursor: usize,
}

impl<'a> BlockIterator<'a> {
    pub fn new(data: &'a [u8], entry: &IndexEntry, sample_count: u64) -> Result<Self, FormatError> {
        let lengths = [entry.l_meta, entry.l_rle, entry.l_simple, entry.l_complex]
            .map(|len| len as usize);
        let declared: usize = lengths.iter().sum();
        if declared != data.len() {
            return Err(FormatError::Corrupt(format!(
                "block sections declare {declared} bytes, block holds {}",
                data.len()
            )));
        }
        let mut reader = ByteReader::new(data);
        let meta = reader.take(lengths[0])?;
        let rle = reader.take(lengths[1])?;
        let simple = reader.take(lengths[2])?;
        let complex = reader.take(lengths[3])?;

        if meta.len() % META_ENTRY_LEN != 0 || meta.len() / META_ENTRY_LEN != entry.n_variants as usize {
            return Err(FormatError::Corrupt(format!(
                "meta section of {} bytes does not hold {} entries",
                meta.len(),
                entry.n_variants
            )));
        }

        let width = BitWidth::from_sample_count(sample_count);
        let metas = meta
            .chunks_exact(META_ENTRY_LEN)
            .map(MetaEntry::read_from)
            .collect::<Result<Vec<_>, _>>()?;

        let iterator = Self {
            rle,
            simple,
            complex,
            metas,
            width,
            sample_count,
            position: 0,
            cursor: 0,
        };
        for meta in &iterator.metas {
            iterator.check_variant(meta)?;
        }
        Ok(iterator)
    }

    fn check_variant(&self, meta: &MetaEntry) -> Result<(), FormatError> {
        let corrupt = |reason: String| {
            Err(FormatError::Corrupt(format!(
                "variant at position {}: {reason}",
                meta.position
            )))
        };
        let words = self.words_of(meta);
        let needed = meta.code_offset as usize + meta.n_runs as usize * self.width.bytes();
        if needed > words.len() {
            return corrupt(format!(
                "codes end at byte {needed}, section holds {}",
                words.len()
            ));
        }
        if meta.complex_offset as usize > self.complex.len() {
            return corrupt("auxiliary payload offset out of range".into());
        }
        if meta.is_rle() {
            let mut total = 0u64;
            for word in 0..meta.n_runs as usize {
                let run = Run::unpack(self.read_word(meta, word));
                if run.length == 0 {
                    return corrupt("zero-length run".into());
                }
                total += run.length;
            }
            if total != self.sample_count {
                return corrupt(format!(
                    "runs cover {total} samples, expected {}",
                    self.sample_count
                ));
            }
        } else {
            let expected = (self.sample_count as usize).div_ceil(self.width.codes_per_word());
            if meta.n_runs as usize != expected {
                return corrupt(format!(
                    "{} simple words, expected {expected}",
                    meta.n_runs
                ));
            }
        }
        Ok(())
    }

    #[inline]
    fn words_of(&self, meta: &MetaEntry) -> &'a [u8] {
        if meta.is_rle() { self.rle } else { self.simple }
    }

    #[inline]
    fn read_word(&self, meta: &MetaEntry, word: usize) -> u64 {
        let at = meta.code_offset as usize + word * self.width.bytes();
        self.width.read_word(&self.words_of(meta)[at..])
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn bit_width(&self) -> BitWidth {
        self.width
    }

    /// Moves to the next variant. Returns `false` once the block is exhausted.
    pub fn advance(&mut self) -> bool {
        if self.position >= self.metas.len() {
            self.position = self.metas.len() + 1;
            return false;
        }
        self.position += 1;
        self.cursor = 0;
        true
    }

    pub fn current_meta(&self) -> Option<&MetaEntry> {
        self.position.checked_sub(1).and_then(|at| self.metas.get(at))
    }

    fn current_or_panic(&self) -> MetaEntry {
        match self.current_meta() {
            Some(meta) => *meta,
            None => panic!("BlockIterator: no current variant; call advance() first"),
        }
    }

    /// The next run-length word of the current variant, `None` once all are consumed.
    ///
    /// # Panics
    /// If there is no current variant or it is simple-encoded.
    pub fn next_run(&mut self) -> Option<Run> {
        let meta = self.current_or_panic();
        assert!(
            meta.is_rle(),
            "next_run called on simple-encoded variant at position {}",
            meta.position
        );
        if self.cursor >= meta.n_runs as usize {
            return None;
        }
        let run = Run::unpack(self.read_word(&meta, self.cursor));
        self.cursor += 1;
        Some(run)
    }

    /// The next sample's call of a simple-encoded variant, `None` after the last sample.
    ///
    /// # Panics
    /// If there is no current variant or it is run-length encoded.
    pub fn next_simple_code(&mut self) -> Option<Genotype> {
        let meta = self.current_or_panic();
        assert!(
            !meta.is_rle(),
            "next_simple_code called on run-length encoded variant at position {}",
            meta.position
        );
        if self.cursor as u64 >= self.sample_count {
            return None;
        }
        let per_word = self.width.codes_per_word();
        let word = self.read_word(&meta, self.cursor / per_word);
        let code = (word >> (2 * (self.cursor % per_word))) & 0b11;
        self.cursor += 1;
        Some(Genotype::from_code(code as u8))
    }

    /// Identifier and alleles of the current variant.
    pub fn complex_meta(&self) -> Result<AuxPayload, FormatError> {
        let meta = self
            .current_meta()
            .ok_or_else(|| FormatError::Corrupt("no current variant".into()))?;
        let mut reader = ByteReader::new(&self.complex[meta.complex_offset as usize..]);
        Ok(AuxPayload {
            id: reader.string()?,
            ref_allele: reader.string()?,
            alt_allele: reader.string()?,
        })
    }

    /// The current variant as logical runs (split words re-joined, simple codes run-length
    /// collapsed). Does not move the cursor.
    pub fn runs(&self) -> Vec<Run> {
        let meta = self.current_or_panic();
        let mut runs: Vec<Run> = Vec::new();
        let mut push = |run: Run| match runs.last_mut() {
            Some(last) if last.genotype == run.genotype => last.length += run.length,
            _ => runs.push(run),
        };
        if meta.is_rle() {
            for word in 0..meta.n_runs as usize {
                push(Run::unpack(self.read_word(&meta, word)));
            }
        } else {
            let per_word = self.width.codes_per_word();
            for sample in 0..self.sample_count as usize {
                let word = self.read_word(&meta, sample / per_word);
                push(Run {
                    length: 1,
                    genotype: Genotype::from_code((word >> (2 * (sample % per_word))) as u8),
                });
            }
        }
        runs
    }

    /// Expands only the current variant into one call per sample.
    pub fn genotypes(&self) -> Vec<Genotype> {
        let mut calls = Vec::with_capacity(self.sample_count as usize);
        for run in self.runs() {
            calls.extend(std::iter::repeat_n(run.genotype, run.length as usize));
        }
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{BlockBuffers, Encoded, GenotypeEncoder, QualityFilter};
    use crate::types::GenotypeLine;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn stage(sample_count: u64, variants: &[Vec<Genotype>]) -> (Vec<u8>, IndexEntry, Vec<bool>) {
        let mut encoder = GenotypeEncoder::new(sample_count, QualityFilter::default());
        let mut buffers = BlockBuffers::default();
        let mut entry = IndexEntry::default();
        let mut accepted = Vec::new();
        for (i, genotypes) in variants.iter().enumerate() {
            let line = GenotypeLine {
                contig_id: 0,
                position: i as u64,
                aux: AuxPayload {
                    id: format!("v{i}"),
                    ref_allele: "A".into(),
                    alt_allele: "T".into(),
                },
                genotypes: genotypes.clone(),
            };
            let kept = matches!(encoder.encode(&line, &mut buffers).unwrap(), Encoded::Accepted(_));
            if kept {
                entry.extend(0, i as u64);
            }
            accepted.push(kept);
        }
        entry.l_meta = buffers.meta.len() as u32;
        entry.l_rle = buffers.rle.len() as u32;
        entry.l_simple = buffers.simple.len() as u32;
        entry.l_complex = buffers.complex.len() as u32;
        (buffers.sections().concat(), entry, accepted)
    }

    fn random_variants(rng: &mut StdRng, sample_count: usize, n: usize) -> Vec<Vec<Genotype>> {
        (0..n)
            .map(|v| {
                // Even variants are clumpy (RLE), odd ones noisy (simple).
                let switch = if v % 2 == 0 { 0.02 } else { 0.9 };
                let mut current = Genotype::HomRef;
                (0..sample_count)
                    .map(|_| {
                        if rng.gen_bool(switch) {
                            current = Genotype::from_code(rng.gen_range(0..4));
                        }
                        current
                    })
                    .collect()
            })
            .collect()
    }

    fn assert_round_trip(sample_count: usize, n_variants: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let variants = random_variants(&mut rng, sample_count, n_variants);
        let (data, entry, accepted) = stage(sample_count as u64, &variants);
        let mut iter = BlockIterator::new(&data, &entry, sample_count as u64).unwrap();

        let mut saw_rle = false;
        let mut saw_simple = false;
        for (i, original) in variants.iter().enumerate().filter(|(i, _)| accepted[*i]) {
            assert!(iter.advance());
            let meta = *iter.current_meta().unwrap();
            assert_eq!(meta.position, i as u64);
            assert_eq!(&iter.genotypes(), original);
            assert_eq!(iter.complex_meta().unwrap().id, format!("v{i}"));

            let mut decoded = Vec::new();
            if meta.is_rle() {
                saw_rle = true;
                while let Some(run) = iter.next_run() {
                    decoded.extend(std::iter::repeat_n(run.genotype, run.length as usize));
                }
            } else {
                saw_simple = true;
                while let Some(code) = iter.next_simple_code() {
                    decoded.push(code);
                }
            }
            assert_eq!(&decoded, original);
        }
        assert!(!iter.advance());
        assert!(iter.current_meta().is_none());
        assert!(saw_rle && saw_simple);
    }

    #[test]
    fn eight_bit_blocks_round_trip() {
        assert_round_trip(100, 24, 7);
    }

    #[test]
    fn sixteen_bit_blocks_round_trip() {
        assert_round_trip(1_000, 24, 11);
    }

    #[test]
    fn thirty_two_bit_blocks_round_trip() {
        assert_eq!(BitWidth::from_sample_count(65_535), BitWidth::W32);
        assert_round_trip(65_535, 4, 13);
    }

    // A cohort wide enough for 64-bit words (over four billion samples) cannot be staged in
    // a test, so that width is only exercised word by word.
    #[test]
    fn wide_words_round_trip_at_the_word_level() {
        for width in [BitWidth::W32, BitWidth::W64] {
            let run = Run {
                length: width.max_run_length(),
                genotype: Genotype::Missing,
            };
            let mut buf = Vec::new();
            width.write_word(&mut buf, run.pack());
            assert_eq!(buf.len(), width.bytes());
            assert_eq!(Run::unpack(width.read_word(&buf)), run);

            let codes: u64 = (0..width.codes_per_word() as u64)
                .fold(0, |word, slot| word | ((slot % 4) << (2 * slot)));
            let mut buf = Vec::new();
            width.write_word(&mut buf, codes);
            assert_eq!(width.read_word(&buf), codes);
        }
    }

    #[test]
    fn split_runs_are_rejoined() {
        let mut calls = vec![Genotype::HomRef; 150];
        calls.extend([Genotype::HomAlt; 50]);
        let (data, entry, _) = stage(200, &[calls.clone()]);
        let mut iter = BlockIterator::new(&data, &entry, 200).unwrap();
        assert!(iter.advance());
        assert_eq!(
            iter.runs(),
            [
                Run {
                    length: 150,
                    genotype: Genotype::HomRef
                },
                Run {
                    length: 50,
                    genotype: Genotype::HomAlt
                }
            ]
        );
        let words: Vec<u64> = std::iter::from_fn(|| iter.next_run().map(|run| run.length)).collect();
        assert_eq!(words, [63, 63, 24, 50]);
        assert_eq!(iter.genotypes(), calls);
    }

    #[test]
    #[should_panic(expected = "next_simple_code called on run-length encoded variant")]
    fn asking_for_the_wrong_encoding_panics() {
        let mut calls = vec![Genotype::HomRef; 20];
        calls[19] = Genotype::Het;
        let (data, entry, _) = stage(20, &[calls]);
        let mut iter = BlockIterator::new(&data, &entry, 20).unwrap();
        iter.advance();
        iter.next_simple_code();
    }

    #[test]
    fn inconsistent_blocks_are_refused() {
        let calls: Vec<Genotype> = (0..20).map(|i| Genotype::from_code((i % 3) as u8)).collect();
        let (data, entry, _) = stage(20, &[calls]);

        assert!(BlockIterator::new(&data[..data.len() - 1], &entry, 20).is_err());
        // Same bytes read as a different cohort size: the words no longer cover it.
        assert!(BlockIterator::new(&data, &entry, 21).is_err());
        let mut wrong = entry;
        wrong.n_variants = 2;
        assert!(BlockIterator::new(&data, &wrong, 20).is_err());
    }
}
