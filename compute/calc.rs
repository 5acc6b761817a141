// ========================================================================================
//
//                         THE PARALLEL PAIRWISE CALCULATION
//
// ========================================================================================
//
// The block-pair space is split by the load balancer; each work list runs on the rayon
// pool with its own sibling writer. Blocks are decoded lazily into per-variant run lists;
// a worker holds at most the row block and the partner block of its current pair.

use super::balancer::{BlockPair, LoadBalancer, WorkList};
use super::ld::LdHelper;
use crate::config::CalcSettings;
use crate::output::record::ResultPayload;
use crate::output::{OutputError, OutputHeader, OutputWriter, ResultSink, SortOrder};
use crate::reader::{StoreError, StoreReader};
use crate::types::{FormatError, MetaEntry, Run};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::io::IsTerminal;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalcError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("could not start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalcSummary {
    pub threads: usize,
    pub block_pairs: u64,
    pub variant_pairs: u64,
    /// Pairs at or above the r² floor.
    pub pairs_emitted: u64,
    /// Records written, mirrored records included.
    pub records: u64,
}

impl std::ops::AddAssign for CalcSummary {
    fn add_assign(&mut self, other: Self) {
        self.block_pairs += other.block_pairs;
        self.variant_pairs += other.variant_pairs;
        self.pairs_emitted += other.pairs_emitted;
    }
}

/// One variant of a decoded block.
struct DecodedVariant {
    meta: MetaEntry,
    runs: Vec<Run>,
}

type DecodedBlock = (usize, Vec<DecodedVariant>);

/// The decoded blocks of the pair being computed. Work lists are row-major, so the row
/// block changes once per row and only the partner is replaced in between.
#[derive(Default)]
struct BlockWindow {
    row: Option<DecodedBlock>,
    partner: Option<DecodedBlock>,
    decodes: usize,
}

impl BlockWindow {
    fn load<F>(
        &mut self,
        BlockPair { from, to }: BlockPair,
        mut decode: F,
    ) -> Result<(&[DecodedVariant], &[DecodedVariant]), CalcError>
    where
        F: FnMut(usize) -> Result<Vec<DecodedVariant>, CalcError>,
    {
        if !holds(&self.row, from) {
            self.row = None;
            let row = match self.partner.take_if(|(block, _)| *block == from) {
                Some(recycled) => recycled,
                None => {
                    self.decodes += 1;
                    (from, decode(from)?)
                }
            };
            self.row = Some(row);
        }
        if from != to && !holds(&self.partner, to) {
            self.partner = None;
            self.decodes += 1;
            self.partner = Some((to, decode(to)?));
        }

        let row = variants(&self.row);
        let partner = if from == to { row } else { variants(&self.partner) };
        Ok((row, partner))
    }
}

fn holds(slot: &Option<DecodedBlock>, block: usize) -> bool {
    slot.as_ref().is_some_and(|(held, _)| *held == block)
}

fn variants(slot: &Option<DecodedBlock>) -> &[DecodedVariant] {
    slot.as_ref().map_or(&[][..], |(_, decoded)| decoded.as_slice())
}

pub struct Calculator<'a> {
    store: &'a StoreReader,
    settings: CalcSettings,
    command: String,
}

impl<'a> Calculator<'a> {
    pub fn new(store: &'a StoreReader, settings: CalcSettings) -> Self {
        Self {
            store,
            settings,
            command: "genoblock calc".to_string(),
        }
    }

    /// Command line recorded in the output literals.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn output_header(&self) -> OutputHeader {
        let header = self.store.header();
        let mut literals = header.literals.trim_end_matches('\n').to_string();
        if !literals.is_empty() {
            literals.push('\n');
        }
        literals.push_str(&format!("##genoblock_calcCommand={}", self.command));
        OutputHeader {
            sample_count: header.sample_count,
            sort_order: SortOrder::Unsorted,
            contigs: header.contigs.clone(),
            literals,
            columns: LdHelper::COLUMNS.iter().map(|column| column.to_string()).collect(),
        }
    }

    /// Writes the header, computes every pair, folds the workers back into `writer` and
    /// finalizes it. The writer must already have a destination.
    pub fn run(&self, writer: &mut OutputWriter) -> Result<CalcSummary, CalcError> {
        let threads = self.settings.effective_threads();
        self.run_balanced(writer, &LoadBalancer::build(self.store.n_blocks(), threads))
    }

    /// As [`Calculator::run`], over the pairs among `blocks` only.
    pub fn run_blocks(
        &self,
        writer: &mut OutputWriter,
        blocks: &[usize],
    ) -> Result<CalcSummary, CalcError> {
        self.check_blocks(blocks.iter().copied())?;
        let threads = self.settings.effective_threads();
        self.run_balanced(writer, &LoadBalancer::from_blocks(blocks, threads))
    }

    /// As [`Calculator::run`], over the listed block pairs only.
    pub fn run_pairs(
        &self,
        writer: &mut OutputWriter,
        pairs: &[BlockPair],
    ) -> Result<CalcSummary, CalcError> {
        self.check_blocks(pairs.iter().flat_map(|pair| [pair.from, pair.to]))?;
        let threads = self.settings.effective_threads();
        self.run_balanced(writer, &LoadBalancer::from_pairs(pairs.iter().copied(), threads))
    }

    fn check_blocks(&self, blocks: impl IntoIterator<Item = usize>) -> Result<(), CalcError> {
        let n_blocks = self.store.n_blocks();
        match blocks.into_iter().find(|&block| block >= n_blocks) {
            Some(block) => Err(StoreError::NoSuchBlock { block, n_blocks }.into()),
            None => Ok(()),
        }
    }

    fn run_balanced(
        &self,
        writer: &mut OutputWriter,
        balancer: &LoadBalancer,
    ) -> Result<CalcSummary, CalcError> {
        let started = Instant::now();
        let threads = self.settings.effective_threads();
        info!(
            "Computing {} block pairs over {} blocks with {threads} threads.",
            balancer.total_pairs(),
            self.store.n_blocks()
        );

        writer.write_headers(&self.output_header())?;

        let mut workers: Vec<OutputWriter> = balancer.lists().iter().map(|_| writer.worker()).collect();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        let pb = create_progress_bar(balancer.total_pairs() as u64, "Block pairs");

        let partials = pool.install(|| {
            balancer
                .lists()
                .par_iter()
                .zip(workers.par_iter_mut())
                .map(|(list, worker)| {
                    let partial = self.process_list(list, worker, &pb)?;
                    worker.flush()?;
                    Ok(partial)
                })
                .collect::<Result<Vec<CalcSummary>, CalcError>>()
        })?;
        pb.finish_and_clear();

        let mut summary = CalcSummary {
            threads,
            ..CalcSummary::default()
        };
        for partial in partials {
            summary += partial;
        }
        for worker in &workers {
            *writer += worker;
        }
        writer.write_final()?;
        summary.records = writer.stats().records;

        if summary.pairs_emitted == 0 {
            warn!("No variant pair reached r² >= {}.", self.settings.r2_min);
        }
        info!(
            "Tested {} variant pairs, emitted {} ({} records) in {:.2?}.",
            summary.variant_pairs,
            summary.pairs_emitted,
            summary.records,
            started.elapsed()
        );
        Ok(summary)
    }

    fn process_list(
        &self,
        list: &WorkList,
        worker: &mut OutputWriter,
        pb: &ProgressBar,
    ) -> Result<CalcSummary, CalcError> {
        let mut window = BlockWindow::default();
        let mut summary = CalcSummary::default();

        for pair in list.iter() {
            let (left, right) = window.load(pair, |block| self.decode_block(block))?;
            let same_block = pair.from == pair.to;
            for (v, a) in left.iter().enumerate() {
                let partners = if same_block { &right[v + 1..] } else { &right[..] };
                for b in partners {
                    let same_contig = a.meta.contig_id == b.meta.contig_id;
                    let helper = LdHelper::compute(&a.runs, &b.runs, same_contig, same_block);
                    summary.variant_pairs += 1;
                    if helper.r2 >= self.settings.r2_min {
                        worker.add(&a.meta, &b.meta, &helper)?;
                        summary.pairs_emitted += 1;
                    }
                }
            }
            summary.block_pairs += 1;
            pb.inc(1);
        }
        debug!(
            "Work list of {} block pairs done; {} block decodes.",
            list.len(),
            window.decodes
        );
        Ok(summary)
    }

    fn decode_block(&self, block: usize) -> Result<Vec<DecodedVariant>, CalcError> {
        let decompressed = self.store.block(block)?;
        let mut iter = decompressed.iter(self.store.sample_count())?;
        let mut variants = Vec::with_capacity(iter.len());
        while iter.advance() {
            if let Some(meta) = iter.current_meta().copied() {
                variants.push(DecodedVariant {
                    meta,
                    runs: iter.runs(),
                });
            }
        }
        Ok(variants)
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}
