// ========================================================================================
//
//                       GENOBLOCK ENCODE / DECODE BENCHMARK
//
// ========================================================================================
//
// Measures the three hot paths of a run: encoding variants into block sections, walking
// a decompressed block back into runs, and the pairwise statistic over two run lists.
// Cohorts mix long-run variants (common in real panels) with noisy ones.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use genoblock::compute::LdHelper;
use genoblock::config::ImportSettings;
use genoblock::encoder::{BlockBuffers, GenotypeEncoder, QualityFilter};
use genoblock::header::StoreHeader;
use genoblock::import::ImportWriter;
use genoblock::reader::StoreReader;
use genoblock::types::{AuxPayload, ContigDescriptor, Genotype, GenotypeLine};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// --- Benchmark Tuning Parameters ---

/// Cohort sizes; they land on the 8-, 16- and 32-bit word widths.
const COHORTS: [u64; 3] = [200, 5_000, 70_000];
/// Variants encoded per iteration, roughly one block's worth.
const VARIANTS: usize = 100;
/// Probability that a long-run variant switches genotype at a given sample.
const SWITCH_RATE: f64 = 0.01;

fn variants(sample_count: u64, seed: u64) -> Vec<GenotypeLine> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..VARIANTS)
        .map(|at| {
            let clumpy = at % 2 == 0;
            let mut current = 0u8;
            let genotypes = (0..sample_count)
                .map(|sample| {
                    let code = if sample < 2 {
                        sample as u8 * 2
                    } else if clumpy {
                        if rng.gen_bool(SWITCH_RATE) {
                            current = rng.gen_range(0..3);
                        }
                        current
                    } else {
                        rng.gen_range(0..4)
                    };
                    Genotype::from_code(code)
                })
                .collect();
            GenotypeLine {
                contig_id: 0,
                position: 1_000 + at as u64,
                aux: AuxPayload::default(),
                genotypes,
            }
        })
        .collect()
}

fn store(sample_count: u64, lines: &[GenotypeLine]) -> StoreReader {
    let header = StoreHeader::new(
        sample_count,
        vec![ContigDescriptor {
            name: "chr1".into(),
            length: 1_000_000,
        }],
    );
    let settings = ImportSettings {
        flush_limit: Some(usize::MAX),
        ..ImportSettings::default()
    };
    let mut writer = ImportWriter::new(Vec::new(), header, &settings).expect("import writer");
    for line in lines {
        writer.ingest(line).expect("ingest");
    }
    let (_, bytes) = writer.finish_into_inner().expect("finish store");
    StoreReader::from_bytes(bytes).expect("open store")
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Encode block");
    for &samples in &COHORTS {
        let lines = variants(samples, 1);
        group.throughput(Throughput::Elements(samples * VARIANTS as u64));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &lines, |b, lines| {
            let mut encoder = GenotypeEncoder::new(samples, QualityFilter::default());
            let mut buffers = BlockBuffers::default();
            b.iter(|| {
                buffers.clear();
                for line in lines {
                    black_box(encoder.encode(line, &mut buffers).expect("encode"));
                }
                black_box(buffers.total_len())
            });
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Decode block");
    for &samples in &COHORTS {
        let reader = store(samples, &variants(samples, 2));
        group.throughput(Throughput::Elements(samples * VARIANTS as u64));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &reader, |b, reader| {
            b.iter(|| {
                let block = reader.block(0).expect("block");
                let mut iter = block.iter(reader.sample_count()).expect("iterator");
                let mut runs = 0usize;
                while iter.advance() {
                    runs += iter.runs().len();
                }
                black_box(runs)
            });
        });
    }
    group.finish();
}

fn bench_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pairwise statistic");
    for &samples in &COHORTS {
        let reader = store(samples, &variants(samples, 3));
        let block = reader.block(0).expect("block");
        let mut iter = block.iter(reader.sample_count()).expect("iterator");
        let mut all_runs = Vec::new();
        while iter.advance() {
            all_runs.push(iter.runs());
        }
        group.throughput(Throughput::Elements(samples));
        group.bench_with_input(BenchmarkId::new("long runs", samples), &all_runs, |b, runs| {
            b.iter(|| black_box(LdHelper::compute(&runs[0], &runs[2], true, true)));
        });
        group.bench_with_input(BenchmarkId::new("noisy", samples), &all_runs, |b, runs| {
            b.iter(|| black_box(LdHelper::compute(&runs[1], &runs[3], true, true)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_pair);
criterion_main!(benches);
