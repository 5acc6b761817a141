#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use flate2::read::MultiGzDecoder;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use genoblock::compute::{BlockPair, Calculator};
use genoblock::config::Settings;
use genoblock::import::{ImportWriter, import_source};
use genoblock::output::{OutputWriter, ResultSink, WriterSettings};
use genoblock::reader::StoreReader;
use genoblock::source::{GenotypeSource, TableSource};

#[derive(Parser)]
#[command(
    name = "genoblock",
    about = "Block-compressed genotype store and parallel pairwise statistics",
    long_about = "Imports genotype tables into a randomly-seekable, block-compressed store and \
                  computes pairwise genotype association over every variant pair."
)]
struct Cli {
    /// Only log warnings and errors
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a genotype table into a store
    Import(ImportArgs),
    /// Compute pairwise statistics over every variant pair of a store
    Calc(CalcArgs),
    /// Print the block directory of a store
    Index {
        /// Path to the store
        store: PathBuf,
    },
}

#[derive(Args)]
struct ImportArgs {
    /// Genotype table, optionally gzip-compressed (`.gz`)
    table: PathBuf,

    /// Output store; `.gbk` is appended unless present
    #[arg(short, long)]
    output: PathBuf,

    /// Minimum minor allele frequency
    #[arg(long)]
    maf: Option<f64>,

    /// Minimum Hardy-Weinberg exact test p-value
    #[arg(long)]
    hwe: Option<f64>,

    /// TOML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct CalcArgs {
    /// Path to the store
    store: PathBuf,

    /// Output file (`.gbo` appended for binary files) or `-` for stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write uncompressed binary records with no index or trailer
    #[arg(long, conflicts_with = "text")]
    binary_stream: bool,

    /// Write tab-separated text even to a file
    #[arg(long)]
    text: bool,

    /// Worker threads (0 = all logical CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// Only emit the (a, b) record of every pair
    #[arg(long)]
    upper_only: bool,

    /// Minimum r² for a pair to be written
    #[arg(long)]
    r2_min: Option<f64>,

    /// Only pair these blocks with each other (comma-separated block numbers)
    #[arg(long, value_delimiter = ',', conflicts_with = "pairs")]
    blocks: Vec<usize>,

    /// Only compute these block pairs (comma-separated `FROM:TO`)
    #[arg(long, value_delimiter = ',', value_parser = parse_block_pair)]
    pairs: Vec<BlockPair>,

    /// TOML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_block_pair(arg: &str) -> Result<BlockPair, String> {
    let (from, to) = arg
        .split_once(':')
        .ok_or_else(|| format!("'{arg}' is not a FROM:TO block pair"))?;
    let block = |text: &str| {
        text.trim()
            .parse::<usize>()
            .map_err(|e| format!("bad block number '{text}': {e}"))
    };
    Ok(BlockPair {
        from: block(from)?,
        to: block(to)?,
    })
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let result = match cli.command {
        Some(Commands::Import(args)) => run_import(args),
        Some(Commands::Calc(args)) => run_calc(args),
        Some(Commands::Index { store }) => run_index(&store),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        log::error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

fn load_settings(config: Option<&Path>) -> Result<Settings, Box<dyn Error>> {
    Ok(match config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    })
}

fn open_table(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let gzipped = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("gz"));
    Ok(if gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

fn run_import(args: ImportArgs) -> Result<(), Box<dyn Error>> {
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(maf) = args.maf {
        settings.import.maf_min = maf;
    }
    if let Some(hwe) = args.hwe {
        settings.import.hwe_min = hwe;
    }
    settings.validate()?;

    let mut source = TableSource::new(open_table(&args.table)?)?;
    let mut header = source.header().clone();
    header.add_provenance(&command_line());

    let (mut writer, target) = ImportWriter::create(&args.output, header, &settings.import)?;
    let lines = import_source(&mut source, &mut writer)?;
    let summary = writer.finish()?;

    log::info!(
        "Read {lines} variants; wrote {} in {} blocks to '{}' ({} bytes).",
        summary.variants_written,
        summary.blocks_written,
        target.display(),
        summary.bytes_written
    );
    log::info!(
        "Rejected {} variants: {} single-run, {} below MAF floor, {} below HWE floor.",
        summary.rejected.total(),
        summary.rejected.singleton,
        summary.rejected.low_maf,
        summary.rejected.low_hwe
    );
    Ok(())
}

fn run_calc(args: CalcArgs) -> Result<(), Box<dyn Error>> {
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(threads) = args.threads {
        settings.calc.threads = threads;
    }
    if let Some(r2_min) = args.r2_min {
        settings.calc.r2_min = r2_min;
    }
    settings.calc.upper_only |= args.upper_only;
    settings.validate()?;

    let store = StoreReader::open(&args.store)?;
    let writer_settings = WriterSettings::from(&settings.calc);
    let to_stdout = args
        .output
        .as_deref()
        .is_none_or(|path| path == Path::new("-"));

    let mut writer = if args.text || (to_stdout && !args.binary_stream) {
        OutputWriter::text(writer_settings)
    } else if args.binary_stream {
        OutputWriter::binary_stream(writer_settings)
    } else {
        OutputWriter::binary_file(writer_settings)
    };
    match args.output.as_deref() {
        Some(path) if !to_stdout => writer.open_path(path)?,
        _ => writer.open()?,
    }

    let calculator = Calculator::new(&store, settings.calc).with_command(command_line());
    if !args.pairs.is_empty() {
        calculator.run_pairs(&mut writer, &args.pairs)?;
    } else if !args.blocks.is_empty() {
        calculator.run_blocks(&mut writer, &args.blocks)?;
    } else {
        calculator.run(&mut writer)?;
    }
    Ok(())
}

fn run_index(path: &Path) -> Result<(), Box<dyn Error>> {
    let store = StoreReader::open(path)?;
    let header = store.header();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    writeln!(
        out,
        "# samples={} width={} blocks={} variants={} largest_block={}",
        header.sample_count,
        store.bit_width(),
        store.n_blocks(),
        store.footer().n_variants,
        store.footer().largest_uncompressed
    )?;
    writeln!(
        out,
        "BLOCK\tCHROM\tFROM\tTO\tVARIANTS\tOFFSET\tCOMPRESSED\tUNCOMPRESSED"
    )?;
    for (block, entry) in store.index().entries().iter().enumerate() {
        let contig = header.contig_name(entry.contig_id).unwrap_or("?");
        writeln!(
            out,
            "{block}\t{contig}\t{}\t{}\t{}\t{}\t{}\t{}",
            entry.min_position,
            entry.max_position,
            entry.n_variants,
            entry.byte_offset,
            entry.compressed_size(),
            entry.uncompressed_size
        )?;
    }
    out.flush()?;
    Ok(())
}
