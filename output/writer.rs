// ========================================================================================
//
//                              THE RESULT WRITER FAMILY
//
// ========================================================================================
//
// Every worker owns an `OutputWriter` obtained from `worker()`. Siblings share the sink
// stream, its counters and output index, and one spin lock; each keeps a private staging
// buffer and index entry. The lock is held only while a staged buffer is written out.

use super::format::{OutputHeader, SortOrder};
use super::record::{DecodedRecord, ResultContainer, ResultPayload, ResultRecord, parse_records};
use super::spin_lock::SpinLock;
use crate::compressor::{BlockCompressor, FrameError, FrameHeader, decompress};
use crate::config::CalcSettings;
use crate::index::{BlockIndex, Footer, IndexEntry};
use crate::shared::files::{OUTPUT_SUFFIX, OutputNames};
use crate::types::{FormatError, MetaEntry};
use itertools::Itertools;
use log::{debug, error, info};
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::ops::AddAssign;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error while writing results: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("the output sink has no destination; open it first")]
    NotOpen,
    #[error("records reached the output before its header was written")]
    MissingHeader,
    #[error("the output has already been finalized")]
    Finalized,
}

/// A seekable byte sink, required by the binary file format's patched header.
pub trait SeekWrite: Write + Seek + Send {}

impl<T: Write + Seek + Send> SeekWrite for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSettings {
    /// Staged bytes that trigger a flush.
    pub flush_limit: usize,
    /// Emit only the (a, b) record of a pair.
    pub upper_only: bool,
    pub compression_level: u32,
    /// Ordering the producer promises; stamped into the header.
    pub sort_order: SortOrder,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self::from(&CalcSettings::default())
    }
}

impl From<&CalcSettings> for WriterSettings {
    fn from(settings: &CalcSettings) -> Self {
        Self {
            flush_limit: settings.flush_limit.max(1),
            upper_only: settings.upper_only,
            compression_level: settings.compression_level,
            sort_order: SortOrder::Unsorted,
        }
    }
}

/// Counters of one writer: its own record count plus the totals of the shared sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub records: u64,
    pub blocks: u64,
    pub bytes_added: u64,
    pub bytes_written: u64,
}

// --- Shared and private writer state ---

struct SinkState<S> {
    stream: Option<S>,
    offset: u64,
    header_written: bool,
    finalized: bool,
    index: BlockIndex,
    records: u64,
    blocks: u64,
    bytes_added: u64,
    bytes_written: u64,
    largest_uncompressed: u64,
}

impl<S> SinkState<S> {
    /// The stream, once it may take blocks.
    fn writable(&mut self) -> Result<&mut S, OutputError> {
        if self.finalized {
            return Err(OutputError::Finalized);
        }
        if !self.header_written {
            return Err(OutputError::MissingHeader);
        }
        self.stream.as_mut().ok_or(OutputError::NotOpen)
    }
}

#[derive(Clone, Copy)]
enum Framing {
    Compressed(BlockCompressor),
    Verbatim,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Binary,
    Text,
}

struct WriterCore<S> {
    shared: Arc<SpinLock<SinkState<S>>>,
    contig_names: Arc<OnceLock<Vec<String>>>,
    buffer: Vec<u8>,
    frame: Vec<u8>,
    entry: IndexEntry,
    /// Records staged since the last flush, including bulk appends.
    pending: u64,
    n_entries: u64,
    settings: WriterSettings,
    framing: Framing,
    encoding: Encoding,
}

impl<S: Write> WriterCore<S> {
    fn new(stream: Option<S>, settings: WriterSettings, framing: Framing, encoding: Encoding) -> Self {
        Self {
            shared: Arc::new(SpinLock::new(SinkState {
                stream,
                offset: 0,
                header_written: false,
                finalized: false,
                index: BlockIndex::new(),
                records: 0,
                blocks: 0,
                bytes_added: 0,
                bytes_written: 0,
                largest_uncompressed: 0,
            })),
            contig_names: Arc::new(OnceLock::new()),
            buffer: Vec::new(),
            frame: Vec::new(),
            entry: IndexEntry::default(),
            pending: 0,
            n_entries: 0,
            settings,
            framing,
            encoding,
        }
    }

    fn worker(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            contig_names: Arc::clone(&self.contig_names),
            buffer: Vec::with_capacity(self.settings.flush_limit),
            frame: Vec::new(),
            entry: IndexEntry::default(),
            pending: 0,
            n_entries: 0,
            settings: self.settings,
            framing: self.framing,
            encoding: self.encoding,
        }
    }

    fn is_open(&self) -> bool {
        self.shared.lock().stream.is_some()
    }

    fn install(&self, stream: S) {
        let mut state = self.shared.lock();
        if state.stream.is_none() {
            state.stream = Some(stream);
        }
    }

    /// Writes `preamble` as the header unless a sibling already did.
    fn write_preamble(&self, header: &OutputHeader, preamble: &[u8]) -> Result<(), OutputError> {
        let mut state = self.shared.lock();
        if state.header_written {
            return Ok(());
        }
        let stream = state.stream.as_mut().ok_or(OutputError::NotOpen)?;
        stream.write_all(preamble)?;
        state.offset = preamble.len() as u64;
        state.header_written = true;
        let _ = self.contig_names.set(header.contig_names());
        Ok(())
    }

    fn stage<P: ResultPayload>(&mut self, record: &ResultRecord<'_, P>) -> Result<(), OutputError> {
        match self.encoding {
            Encoding::Binary => record.write_binary(&mut self.buffer)?,
            Encoding::Text => {
                let names = self.contig_names.get().ok_or(OutputError::MissingHeader)?;
                record.write_text(&mut self.buffer, names);
            }
        }
        self.pending += 1;
        self.n_entries += 1;
        Ok(())
    }

    /// The header as this writer stamps it.
    fn stamped(&self, header: &OutputHeader) -> OutputHeader {
        OutputHeader {
            sort_order: self.settings.sort_order,
            ..header.clone()
        }
    }

    /// Flushes when a record of another contig is about to be staged.
    fn roll_contig(&mut self, contig_id: u32) -> Result<(), OutputError> {
        if !self.entry.is_empty() && self.entry.contig_id != contig_id {
            self.flush()?;
        }
        Ok(())
    }

    fn check_threshold(&mut self) -> Result<(), OutputError> {
        if self.buffer.len() >= self.settings.flush_limit {
            self.flush()?;
        }
        Ok(())
    }

    fn add<P: ResultPayload>(
        &mut self,
        meta_a: &MetaEntry,
        meta_b: &MetaEntry,
        payload: &P,
    ) -> Result<(), OutputError> {
        let record = ResultRecord {
            contig_a: meta_a.contig_id,
            position_a: meta_a.position,
            contig_b: meta_b.contig_id,
            position_b: meta_b.position,
            payload,
        };
        self.roll_contig(record.contig_a)?;
        self.stage(&record)?;
        self.entry.extend_range(record.contig_a, record.position_a);
        if !self.settings.upper_only {
            self.stage(&record.mirrored())?;
            self.entry.n_variants += 1;
        }
        self.check_threshold()
    }

    fn append_record<P: ResultPayload>(
        &mut self,
        record: &ResultRecord<'_, P>,
    ) -> Result<(), OutputError> {
        self.roll_contig(record.contig_a)?;
        self.stage(record)?;
        self.entry.extend_range(record.contig_a, record.position_a);
        self.check_threshold()
    }

    fn append_bytes(&mut self, bytes: &[u8], n_records: u64) -> Result<(), OutputError> {
        self.buffer.extend_from_slice(bytes);
        self.pending += n_records;
        self.n_entries += n_records;
        self.check_threshold()
    }

    /// Compresses the staged buffer into `frame` when the sink writes frames.
    fn prepare(&mut self) -> Result<(), OutputError> {
        if let Framing::Compressed(compressor) = self.framing {
            compressor.compress_into(&[&self.buffer], &mut self.frame)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<bool, OutputError> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        self.prepare()?;
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        self.write_locked(&mut state)?;
        Ok(true)
    }

    /// The critical section: the caller holds the lock and `prepare` has run.
    fn write_locked(&mut self, state: &mut SinkState<S>) -> Result<(), OutputError> {
        let stream = state.writable()?;
        let bytes = match self.framing {
            Framing::Compressed(_) => &self.frame,
            Framing::Verbatim => &self.buffer,
        };
        stream.write_all(bytes)?;

        let written = bytes.len() as u64;
        let added = self.buffer.len() as u64;
        if let Framing::Compressed(_) = self.framing {
            self.entry.byte_offset = state.offset;
            self.entry.byte_offset_end = state.offset + written;
            self.entry.uncompressed_size = added;
            state.index.push(self.entry);
        }
        state.offset += written;
        state.records += self.pending;
        state.blocks += 1;
        state.bytes_added += added;
        state.bytes_written += written;
        state.largest_uncompressed = state.largest_uncompressed.max(added);

        self.buffer.clear();
        self.entry.reset();
        self.pending = 0;
        Ok(())
    }

    /// Writes an already compressed block after this writer's staged records. `entry`
    /// describes the frame's records; offsets are filled in here.
    fn append_frame(&mut self, frame: &[u8], mut entry: IndexEntry) -> Result<(), OutputError> {
        self.flush()?;
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        state.writable()?.write_all(frame)?;

        let written = frame.len() as u64;
        let records = u64::from(entry.n_variants);
        entry.byte_offset = state.offset;
        entry.byte_offset_end = state.offset + written;
        state.index.push(entry);
        state.offset += written;
        state.records += records;
        state.blocks += 1;
        state.bytes_added += entry.uncompressed_size;
        state.bytes_written += written;
        state.largest_uncompressed = state.largest_uncompressed.max(entry.uncompressed_size);
        self.n_entries += records;
        Ok(())
    }

    fn stats(&self) -> WriterStats {
        let state = self.shared.lock();
        WriterStats {
            records: self.n_entries,
            blocks: state.blocks,
            bytes_added: state.bytes_added,
            bytes_written: state.bytes_written,
        }
    }

    /// Flushes this writer's buffer and the underlying stream.
    fn finish_plain(&mut self) -> Result<(), OutputError> {
        self.flush()?;
        if let Some(stream) = self.shared.lock().stream.as_mut() {
            stream.flush()?;
        }
        Ok(())
    }
}

fn open_plain(path: &Path) -> Result<Box<dyn Write + Send>, OutputError> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(path).map_err(|e| {
        io::Error::new(e.kind(), format!("cannot create '{}': {e}", path.display()))
    })?;
    Ok(Box::new(BufWriter::new(file)))
}

/// Inflates a precompressed block of binary records and describes it with an index entry.
/// The block must be one whole frame of `uncompressed_size` bytes whose records share a
/// primary contig.
fn inspect_frame(frame: &[u8], uncompressed_size: u64) -> Result<(Vec<u8>, IndexEntry), OutputError> {
    let frame_header = FrameHeader::parse(frame)?;
    if frame_header.frame_len() != frame.len() {
        return Err(FormatError::Corrupt(format!(
            "precompressed block is {} bytes, its frame says {}",
            frame.len(),
            frame_header.frame_len()
        ))
        .into());
    }
    let data = decompress(frame)?;
    if data.len() as u64 != uncompressed_size {
        return Err(FormatError::Corrupt(format!(
            "precompressed block inflated to {} bytes, expected {uncompressed_size}",
            data.len()
        ))
        .into());
    }
    let mut entry = IndexEntry {
        uncompressed_size,
        ..IndexEntry::default()
    };
    for record in parse_records(&data)? {
        if !entry.is_empty() && entry.contig_id != record.contig_a {
            return Err(FormatError::Corrupt("precompressed block spans contigs".into()).into());
        }
        entry.extend_range(record.contig_a, record.position_a);
    }
    Ok((data, entry))
}

/// Text output carries no binary block concept; handing it encoded records is a
/// programming error that ends the process.
fn fatal_bulk_append(what: &str) -> ! {
    error!("The text output sink cannot accept a binary {what}");
    eprintln!("\nFATAL: a binary {what} was appended to the text output sink; aborting.");
    std::process::exit(1);
}

// --- The sink contract ---

pub trait ResultSink {
    /// Opens the default destination. Idempotent.
    fn open(&mut self) -> Result<(), OutputError>;

    fn open_path(&mut self, path: &Path) -> Result<(), OutputError>;

    fn write_headers(&mut self, header: &OutputHeader) -> Result<(), OutputError>;

    /// Emits the result of the pair (a, b) and, unless upper-only, its mirror (b, a).
    fn add<P: ResultPayload>(
        &mut self,
        meta_a: &MetaEntry,
        meta_b: &MetaEntry,
        payload: &P,
    ) -> Result<(), OutputError>;

    fn append_record<P: ResultPayload>(
        &mut self,
        record: &ResultRecord<'_, P>,
    ) -> Result<(), OutputError>;

    fn append_container(&mut self, container: &ResultContainer) -> Result<(), OutputError>;

    fn append_raw(&mut self, bytes: &[u8]) -> Result<(), OutputError>;

    /// Appends one block compressed elsewhere, after the records staged so far.
    fn append_precompressed(&mut self, frame: &[u8], uncompressed_size: u64) -> Result<(), OutputError>;

    /// Writes the staged buffer out. Returns `false` if nothing was staged.
    fn flush(&mut self) -> Result<bool, OutputError>;

    fn write_final(&mut self) -> Result<(), OutputError>;

    fn stats(&self) -> WriterStats;
}

// --- Binary file: compressed frames, output index, footer ---

pub struct BinaryFileSink {
    core: WriterCore<Box<dyn SeekWrite>>,
}

impl ResultSink for BinaryFileSink {
    fn open(&mut self) -> Result<(), OutputError> {
        if self.core.is_open() {
            Ok(())
        } else {
            Err(OutputError::NotOpen)
        }
    }

    fn open_path(&mut self, path: &Path) -> Result<(), OutputError> {
        if self.core.is_open() {
            debug!("Result sink already open; '{}' left untouched", path.display());
            return Ok(());
        }
        let names = OutputNames::resolve(path, OUTPUT_SUFFIX);
        let file = names.create()?;
        info!("Writing binary results to '{}'", names.target().display());
        self.core.install(Box::new(BufWriter::new(file)));
        Ok(())
    }

    fn write_headers(&mut self, header: &OutputHeader) -> Result<(), OutputError> {
        let mut state = self.core.shared.lock();
        if state.header_written {
            return Ok(());
        }
        let stream = state.stream.as_mut().ok_or(OutputError::NotOpen)?;
        let data_offset = self.core.stamped(header).write_seekable(stream)?;
        state.offset = data_offset;
        state.header_written = true;
        let _ = self.core.contig_names.set(header.contig_names());
        Ok(())
    }

    fn add<P: ResultPayload>(
        &mut self,
        meta_a: &MetaEntry,
        meta_b: &MetaEntry,
        payload: &P,
    ) -> Result<(), OutputError> {
        self.core.add(meta_a, meta_b, payload)
    }

    fn append_record<P: ResultPayload>(
        &mut self,
        record: &ResultRecord<'_, P>,
    ) -> Result<(), OutputError> {
        self.core.append_record(record)
    }

    fn append_container(&mut self, container: &ResultContainer) -> Result<(), OutputError> {
        if container.is_empty() {
            return Ok(());
        }
        self.core.append_bytes(&container.data, container.len())
    }

    fn append_raw(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        self.core.append_bytes(bytes, 0)
    }

    fn append_precompressed(&mut self, frame: &[u8], uncompressed_size: u64) -> Result<(), OutputError> {
        let (_, entry) = inspect_frame(frame, uncompressed_size)?;
        self.core.append_frame(frame, entry)
    }

    fn flush(&mut self) -> Result<bool, OutputError> {
        self.core.flush()
    }

    /// Flushes this writer inside the same critical section that appends the output index,
    /// footer and end-of-file sentinel. Later calls do nothing.
    fn write_final(&mut self) -> Result<(), OutputError> {
        let staged = !self.core.buffer.is_empty();
        if staged {
            self.core.prepare()?;
        }
        let shared = Arc::clone(&self.core.shared);
        let mut state = shared.lock();
        if state.finalized {
            return Ok(());
        }
        if staged {
            self.core.write_locked(&mut state)?;
        }
        if !state.header_written {
            return Err(OutputError::MissingHeader);
        }

        let mut trailer = Vec::with_capacity(state.index.serialized_len() + crate::index::FOOTER_LEN);
        state.index.write_to(&mut trailer);
        Footer {
            index_offset: state.offset,
            index_len: state.index.serialized_len() as u64,
            n_blocks: state.index.len() as u64,
            n_variants: state.records,
            largest_uncompressed: state.largest_uncompressed,
        }
        .write_to(&mut trailer);

        let stream = state.stream.as_mut().ok_or(OutputError::NotOpen)?;
        stream.write_all(&trailer)?;
        stream.flush()?;
        state.offset += trailer.len() as u64;
        state.finalized = true;
        debug!(
            "Result file finalized: {} records in {} blocks",
            state.records,
            state.index.len()
        );
        Ok(())
    }

    fn stats(&self) -> WriterStats {
        self.core.stats()
    }
}

// --- Binary stream: same header, raw records, no trailer ---

pub struct BinaryStreamSink {
    core: WriterCore<Box<dyn Write + Send>>,
}

impl ResultSink for BinaryStreamSink {
    fn open(&mut self) -> Result<(), OutputError> {
        self.core.install(Box::new(io::stdout()));
        Ok(())
    }

    fn open_path(&mut self, path: &Path) -> Result<(), OutputError> {
        if self.core.is_open() {
            debug!("Result sink already open; '{}' left untouched", path.display());
            return Ok(());
        }
        self.core.install(open_plain(path)?);
        Ok(())
    }

    fn write_headers(&mut self, header: &OutputHeader) -> Result<(), OutputError> {
        self.core
            .write_preamble(header, &self.core.stamped(header).encode())
    }

    fn add<P: ResultPayload>(
        &mut self,
        meta_a: &MetaEntry,
        meta_b: &MetaEntry,
        payload: &P,
    ) -> Result<(), OutputError> {
        self.core.add(meta_a, meta_b, payload)
    }

    fn append_record<P: ResultPayload>(
        &mut self,
        record: &ResultRecord<'_, P>,
    ) -> Result<(), OutputError> {
        self.core.append_record(record)
    }

    fn append_container(&mut self, container: &ResultContainer) -> Result<(), OutputError> {
        if container.is_empty() {
            return Ok(());
        }
        self.core.append_bytes(&container.data, container.len())
    }

    fn append_raw(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        self.core.append_bytes(bytes, 0)
    }

    fn append_precompressed(&mut self, frame: &[u8], uncompressed_size: u64) -> Result<(), OutputError> {
        let (data, entry) = inspect_frame(frame, uncompressed_size)?;
        self.core.append_bytes(&data, u64::from(entry.n_variants))
    }

    fn flush(&mut self) -> Result<bool, OutputError> {
        self.core.flush()
    }

    fn write_final(&mut self) -> Result<(), OutputError> {
        self.core.finish_plain()
    }

    fn stats(&self) -> WriterStats {
        self.core.stats()
    }
}

// --- Text: one tab-separated line per record ---

pub struct TextSink {
    core: WriterCore<Box<dyn Write + Send>>,
}

impl ResultSink for TextSink {
    fn open(&mut self) -> Result<(), OutputError> {
        self.core.install(Box::new(io::stdout()));
        Ok(())
    }

    fn open_path(&mut self, path: &Path) -> Result<(), OutputError> {
        if self.core.is_open() {
            debug!("Result sink already open; '{}' left untouched", path.display());
            return Ok(());
        }
        self.core.install(open_plain(path)?);
        Ok(())
    }

    fn write_headers(&mut self, header: &OutputHeader) -> Result<(), OutputError> {
        self.core
            .write_preamble(header, header.text_header().as_bytes())
    }

    fn add<P: ResultPayload>(
        &mut self,
        meta_a: &MetaEntry,
        meta_b: &MetaEntry,
        payload: &P,
    ) -> Result<(), OutputError> {
        self.core.add(meta_a, meta_b, payload)
    }

    fn append_record<P: ResultPayload>(
        &mut self,
        record: &ResultRecord<'_, P>,
    ) -> Result<(), OutputError> {
        self.core.append_record(record)
    }

    fn append_container(&mut self, _container: &ResultContainer) -> Result<(), OutputError> {
        fatal_bulk_append("record container")
    }

    fn append_raw(&mut self, _bytes: &[u8]) -> Result<(), OutputError> {
        fatal_bulk_append("byte buffer")
    }

    fn append_precompressed(&mut self, _frame: &[u8], _uncompressed_size: u64) -> Result<(), OutputError> {
        fatal_bulk_append("compressed block")
    }

    fn flush(&mut self) -> Result<bool, OutputError> {
        self.core.flush()
    }

    fn write_final(&mut self) -> Result<(), OutputError> {
        self.core.finish_plain()
    }

    fn stats(&self) -> WriterStats {
        self.core.stats()
    }
}

// --- The closed set of sinks ---

pub enum OutputWriter {
    BinaryFile(BinaryFileSink),
    BinaryStream(BinaryStreamSink),
    Text(TextSink),
}

macro_rules! dispatch {
    ($self:expr, $sink:ident => $call:expr) => {
        match $self {
            OutputWriter::BinaryFile($sink) => $call,
            OutputWriter::BinaryStream($sink) => $call,
            OutputWriter::Text($sink) => $call,
        }
    };
}

impl OutputWriter {
    /// A binary file sink with no destination yet; see [`ResultSink::open_path`].
    pub fn binary_file(settings: WriterSettings) -> Self {
        Self::BinaryFile(BinaryFileSink {
            core: WriterCore::new(
                None,
                settings,
                Framing::Compressed(BlockCompressor::new(settings.compression_level)),
                Encoding::Binary,
            ),
        })
    }

    pub fn binary_file_to(stream: impl SeekWrite + 'static, settings: WriterSettings) -> Self {
        let writer = Self::binary_file(settings);
        if let Self::BinaryFile(sink) = &writer {
            sink.core.install(Box::new(stream));
        }
        writer
    }

    /// A binary stream sink; `open()` directs it to stdout.
    pub fn binary_stream(settings: WriterSettings) -> Self {
        Self::BinaryStream(BinaryStreamSink {
            core: WriterCore::new(None, settings, Framing::Verbatim, Encoding::Binary),
        })
    }

    pub fn binary_stream_to(stream: impl Write + Send + 'static, settings: WriterSettings) -> Self {
        Self::BinaryStream(BinaryStreamSink {
            core: WriterCore::new(
                Some(Box::new(stream)),
                settings,
                Framing::Verbatim,
                Encoding::Binary,
            ),
        })
    }

    /// A text sink; `open()` directs it to stdout.
    pub fn text(settings: WriterSettings) -> Self {
        Self::Text(TextSink {
            core: WriterCore::new(None, settings, Framing::Verbatim, Encoding::Text),
        })
    }

    pub fn text_to(stream: impl Write + Send + 'static, settings: WriterSettings) -> Self {
        Self::Text(TextSink {
            core: WriterCore::new(
                Some(Box::new(stream)),
                settings,
                Framing::Verbatim,
                Encoding::Text,
            ),
        })
    }

    /// A sibling writer sharing this writer's sink, counters, index and lock, with an empty
    /// private buffer.
    pub fn worker(&self) -> Self {
        match self {
            Self::BinaryFile(sink) => Self::BinaryFile(BinaryFileSink {
                core: sink.core.worker(),
            }),
            Self::BinaryStream(sink) => Self::BinaryStream(BinaryStreamSink {
                core: sink.core.worker(),
            }),
            Self::Text(sink) => Self::Text(TextSink {
                core: sink.core.worker(),
            }),
        }
    }

    pub fn settings(&self) -> WriterSettings {
        dispatch!(self, sink => sink.core.settings)
    }

    fn n_entries_mut(&mut self) -> &mut u64 {
        dispatch!(self, sink => &mut sink.core.n_entries)
    }
}

/// Folds a finished worker's record count into this writer.
impl AddAssign<&OutputWriter> for OutputWriter {
    fn add_assign(&mut self, worker: &OutputWriter) {
        *self.n_entries_mut() += worker.stats().records;
    }
}

impl ResultSink for OutputWriter {
    fn open(&mut self) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.open())
    }

    fn open_path(&mut self, path: &Path) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.open_path(path))
    }

    fn write_headers(&mut self, header: &OutputHeader) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.write_headers(header))
    }

    fn add<P: ResultPayload>(
        &mut self,
        meta_a: &MetaEntry,
        meta_b: &MetaEntry,
        payload: &P,
    ) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.add(meta_a, meta_b, payload))
    }

    fn append_record<P: ResultPayload>(
        &mut self,
        record: &ResultRecord<'_, P>,
    ) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.append_record(record))
    }

    fn append_container(&mut self, container: &ResultContainer) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.append_container(container))
    }

    fn append_raw(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.append_raw(bytes))
    }

    fn append_precompressed(&mut self, frame: &[u8], uncompressed_size: u64) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.append_precompressed(frame, uncompressed_size))
    }

    fn flush(&mut self) -> Result<bool, OutputError> {
        dispatch!(self, sink => sink.flush())
    }

    fn write_final(&mut self) -> Result<(), OutputError> {
        dispatch!(self, sink => sink.write_final())
    }

    fn stats(&self) -> WriterStats {
        dispatch!(self, sink => sink.stats())
    }
}

// --- Reading results back ---

/// A finished binary result file.
pub struct OutputReader {
    bytes: Vec<u8>,
    header: OutputHeader,
    index: BlockIndex,
    footer: Footer,
}

impl OutputReader {
    pub fn open(path: &Path) -> Result<Self, OutputError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, OutputError> {
        let (header, _) = OutputHeader::parse(&bytes)?;
        let footer = Footer::read_from_tail(&bytes)?;
        let index = BlockIndex::read_from(footer.index_bytes(&bytes)?)?;
        if header.sort_order == SortOrder::Sorted {
            check_sorted(&index)?;
        }
        Ok(Self {
            bytes,
            header,
            index,
            footer,
        })
    }

    pub fn header(&self) -> &OutputHeader {
        &self.header
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn block_records(&self, block: usize) -> Result<Vec<DecodedRecord>, OutputError> {
        let entry = self.index.get(block).ok_or_else(|| {
            FormatError::Corrupt(format!("result block {block} does not exist"))
        })?;
        let data = decompress(entry.frame(&self.bytes)?)?;
        Ok(parse_records(&data)?)
    }

    pub fn records(&self) -> Result<Vec<DecodedRecord>, OutputError> {
        let mut records = Vec::with_capacity(self.footer.n_variants as usize);
        for block in 0..self.index.len() {
            records.extend(self.block_records(block)?);
        }
        Ok(records)
    }
}

/// A file claiming global order must have contiguous blocks whose position ranges follow
/// each other within a contig.
fn check_sorted(index: &BlockIndex) -> Result<(), FormatError> {
    index.validate()?;
    for (block, (current, next)) in index.entries().iter().tuple_windows().enumerate() {
        if current.contig_id == next.contig_id && next.min_position < current.max_position {
            return Err(FormatError::Corrupt(format!(
                "sorted result file: block {} starts before block {block} ends",
                block + 1
            )));
        }
    }
    Ok(())
}

/// Parses the output of a binary stream sink.
pub fn read_stream(bytes: &[u8]) -> Result<(OutputHeader, Vec<DecodedRecord>), OutputError> {
    let (header, data_offset) = OutputHeader::parse(bytes)?;
    let records = parse_records(&bytes[data_offset as usize..])?;
    Ok((header, records))
}
