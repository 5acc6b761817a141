//! Header of binary and text result output.

use crate::header::{put_contigs, read_contigs};
use crate::types::{ByteReader, ContigDescriptor, FormatError, put_string};
use std::io::{self, Seek, SeekFrom, Write};

pub const OUTPUT_MAGIC: [u8; 8] = *b"GENOPAIR";

/// Byte position of the data-offset field: right after the magic and sample count.
const DATA_OFFSET_AT: u64 = 16;

/// Ordering promise of the records in a result file, by (contig a, position a).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortOrder {
    #[default]
    Unsorted = 0,
    /// Records are ordered within each block but blocks may interleave.
    PartiallySorted = 1,
    /// Records are ordered across the whole file.
    Sorted = 2,
}

impl SortOrder {
    fn from_byte(byte: u8) -> Result<Self, FormatError> {
        match byte {
            0 => Ok(Self::Unsorted),
            1 => Ok(Self::PartiallySorted),
            2 => Ok(Self::Sorted),
            other => Err(FormatError::Corrupt(format!("unknown sort order {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputHeader {
    pub sample_count: u64,
    pub sort_order: SortOrder,
    pub contigs: Vec<ContigDescriptor>,
    pub literals: String,
    /// Payload column names, following the five fixed record columns.
    pub columns: Vec<String>,
}

impl OutputHeader {
    pub fn contig_names(&self) -> Vec<String> {
        self.contigs.iter().map(|contig| contig.name.clone()).collect()
    }

    fn write_tail(&self, buf: &mut Vec<u8>) {
        buf.push(self.sort_order as u8);
        put_contigs(buf, &self.contigs);
        put_string(buf, &self.literals);
        buf.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        for column in &self.columns {
            put_string(buf, column);
        }
    }

    /// Writes the header to a seekable sink: placeholder data offset first, patched once the
    /// variable-length tail has been written. Returns the data offset.
    pub fn write_seekable<W: Write + Seek + ?Sized>(&self, out: &mut W) -> io::Result<u64> {
        let start = out.stream_position()?;
        out.write_all(&OUTPUT_MAGIC)?;
        out.write_all(&self.sample_count.to_le_bytes())?;
        out.write_all(&0u64.to_le_bytes())?;
        let mut tail = Vec::new();
        self.write_tail(&mut tail);
        out.write_all(&tail)?;

        let data_offset = out.stream_position()?;
        out.seek(SeekFrom::Start(start + DATA_OFFSET_AT))?;
        out.write_all(&data_offset.to_le_bytes())?;
        out.seek(SeekFrom::Start(data_offset))?;
        Ok(data_offset)
    }

    /// The same bytes as `write_seekable` produces at offset zero, computed without seeking.
    pub fn encode(&self) -> Vec<u8> {
        let mut tail = Vec::new();
        self.write_tail(&mut tail);
        let data_offset = DATA_OFFSET_AT + 8 + tail.len() as u64;

        let mut buf = Vec::with_capacity(data_offset as usize);
        buf.extend_from_slice(&OUTPUT_MAGIC);
        buf.extend_from_slice(&self.sample_count.to_le_bytes());
        buf.extend_from_slice(&data_offset.to_le_bytes());
        buf.extend_from_slice(&tail);
        buf
    }

    /// Parses a binary header; returns it with the offset of the first data byte.
    pub fn parse(bytes: &[u8]) -> Result<(Self, u64), FormatError> {
        let mut reader = ByteReader::new(bytes);
        if reader.take(OUTPUT_MAGIC.len())? != OUTPUT_MAGIC {
            return Err(FormatError::BadMagic("result header"));
        }
        let sample_count = reader.u64()?;
        let data_offset = reader.u64()?;
        let sort_order = SortOrder::from_byte(reader.u8()?)?;
        let contigs = read_contigs(&mut reader)?;
        let literals = reader.string()?;
        let n_columns = reader.u32()? as usize;
        let columns = (0..n_columns)
            .map(|_| reader.string())
            .collect::<Result<Vec<_>, _>>()?;
        if data_offset != reader.offset() as u64 {
            return Err(FormatError::Corrupt(format!(
                "result header ends at {} but records are said to start at {data_offset}",
                reader.offset()
            )));
        }
        Ok((
            Self {
                sample_count,
                sort_order,
                contigs,
                literals,
                columns,
            },
            data_offset,
        ))
    }

    /// Literal line and column line of the text output.
    pub fn text_header(&self) -> String {
        let mut text = String::new();
        let literals = self.literals.trim_end_matches('\n');
        if literals.is_empty() {
            text.push_str("##genoblock");
        } else {
            text.push_str(&literals.replace('\n', " "));
        }
        text.push('\n');
        text.push_str("FLAG\tCHROM_A\tPOS_A\tCHROM_B\tPOS_B");
        for column in &self.columns {
            text.push('\t');
            text.push_str(column);
        }
        text.push('\n');
        text
    }
}
