//! The store file preamble: magic, version, cohort description and literal provenance text.

use crate::types::{BitWidth, ByteReader, ContigDescriptor, FormatError, put_string};
use std::time::{SystemTime, UNIX_EPOCH};

pub const STORE_MAGIC: [u8; 8] = *b"GENOBLOK";
pub const STORE_VERSION_MAJOR: u16 = 1;
pub const STORE_VERSION_MINOR: u16 = 0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreHeader {
    pub sample_count: u64,
    pub contigs: Vec<ContigDescriptor>,
    /// Either empty or exactly `sample_count` names.
    pub sample_names: Vec<String>,
    /// Free-text `##` lines, newline separated.
    pub literals: String,
}

impl StoreHeader {
    pub fn new(sample_count: u64, contigs: Vec<ContigDescriptor>) -> Self {
        Self {
            sample_count,
            contigs,
            ..Self::default()
        }
    }

    /// Word width of every run and simple word in the store.
    pub fn bit_width(&self) -> BitWidth {
        BitWidth::from_sample_count(self.sample_count)
    }

    pub fn contig_name(&self, contig_id: u32) -> Option<&str> {
        self.contigs
            .get(contig_id as usize)
            .map(|contig| contig.name.as_str())
    }

    /// Appends the generated provenance line recording how the store was produced.
    pub fn add_provenance(&mut self, command: &str) {
        if !self.literals.is_empty() && !self.literals.ends_with('\n') {
            self.literals.push('\n');
        }
        self.literals.push_str(&provenance_line(command));
        self.literals.push('\n');
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&STORE_MAGIC);
        buf.extend_from_slice(&STORE_VERSION_MAJOR.to_le_bytes());
        buf.extend_from_slice(&STORE_VERSION_MINOR.to_le_bytes());
        buf.extend_from_slice(&self.sample_count.to_le_bytes());
        buf.push(self.bit_width().bytes() as u8);
        put_contigs(buf, &self.contigs);
        buf.extend_from_slice(&(self.sample_names.len() as u32).to_le_bytes());
        for name in &self.sample_names {
            put_string(buf, name);
        }
        put_string(buf, &self.literals);
    }

    /// Parses the header at the start of a store file. The reader is left on the first frame.
    pub fn parse(reader: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        if reader.take(STORE_MAGIC.len())? != STORE_MAGIC {
            return Err(FormatError::BadMagic("store header"));
        }
        let major = reader.u16()?;
        let minor = reader.u16()?;
        if major != STORE_VERSION_MAJOR {
            return Err(FormatError::UnsupportedVersion { major, minor });
        }
        let sample_count = reader.u64()?;
        let word_bytes = reader.u8()?;
        match BitWidth::from_bytes(word_bytes) {
            Some(width) if width == BitWidth::from_sample_count(sample_count) => {}
            _ => return Err(FormatError::InvalidBitWidth(word_bytes)),
        }
        let contigs = read_contigs(reader)?;
        let n_names = reader.u32()? as usize;
        let sample_names = (0..n_names)
            .map(|_| reader.string())
            .collect::<Result<Vec<_>, _>>()?;
        if !sample_names.is_empty() && sample_names.len() as u64 != sample_count {
            return Err(FormatError::Corrupt(format!(
                "header names {} samples but declares {sample_count}",
                sample_names.len()
            )));
        }
        let literals = reader.string()?;
        Ok(Self {
            sample_count,
            contigs,
            sample_names,
            literals,
        })
    }
}

pub fn provenance_line(command: &str) -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!(
        "##genoblock_importCommand={command}; VERSION={}; Date={seconds}",
        env!("CARGO_PKG_VERSION")
    )
}

pub fn put_contigs(buf: &mut Vec<u8>, contigs: &[ContigDescriptor]) {
    buf.extend_from_slice(&(contigs.len() as u32).to_le_bytes());
    for contig in contigs {
        put_string(buf, &contig.name);
        buf.extend_from_slice(&contig.length.to_le_bytes());
    }
}

pub fn read_contigs(reader: &mut ByteReader<'_>) -> Result<Vec<ContigDescriptor>, FormatError> {
    let n_contigs = reader.u32()? as usize;
    (0..n_contigs)
        .map(|_| {
            Ok(ContigDescriptor {
                name: reader.string()?,
                length: reader.u64()?,
            })
        })
        .collect()
}
