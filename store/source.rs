// ========================================================================================
//                          Genotype line sources (ingestion front end)
// ========================================================================================

use crate::header::StoreHeader;
use crate::types::{AuxPayload, ContigDescriptor, Genotype, GenotypeLine};
use ahash::AHashMap;
use memchr::memchr_iter;
use std::io::{self, BufRead};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error while reading genotype table: {0}")]
    Io(#[from] io::Error),
    #[error("genotype table has no '#CONTIG' column header line")]
    MissingHeader,
    #[error("line {line}: {reason}")]
    Malformed { line: u64, reason: String },
    #[error("line {line}: contig '{name}' was not declared in a ##contig line")]
    UnknownContig { line: u64, name: String },
    #[error("line {line}: {found} genotype calls, the header names {expected} samples")]
    SampleCount {
        line: u64,
        found: usize,
        expected: usize,
    },
}

/// A producer of already-parsed variant lines.
pub trait GenotypeSource {
    /// The cohort description every line refers to.
    fn header(&self) -> &StoreHeader;

    /// The next variant, or `None` at end of input.
    fn next_line(&mut self) -> Result<Option<GenotypeLine>, SourceError>;
}

/// Number of fixed columns before the first genotype call.
const FIXED_COLUMNS: usize = 5;

/// Tab-separated genotype table.
///
/// ```text
/// ##contig=<ID=chr1,length=248956422>
/// #CONTIG  POS  ID   REF  ALT  sample1  sample2 ...
/// chr1     101  rs1  A    G    0/0      0/1     ...
/// ```
pub struct TableSource<R: BufRead> {
    reader: R,
    header: StoreHeader,
    contig_ids: AHashMap<String, u32>,
    line: Vec<u8>,
    line_number: u64,
}

impl<R: BufRead> TableSource<R> {
    /// Consumes the `##` preamble and the column header line.
    pub fn new(mut reader: R) -> Result<Self, SourceError> {
        let mut header = StoreHeader::default();
        let mut line = Vec::new();
        let mut line_number = 0;
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Err(SourceError::MissingHeader);
            }
            line_number += 1;
            let text = trim_line(&line);
            let text = std::str::from_utf8(text).map_err(|_| SourceError::Malformed {
                line: line_number,
                reason: "header line is not valid UTF-8".into(),
            })?;
            if let Some(body) = text.strip_prefix("##contig=") {
                header
                    .contigs
                    .push(parse_contig_line(body).ok_or_else(|| SourceError::Malformed {
                        line: line_number,
                        reason: format!("cannot read contig declaration '{text}'"),
                    })?);
            } else if text.starts_with("##") {
                header.literals.push_str(text);
                header.literals.push('\n');
            } else if text.starts_with('#') {
                header.sample_names = text
                    .split('\t')
                    .skip(FIXED_COLUMNS)
                    .map(str::to_string)
                    .collect();
                header.sample_count = header.sample_names.len() as u64;
                break;
            } else if !text.is_empty() {
                return Err(SourceError::MissingHeader);
            }
        }

        let contig_ids = header
            .contigs
            .iter()
            .enumerate()
            .map(|(id, contig)| (contig.name.clone(), id as u32))
            .collect();
        Ok(Self {
            reader,
            header,
            contig_ids,
            line,
            line_number,
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> SourceError {
        SourceError::Malformed {
            line: self.line_number,
            reason: reason.into(),
        }
    }

    fn parse_row(&self) -> Result<GenotypeLine, SourceError> {
        let row = trim_line(&self.line);
        let mut fields = split_tabs(row);
        let mut next_field = |name: &str| {
            fields
                .next()
                .ok_or_else(|| self.malformed(format!("missing {name} column")))
        };

        let contig = next_field("contig")?;
        let position = next_field("position")?;
        let id = next_field("ID")?;
        let ref_allele = next_field("REF")?;
        let alt_allele = next_field("ALT")?;

        let contig = String::from_utf8_lossy(contig);
        let contig_id = *self.contig_ids.get(contig.as_ref()).ok_or_else(|| {
            SourceError::UnknownContig {
                line: self.line_number,
                name: contig.to_string(),
            }
        })?;
        let position = lexical_core::parse::<u64>(position).map_err(|_| {
            self.malformed(format!(
                "position '{}' is not an integer",
                String::from_utf8_lossy(position)
            ))
        })?;

        let genotypes = fields
            .map(|call| {
                parse_call(call).ok_or_else(|| {
                    self.malformed(format!(
                        "unrecognised genotype call '{}'",
                        String::from_utf8_lossy(call)
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if genotypes.len() != self.header.sample_names.len() {
            return Err(SourceError::SampleCount {
                line: self.line_number,
                found: genotypes.len(),
                expected: self.header.sample_names.len(),
            });
        }

        Ok(GenotypeLine {
            contig_id,
            position,
            aux: AuxPayload {
                id: String::from_utf8_lossy(id).into_owned(),
                ref_allele: String::from_utf8_lossy(ref_allele).into_owned(),
                alt_allele: String::from_utf8_lossy(alt_allele).into_owned(),
            },
            genotypes,
        })
    }
}

impl<R: BufRead> GenotypeSource for TableSource<R> {
    fn header(&self) -> &StoreHeader {
        &self.header
    }

    fn next_line(&mut self) -> Result<Option<GenotypeLine>, SourceError> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            if !trim_line(&self.line).is_empty() {
                return self.parse_row().map(Some);
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn split_tabs(row: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut start = 0;
    memchr_iter(b'\t', row)
        .chain(std::iter::once(row.len()))
        .map(move |end| {
            let field = &row[start..end];
            start = end + 1;
            field
        })
}

fn parse_contig_line(body: &str) -> Option<ContigDescriptor> {
    let inner = body.strip_prefix('<')?.strip_suffix('>')?;
    let mut name = None;
    let mut length = 0;
    for pair in inner.split(',') {
        let (key, value) = pair.split_once('=')?;
        match key {
            "ID" => name = Some(value.to_string()),
            "length" => length = value.parse().ok()?,
            _ => {}
        }
    }
    Some(ContigDescriptor {
        name: name?,
        length,
    })
}

fn parse_call(call: &[u8]) -> Option<Genotype> {
    match call {
        b"0" => Some(Genotype::HomRef),
        b"1" => Some(Genotype::Het),
        b"2" => Some(Genotype::HomAlt),
        b"." => Some(Genotype::Missing),
        [a, b'/' | b'|', b] => match (a, b) {
            (b'0', b'0') => Some(Genotype::HomRef),
            (b'0', b'1') | (b'1', b'0') => Some(Genotype::Het),
            (b'1', b'1') => Some(Genotype::HomAlt),
            (b'.', b'.') => Some(Genotype::Missing),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TABLE: &str = "##source=unit-test\n\
##contig=<ID=chr1,length=1000>\n\
##contig=<ID=chr2,length=500>\n\
#CONTIG\tPOS\tID\tREF\tALT\ts1\ts2\ts3\ts4\n\
chr1\t10\trs1\tA\tG\t0/0\t0|1\t1/1\t./.\n\
\n\
chr2\t7\trs2\tC\tT\t0\t1\t2\t.\r\n";

    #[test]
    fn table_header_and_rows_are_parsed() {
        let mut source = TableSource::new(Cursor::new(TABLE)).unwrap();
        let header = source.header().clone();
        assert_eq!(header.sample_count, 4);
        assert_eq!(header.sample_names, ["s1", "s2", "s3", "s4"]);
        assert_eq!(header.contigs.len(), 2);
        assert_eq!(header.contigs[1].length, 500);
        assert_eq!(header.literals, "##source=unit-test\n");

        let first = source.next_line().unwrap().unwrap();
        assert_eq!(first.contig_id, 0);
        assert_eq!(first.position, 10);
        assert_eq!(first.aux.alt_allele, "G");
        assert_eq!(
            first.genotypes,
            [
                Genotype::HomRef,
                Genotype::Het,
                Genotype::HomAlt,
                Genotype::Missing
            ]
        );

        let second = source.next_line().unwrap().unwrap();
        assert_eq!(second.contig_id, 1);
        assert_eq!(second.genotypes, first.genotypes);
        assert!(source.next_line().unwrap().is_none());
    }

    #[test]
    fn bad_rows_name_their_line() {
        let text = "##contig=<ID=chr1,length=10>\n#CONTIG\tPOS\tID\tREF\tALT\ts1\n\
chrX\t1\t.\tA\tG\t0\n";
        let mut source = TableSource::new(Cursor::new(text)).unwrap();
        assert!(matches!(
            source.next_line(),
            Err(SourceError::UnknownContig { line: 3, .. })
        ));

        let text = "##contig=<ID=chr1,length=10>\n#CONTIG\tPOS\tID\tREF\tALT\ts1\ts2\n\
chr1\t1\t.\tA\tG\t0/2\t0\n";
        let mut source = TableSource::new(Cursor::new(text)).unwrap();
        assert!(matches!(
            source.next_line(),
            Err(SourceError::Malformed { line: 3, .. })
        ));

        assert!(matches!(
            TableSource::new(Cursor::new("chr1\t1\n")),
            Err(SourceError::MissingHeader)
        ));
    }
}
