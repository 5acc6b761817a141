// ========================================================================================
//                         Pairwise result records and their encodings
// ========================================================================================

use crate::types::{ByteReader, FormatError};

/// Fixed part of a binary record, before the payload.
pub const RECORD_HEADER_LEN: usize = 2 + 4 + 8 + 4 + 8 + 2;

/// A computed statistic for one variant pair, serialisable to both output encodings.
pub trait ResultPayload: Sync {
    /// Column names of the text form, in `write_text` order.
    const COLUMNS: &'static [&'static str];

    fn flags(&self) -> u16;

    /// Appends the tab-separated columns, without a leading or trailing separator.
    fn write_text(&self, out: &mut Vec<u8>);

    fn write_binary(&self, out: &mut Vec<u8>);
}

/// One emitted record: the pair coordinates plus a borrowed payload.
#[derive(Debug)]
pub struct ResultRecord<'a, P> {
    pub contig_a: u32,
    pub position_a: u64,
    pub contig_b: u32,
    pub position_b: u64,
    pub payload: &'a P,
}

impl<P> Clone for ResultRecord<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for ResultRecord<'_, P> {}

impl<'a, P: ResultPayload> ResultRecord<'a, P> {
    /// The (b, a) record carrying the same payload.
    pub fn mirrored(&self) -> Self {
        Self {
            contig_a: self.contig_b,
            position_a: self.position_b,
            contig_b: self.contig_a,
            position_b: self.position_a,
            payload: self.payload,
        }
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) -> Result<(), FormatError> {
        let start = buf.len();
        buf.extend_from_slice(&self.payload.flags().to_le_bytes());
        buf.extend_from_slice(&self.contig_a.to_le_bytes());
        buf.extend_from_slice(&self.position_a.to_le_bytes());
        buf.extend_from_slice(&self.contig_b.to_le_bytes());
        buf.extend_from_slice(&self.position_b.to_le_bytes());
        let len_at = buf.len();
        buf.extend_from_slice(&[0, 0]);
        self.payload.write_binary(buf);

        let payload_len = buf.len() - len_at - 2;
        let Ok(len) = u16::try_from(payload_len) else {
            buf.truncate(start);
            return Err(FormatError::PayloadTooLarge(payload_len));
        };
        buf[len_at..len_at + 2].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// One text line; contigs are printed by name when `contig_names` knows them.
    pub fn write_text(&self, buf: &mut Vec<u8>, contig_names: &[String]) {
        push_u64(buf, u64::from(self.payload.flags()));
        buf.push(b'\t');
        push_contig(buf, self.contig_a, contig_names);
        buf.push(b'\t');
        push_u64(buf, self.position_a);
        buf.push(b'\t');
        push_contig(buf, self.contig_b, contig_names);
        buf.push(b'\t');
        push_u64(buf, self.position_b);
        buf.push(b'\t');
        self.payload.write_text(buf);
        buf.push(b'\n');
    }
}

/// Already-serialised binary records, appended to a sink in one piece.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultContainer {
    pub data: Vec<u8>,
    pub n_records: u64,
}

impl ResultContainer {
    pub fn push<P: ResultPayload>(&mut self, record: &ResultRecord<'_, P>) -> Result<(), FormatError> {
        record.write_binary(&mut self.data)?;
        self.n_records += 1;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.n_records
    }

    pub fn is_empty(&self) -> bool {
        self.n_records == 0
    }
}

/// A binary record read back from an output file or stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub flags: u16,
    pub contig_a: u32,
    pub position_a: u64,
    pub contig_b: u32,
    pub position_b: u64,
    pub payload: Vec<u8>,
}

impl DecodedRecord {
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let flags = reader.u16()?;
        let contig_a = reader.u32()?;
        let position_a = reader.u64()?;
        let contig_b = reader.u32()?;
        let position_b = reader.u64()?;
        let payload_len = reader.u16()? as usize;
        Ok(Self {
            flags,
            contig_a,
            position_a,
            contig_b,
            position_b,
            payload: reader.take(payload_len)?.to_vec(),
        })
    }
}

/// Splits a run of back-to-back binary records.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<DecodedRecord>, FormatError> {
    let mut reader = ByteReader::new(bytes);
    let mut records = Vec::new();
    while reader.offset() < bytes.len() {
        records.push(DecodedRecord::read_from(&mut reader)?);
    }
    Ok(records)
}

pub fn push_u64(buf: &mut Vec<u8>, value: u64) {
    let mut digits = [0u8; lexical_core::BUFFER_SIZE];
    buf.extend_from_slice(lexical_core::write(value, &mut digits));
}

pub fn push_f64(buf: &mut Vec<u8>, value: f64) {
    let mut formatter = ryu::Buffer::new();
    buf.extend_from_slice(formatter.format(value).as_bytes());
}

fn push_contig(buf: &mut Vec<u8>, contig_id: u32, contig_names: &[String]) {
    match contig_names.get(contig_id as usize) {
        Some(name) => buf.extend_from_slice(name.as_bytes()),
        None => push_u64(buf, u64::from(contig_id)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal payload used by the output tests.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub(crate) struct Score(pub f64);

    impl ResultPayload for Score {
        const COLUMNS: &'static [&'static str] = &["SCORE"];

        fn flags(&self) -> u16 {
            1
        }

        fn write_text(&self, out: &mut Vec<u8>) {
            push_f64(out, self.0);
        }

        fn write_binary(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.0.to_le_bytes());
        }
    }

    /// A payload too large for the 16-bit length field.
    pub(crate) struct Oversized;

    impl ResultPayload for Oversized {
        const COLUMNS: &'static [&'static str] = &[];

        fn flags(&self) -> u16 {
            0
        }

        fn write_text(&self, _out: &mut Vec<u8>) {}

        fn write_binary(&self, out: &mut Vec<u8>) {
            out.resize(out.len() + 70_000, 0);
        }
    }

    fn record(payload: &Score) -> ResultRecord<'_, Score> {
        ResultRecord {
            contig_a: 0,
            position_a: 100,
            contig_b: 1,
            position_b: 2500,
            payload,
        }
    }

    #[test]
    fn binary_records_split_back_apart() {
        let score = Score(0.75);
        let mut container = ResultContainer::default();
        container.push(&record(&score)).unwrap();
        container.push(&record(&score).mirrored()).unwrap();
        assert_eq!(container.len(), 2);
        assert_eq!(container.data.len(), 2 * (RECORD_HEADER_LEN + 8));

        let records = parse_records(&container.data).unwrap();
        assert_eq!(records[0].position_a, 100);
        assert_eq!(records[1].contig_a, 1);
        assert_eq!(records[1].position_b, 100);
        assert_eq!(records[0].payload, records[1].payload);
        assert_eq!(records[0].payload, 0.75f64.to_le_bytes());
    }

    #[test]
    fn text_lines_use_contig_names() {
        let score = Score(0.5);
        let names = vec!["chr1".to_string()];
        let mut line = Vec::new();
        record(&score).write_text(&mut line, &names);
        assert_eq!(line, b"1\tchr1\t100\t1\t2500\t0.5\n");
    }

    #[test]
    fn oversized_payloads_are_refused_without_residue() {
        let mut buf = vec![9u8];
        let record = ResultRecord {
            contig_a: 0,
            position_a: 1,
            contig_b: 0,
            position_b: 2,
            payload: &Oversized,
        };
        assert!(matches!(
            record.write_binary(&mut buf),
            Err(FormatError::PayloadTooLarge(70_000))
        ));
        assert_eq!(buf, [9]);
    }
}
