//! Decoding of the published delimited files
//!
//! Files are `;`-separated, double-quoted, headerless, and encoded in
//! ISO-8859-1. Every byte of that encoding maps to the Unicode code point of
//! the same value, so decoding cannot fail. NUL bytes, which show up in some
//! free-text fields and which Postgres text columns reject, are dropped.

use crate::error::{IngestError, Result};
use csv::{ByteRecord, ReaderBuilder};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub const DELIMITER: u8 = b';';

/// Decode ISO-8859-1 bytes into a `String`, dropping NULs.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

/// Row-at-a-time reader over one delimited source
pub struct RowReader<R: Read> {
    inner: csv::Reader<R>,
    record: ByteRecord,
    source: String,
}

impl RowReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = File::open(path).map_err(|e| IngestError::extraction(&source, e))?;
        Ok(Self::from_reader(BufReader::with_capacity(1 << 20, file), source))
    }
}

impl<R: Read> RowReader<R> {
    pub fn from_reader(reader: R, source: impl Into<String>) -> Self {
        let inner = ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .flexible(true)
            .double_quote(true)
            .from_reader(reader);

        Self {
            inner,
            record: ByteRecord::new(),
            source: source.into(),
        }
    }

    /// Next decoded row, or `None` at end of input.
    ///
    /// Only I/O failures surface as errors; odd quoting is read leniently.
    pub fn next_row(&mut self) -> Result<Option<Vec<String>>> {
        let more = self.inner.read_byte_record(&mut self.record).map_err(|e| {
            IngestError::extraction(&self.source, format!("read failed near line {}: {e}", self.line()))
        })?;

        if !more {
            return Ok(None);
        }

        Ok(Some(self.record.iter().map(latin1_to_string).collect()))
    }

    /// Line number of the most recently read row
    pub fn line(&self) -> u64 {
        self.record.position().map_or(0, |p| p.line())
    }
}

impl<R: Read> Iterator for RowReader<R> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}
