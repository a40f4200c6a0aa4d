// src/table/csv.rs

use anyhow::{ensure, Context, Result};
use arrow::csv::{reader::Format, Reader, ReaderBuilder};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How a delimited text export is decoded.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Maximum rows per emitted batch.
    pub chunk_rows: usize,
    /// The official INEP exports are ISO-8859-1, not UTF-8.
    pub latin1: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            chunk_rows: 100_000,
            latin1: true,
        }
    }
}

/// Lazily decoded batches of a CSV export.
pub type CsvChunks<R> = Reader<TextInput<R>>;

/// Open a CSV export as an iterator of batches of at most `chunk_rows` rows.
///
/// The input is read twice: once to infer column types over every record so
/// all chunks share one schema, then batch by batch. Empty fields become nulls.
pub fn csv_chunks<R: Read + Seek>(mut input: R, options: &CsvOptions) -> Result<CsvChunks<R>> {
    ensure!(options.chunk_rows > 0, "chunk_rows must be positive");

    let start = body_start(&mut input, options.latin1).context("reading CSV header")?;
    let format = Format::default()
        .with_header(true)
        .with_delimiter(options.delimiter);

    input.seek(SeekFrom::Start(start))?;
    let (schema, records) = format
        .infer_schema(TextInput::new(&mut input, options.latin1), None)
        .context("inferring CSV schema")?;
    debug!(
        columns = schema.fields().len(),
        records, "inferred CSV schema"
    );

    input.seek(SeekFrom::Start(start))?;
    ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .with_batch_size(options.chunk_rows)
        .build(TextInput::new(input, options.latin1))
        .context("creating CSV reader")
}

/// Offset of the first header byte: past a UTF-8 byte order mark, if any.
fn body_start<R: Read + Seek>(input: &mut R, latin1: bool) -> io::Result<u64> {
    if latin1 {
        return Ok(0);
    }
    input.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(UTF8_BOM.len());
    input.by_ref().take(UTF8_BOM.len() as u64).read_to_end(&mut head)?;
    Ok(if head == UTF8_BOM { UTF8_BOM.len() as u64 } else { 0 })
}

/// Presents the underlying bytes as UTF-8, transcoding ISO-8859-1 on the fly.
pub struct TextInput<R> {
    inner: R,
    latin1: bool,
    scratch: Box<[u8]>,
    // second byte of a two-byte sequence that did not fit the caller's buffer
    pending: Option<u8>,
}

impl<R: Read> TextInput<R> {
    pub fn new(inner: R, latin1: bool) -> Self {
        Self {
            inner,
            latin1,
            scratch: vec![0; 8 * 1024].into_boxed_slice(),
            pending: None,
        }
    }
}

impl<R: Read> Read for TextInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.latin1 || buf.is_empty() {
            return self.inner.read(buf);
        }
        if let Some(byte) = self.pending.take() {
            buf[0] = byte;
            return Ok(1);
        }

        // every Latin-1 byte becomes at most two UTF-8 bytes
        let want = (buf.len() / 2).clamp(1, self.scratch.len());
        let n = self.inner.read(&mut self.scratch[..want])?;

        let mut out = 0;
        for &byte in &self.scratch[..n] {
            if byte < 0x80 {
                buf[out] = byte;
                out += 1;
                continue;
            }
            buf[out] = 0xC0 | (byte >> 6);
            out += 1;
            let tail = 0x80 | (byte & 0x3F);
            if out < buf.len() {
                buf[out] = tail;
                out += 1;
            } else {
                self.pending = Some(tail);
            }
        }
        Ok(out)
    }
}
