//! CSV edges of the pipeline: a reader exposed as a [`RowCursor`] and a writer
//! that drains any cursor.
//!
//! - **Delimiter resolution**: extension-based auto-detection (`.csv` → comma,
//!   `.tsv` → tab) with manual override support.
//! - **Encoding**: input decoding and output transcoding via `encoding_rs`,
//!   defaulting to UTF-8.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.
//! - **Quoting**: CSV output uses `QuoteStyle::Always` for round-trip safety.

use std::{
    collections::VecDeque,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::{ByteRecord, QuoteStyle};
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{
    columns::ColumnLookup,
    cursor::{Position, RowCursor, check_ordinal},
    data::Value,
    error::Result as CursorResult,
    schema::ColumnType,
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn resolve_output_delimiter(path: Option<&Path>, provided: Option<u8>, fallback: u8) -> u8 {
    if let Some(delim) = provided {
        return delim;
    }
    if let Some(path) = path {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => return DEFAULT_TSV_DELIMITER,
            Some(ext) if ext.eq_ignore_ascii_case("csv") => return DEFAULT_CSV_DELIMITER,
            _ => {}
        }
    }
    fallback
}

/// Rows may differ in width; a headerless source is sized by
/// [`CsvOptions::header_row`], so a narrow preamble does not truncate it.
pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    Ok(if is_dash(path) {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    })
}

pub fn open_csv_writer(
    path: Option<&Path>,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout()),
    };

    let writer: Box<dyn Write> = if encoding == UTF_8 {
        base
    } else {
        Box::new(TranscodingWriter::new(base, encoding))
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// How a CSV source is read.
#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    /// Whether the first record names the columns. Without one, columns are
    /// named `Column1`, `Column2`, ... after the width of the sizing record.
    pub has_headers: bool,
    /// 1-based record that sizes a headerless source, normally the row a
    /// later header promotion adopts. Defaults to the first record.
    pub header_row: Option<usize>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_CSV_DELIMITER,
            encoding: UTF_8,
            has_headers: true,
            header_row: None,
        }
    }
}

/// A CSV source read one record at a time. Every column is declared as a
/// string; empty fields read as null.
pub struct CsvCursor<R: Read> {
    reader: Option<csv::Reader<R>>,
    encoding: &'static Encoding,
    label: String,
    names: Vec<String>,
    lookup: ColumnLookup,
    record: ByteRecord,
    current: Vec<Value>,
    /// Records read early to size a headerless source.
    pending: VecDeque<Vec<Value>>,
    rows_read: u64,
    position: Position,
}

impl CsvCursor<Box<dyn Read>> {
    /// Opens `path`, or stdin for `-`.
    pub fn open(path: &Path, options: &CsvOptions) -> Result<Self> {
        let input = open_input(path)?;
        CsvCursor::from_reader(input, options, path.display().to_string())
    }
}

impl<R: Read> CsvCursor<R> {
    pub fn from_reader(reader: R, options: &CsvOptions, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let mut reader = open_csv_reader(reader, options.delimiter, options.has_headers);
        let mut pending = VecDeque::new();
        let names = if options.has_headers {
            let headers = reader
                .byte_headers()
                .with_context(|| format!("Reading headers of {label}"))?
                .clone();
            decode_record(&headers, options.encoding)
                .with_context(|| format!("Decoding headers of {label}"))?
        } else {
            let sizing_row = options.header_row.unwrap_or(1).max(1);
            let mut record = ByteRecord::new();
            let mut widest = 0;
            let mut width = None;
            while pending.len() < sizing_row {
                let line = pending.len() + 1;
                if !reader
                    .read_byte_record(&mut record)
                    .with_context(|| format!("Reading record {line} of {label}"))?
                {
                    break;
                }
                let values = decode_values(&record, options.encoding)
                    .with_context(|| format!("Decoding record {line} of {label}"))?;
                widest = widest.max(values.len());
                if line == sizing_row {
                    width = Some(values.len());
                }
                pending.push_back(values);
            }
            // A source shorter than the sizing row keeps every column it has.
            let width = width.unwrap_or(widest);
            (1..=width).map(|idx| format!("Column{idx}")).collect()
        };
        debug!("Opened {label} with {} column(s)", names.len());
        let lookup = ColumnLookup::new(&names);
        Ok(Self {
            reader: Some(reader),
            encoding: options.encoding,
            label,
            names,
            lookup,
            record: ByteRecord::new(),
            current: Vec::new(),
            pending,
            rows_read: 0,
            position: Position::BeforeFirst,
        })
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn read_next(&mut self) -> Result<Option<Vec<Value>>> {
        if let Some(values) = self.pending.pop_front() {
            return Ok(Some(values));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let line = self.rows_read + 1;
        if !reader
            .read_byte_record(&mut self.record)
            .with_context(|| format!("Reading record {line} of {}", self.label))?
        {
            return Ok(None);
        }
        let values = decode_values(&self.record, self.encoding)
            .with_context(|| format!("Decoding record {line} of {}", self.label))?;
        Ok(Some(values))
    }
}

fn decode_values(record: &ByteRecord, encoding: &'static Encoding) -> Result<Vec<Value>> {
    record
        .iter()
        .map(|field| {
            let text = decode_bytes(field, encoding)?;
            Ok(if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            })
        })
        .collect()
}

impl<R: Read> RowCursor for CsvCursor<R> {
    fn advance(&mut self) -> CursorResult<bool> {
        if self.position == Position::Exhausted {
            return Ok(false);
        }
        match self.read_next()? {
            Some(values) => {
                self.current = values;
                self.rows_read += 1;
                Ok(self.position.record(true))
            }
            None => {
                self.current.clear();
                self.reader = None;
                Ok(self.position.record(false))
            }
        }
    }

    fn field_count(&self) -> usize {
        self.names.len()
    }

    fn name(&self, ordinal: usize) -> CursorResult<&str> {
        check_ordinal(ordinal, self.names.len())?;
        Ok(&self.names[ordinal])
    }

    fn declared_type(&self, ordinal: usize) -> CursorResult<ColumnType> {
        check_ordinal(ordinal, self.names.len())?;
        Ok(ColumnType::String)
    }

    fn value(&self, ordinal: usize) -> CursorResult<Value> {
        self.position.ensure_row()?;
        check_ordinal(ordinal, self.names.len())?;
        Ok(self.current.get(ordinal).cloned().unwrap_or_default())
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> CursorResult<()> {
        if self.reader.take().is_some() {
            debug!("Closed {} after {} row(s)", self.label, self.rows_read);
        }
        self.pending.clear();
        self.current.clear();
        self.position = Position::Exhausted;
        Ok(())
    }
}

/// Writes `headers` (when non-empty) and every remaining row of `cursor`.
/// Returns the number of data rows written.
pub fn write_cursor<C, W>(
    cursor: &mut C,
    writer: &mut csv::Writer<W>,
    headers: &[String],
) -> Result<u64>
where
    C: RowCursor + ?Sized,
    W: Write,
{
    if !headers.is_empty() {
        writer.write_record(headers).context("Writing header row")?;
    }
    let mut written = 0u64;
    let mut fields = Vec::with_capacity(cursor.field_count());
    while cursor.advance()? {
        fields.clear();
        for ordinal in 0..cursor.field_count() {
            let value = cursor
                .value(ordinal)
                .with_context(|| format!("Reading row {} column {ordinal}", written + 1))?;
            fields.push(value.as_display());
        }
        writer
            .write_record(&fields)
            .with_context(|| format!("Writing row {}", written + 1))?;
        written += 1;
    }
    writer.flush().context("Flushing output")?;
    Ok(written)
}

struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    buffer: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            buffer: Vec::new(),
        }
    }

    /// Encodes the longest valid UTF-8 prefix; a split trailing sequence waits
    /// for more bytes unless `force` is set.
    fn flush_buffer(&mut self, force: bool) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let valid_up_to = match std::str::from_utf8(&self.buffer) {
            Ok(_) => self.buffer.len(),
            Err(err) => {
                if err.error_len().is_some() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Invalid UTF-8 sequence in output stream",
                    ));
                }
                if force {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Incomplete UTF-8 sequence at end of output stream",
                    ));
                }
                err.valid_up_to()
            }
        };
        if valid_up_to == 0 {
            return Ok(());
        }
        let pending: Vec<u8> = self.buffer.drain(..valid_up_to).collect();
        let text = String::from_utf8(pending)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.encode_and_write(&text)
    }

    fn encode_and_write(&mut self, text: &str) -> io::Result<()> {
        let (encoded, _output_encoding, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to encode text using {}", self.encoding.name()),
            ));
        }
        self.inner.write_all(encoded.as_ref())
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.flush_buffer(false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer(true)?;
        self.inner.flush()
    }
}
