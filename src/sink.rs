//! Incremental consumers for the output stream of the last pipeline stage.

use crate::alignment_record::AlignedRecord;
use noodles::sam;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};

#[derive(Debug)]
pub enum SinkError {
    Io(io::Error),
    /// A unit of the stream could not be parsed. `record` is 1-based, 0 for the header.
    RecordParse { record: u64, message: String },
    /// The per-item callback refused an item.
    Rejected(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {e}"),
            SinkError::RecordParse { record: 0, message } => {
                write!(f, "Failed to parse header: {message}")
            }
            SinkError::RecordParse { record, message } => {
                write!(f, "Failed to parse record {record}: {message}")
            }
            SinkError::Rejected(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        SinkError::Io(e)
    }
}

impl From<SinkError> for io::Error {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Consumes a byte stream to its end, invoking a callback for every item parsed from it.
pub trait Sink {
    fn handle_stream<R: Read>(&mut self, reader: R) -> Result<(), SinkError>;
}

/// Per-line callbacks for [`LineSink`]. The first line goes to `header`, which handles
/// it like any other line unless overridden.
pub trait LineHandler {
    fn header(&mut self, line: String) -> Result<(), SinkError> {
        self.item(line)
    }

    fn item(&mut self, line: String) -> Result<(), SinkError>;
}

impl<F> LineHandler for F
where
    F: FnMut(String) -> Result<(), SinkError>,
{
    fn item(&mut self, line: String) -> Result<(), SinkError> {
        self(line)
    }
}

pub struct LineSink<H> {
    handler: H,
}

impl<H: LineHandler> LineSink<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

impl<H: LineHandler> Sink for LineSink<H> {
    fn handle_stream<R: Read>(&mut self, reader: R) -> Result<(), SinkError> {
        let reader = BufReader::new(reader);
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if i == 0 {
                self.handler.header(line)?;
            } else {
                self.handler.item(line)?;
            }
        }
        Ok(())
    }
}

fn parse_error(record: u64, e: io::Error) -> SinkError {
    if e.kind() == io::ErrorKind::InvalidData {
        SinkError::RecordParse {
            record,
            message: e.to_string(),
        }
    } else {
        SinkError::Io(e)
    }
}

/// Parses a SAM text stream and hands every record to `on_record`.
///
/// The header of the last consumed stream is kept so the reduce stage can reuse the
/// aligner's reference sequence dictionary.
pub struct AlignedRecordSink<F> {
    on_record: F,
    header: Option<sam::Header>,
}

impl<F> AlignedRecordSink<F>
where
    F: FnMut(AlignedRecord) -> Result<(), SinkError>,
{
    pub fn new(on_record: F) -> Self {
        Self {
            on_record,
            header: None,
        }
    }

    pub fn header(&self) -> Option<&sam::Header> {
        self.header.as_ref()
    }

    pub fn into_header(self) -> Option<sam::Header> {
        self.header
    }
}

impl<F> Sink for AlignedRecordSink<F>
where
    F: FnMut(AlignedRecord) -> Result<(), SinkError>,
{
    fn handle_stream<R: Read>(&mut self, reader: R) -> Result<(), SinkError> {
        // The reader is dropped on every return path, releasing the stream
        let mut reader = sam::io::Reader::new(BufReader::new(reader));
        let header = reader.read_header().map_err(|e| parse_error(0, e))?;

        let mut count = 0u64;
        for result in reader.record_bufs(&header) {
            count += 1;
            let record = result.map_err(|e| parse_error(count, e))?;
            let record =
                AlignedRecord::from_record_buf(&header, record).map_err(|e| parse_error(count, e))?;
            (self.on_record)(record)?;
        }

        self.header = Some(header);
        Ok(())
    }
}

/// Groups consecutive records sharing a read name and hands each group to `on_template`.
///
/// Aligners emit every record of a read (pair) back to back, so one group holds the
/// primary, secondary and supplementary records of both mates.
pub struct TemplateSink<F> {
    on_template: F,
    pending: Vec<AlignedRecord>,
    header: Option<sam::Header>,
}

impl<F> TemplateSink<F>
where
    F: FnMut(Vec<AlignedRecord>) -> Result<(), SinkError>,
{
    pub fn new(on_template: F) -> Self {
        Self {
            on_template,
            pending: Vec::new(),
            header: None,
        }
    }

    pub fn header(&self) -> Option<&sam::Header> {
        self.header.as_ref()
    }

    pub fn into_header(self) -> Option<sam::Header> {
        self.header
    }
}

impl<F> Sink for TemplateSink<F>
where
    F: FnMut(Vec<AlignedRecord>) -> Result<(), SinkError>,
{
    fn handle_stream<R: Read>(&mut self, reader: R) -> Result<(), SinkError> {
        let pending = &mut self.pending;
        let on_template = &mut self.on_template;

        let mut records = AlignedRecordSink::new(|record: AlignedRecord| {
            let starts_new_template = pending
                .last()
                .is_some_and(|last| last.name().is_none() || last.name() != record.name());
            if starts_new_template {
                on_template(std::mem::take(pending))?;
            }
            pending.push(record);
            Ok(())
        });
        let result = records.handle_stream(reader);
        let header = records.into_header();
        if let Err(e) = result {
            // A partial template must not leak into the next stream
            self.pending.clear();
            return Err(e);
        }

        if !self.pending.is_empty() {
            (self.on_template)(std::mem::take(&mut self.pending))?;
        }
        self.header = header;
        Ok(())
    }
}
