use crate::region::Region;
use crate::sink::{LineSink, Sink, SinkError};
use log::debug;
use noodles::bgzf;
use std::fs::File;
use std::io;

/// Parse one BED line into a region. Returns `Ok(None)` for lines carrying no interval.
pub fn parse_bed_line(line: &str) -> Result<Option<Region>, String> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty()
        || line.starts_with('#')
        || line.starts_with("track")
        || line.starts_with("browser")
    {
        return Ok(None);
    }

    let mut fields = line.split('\t');
    let contig = fields.next().unwrap_or_default();
    let start = fields
        .next()
        .ok_or_else(|| format!("BED line has no start column: '{line}'"))?;
    let start: i32 = start
        .trim()
        .parse()
        .map_err(|e| format!("Invalid BED start '{start}': {e}"))?;
    let end = match fields.next() {
        Some(end) if !end.trim().is_empty() => Some(
            end.trim()
                .parse::<i32>()
                .map_err(|e| format!("Invalid BED end '{end}': {e}"))?,
        ),
        _ => None,
    };

    Region::from_bed(contig, start, end)
        .map(Some)
        .map_err(|e| format!("Invalid BED line '{line}': {e}"))
}

/// Read every interval of a BED file, plain or BGZF-compressed (`.gz`/`.bgz`).
pub fn read_bed_regions(bed_file: &str) -> io::Result<Vec<Region>> {
    let file = File::open(bed_file).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Failed to open BED file '{bed_file}': {e}"),
        )
    })?;

    let mut regions = Vec::new();
    let mut line_number = 0u64;
    let mut sink = LineSink::new(|line: String| {
        line_number += 1;
        if let Some(region) = parse_bed_line(&line).map_err(|message| SinkError::RecordParse {
            record: line_number,
            message,
        })? {
            regions.push(region);
        }
        Ok(())
    });

    let result = if [".gz", ".bgz"].iter().any(|e| bed_file.ends_with(e)) {
        sink.handle_stream(bgzf::io::Reader::new(file))
    } else {
        sink.handle_stream(file)
    };
    result.map_err(|e| match e {
        SinkError::RecordParse { record, message } => io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{bed_file}:{record}: {message}"),
        ),
        other => io::Error::from(other),
    })?;

    debug!("Read {} regions from {}", regions.len(), bed_file);
    Ok(regions)
}
