use crate::region_index::RegionIndex;
use regex::Regex;
use std::io::{self, Write};

/// Parse `contig:start-end` (1-based, inclusive). Contig names may contain ':'.
pub fn parse_range(range: &str) -> io::Result<(String, i32, i32)> {
    let re = Regex::new(r"^(.+):(\d+)-(\d+)$").map_err(io::Error::other)?;
    let caps = re.captures(range.trim()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Range '{range}' should have the format `contig:start-end`"),
        )
    })?;

    let parse = |value: &str| {
        value.parse::<i32>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid coordinate '{value}' in range '{range}': {e}"),
            )
        })
    };
    let start = parse(&caps[2])?;
    let end = parse(&caps[3])?;
    if start < 1 || end < start {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Range '{range}' must satisfy 1 <= start <= end"),
        ));
    }
    Ok((caps[1].to_string(), start, end))
}

/// Write the regions overlapping the range as BED lines. Returns how many were written.
pub fn write_overlaps<W: Write>(
    index: &RegionIndex,
    contig: &str,
    start: i32,
    end: i32,
    out: &mut W,
) -> io::Result<usize> {
    let regions = index.overlapping(contig, start, end);
    for region in &regions {
        writeln!(
            out,
            "{}\t{}\t{}",
            region.contig(),
            region.start() - 1,
            region.end()
        )?;
    }
    Ok(regions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn test_parse_range() {
        assert_eq!(
            parse_range("chr1:100-200").unwrap(),
            ("chr1".to_string(), 100, 200)
        );
        assert_eq!(
            parse_range("HLA-A*01:01:5-5").unwrap(),
            ("HLA-A*01:01".to_string(), 5, 5)
        );
        assert!(parse_range("chr1").is_err());
        assert!(parse_range("chr1:0-10").is_err());
        assert!(parse_range("chr1:20-10").is_err());
        assert!(parse_range("chr1:1-99999999999").is_err());
    }

    #[test]
    fn test_write_overlaps_as_bed() {
        let index = RegionIndex::build(vec![
            Region::new("chr1", 1, 100).unwrap(),
            Region::new("chr1", 101, 200).unwrap(),
            Region::new("chr1", 201, 300).unwrap(),
        ]);
        let mut out = Vec::new();
        let n = write_overlaps(&index, "chr1", 100, 150, &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "chr1\t0\t100\nchr1\t100\t200\n");
    }
}
