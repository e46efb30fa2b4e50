use crate::region_index::RegionIndex;
use log::info;
use std::io::{self, Write};

/// Load the cached region index for `bed_file`, or build it (and the cache) from scratch.
pub fn load_index(bed_file: &str, force_reindex: bool) -> io::Result<RegionIndex> {
    let index = RegionIndex::load_or_build(bed_file, force_reindex)?;
    info!(
        "Region index ready: {} regions on {} contigs",
        index.num_regions(),
        index.num_contigs()
    );
    Ok(index)
}

/// Summary of the index, per contig in natural order.
pub fn write_stats<W: Write>(index: &RegionIndex, out: &mut W) -> io::Result<()> {
    let mut contigs: Vec<&str> = index.contigs().collect();
    contigs.sort_by(|a, b| natord::compare(a, b));

    let total_bases: i64 = contigs
        .iter()
        .filter_map(|contig| index.contig_regions(contig))
        .flatten()
        .map(|region| region.len() as i64)
        .sum();

    writeln!(out, "Number of contigs: {}", index.num_contigs())?;
    writeln!(out, "Number of regions: {}", index.num_regions())?;
    writeln!(out, "Total region length: {total_bases} bp")?;
    if index.num_regions() > 0 {
        writeln!(
            out,
            "Mean region length: {:.2} bp",
            total_bases as f64 / index.num_regions() as f64
        )?;
    }

    writeln!(out, "\nRegions per contig:")?;
    for contig in contigs {
        let regions = index.contig_regions(contig).unwrap_or_default();
        writeln!(out, "{contig}\t{}", regions.len())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn test_write_stats_uses_natural_contig_order() {
        let index = RegionIndex::build(vec![
            Region::new("chr10", 1, 10).unwrap(),
            Region::new("chr2", 1, 10).unwrap(),
            Region::new("chr2", 21, 40).unwrap(),
            Region::new("chr1", 5, 14).unwrap(),
        ]);
        let mut out = Vec::new();
        write_stats(&index, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Number of regions: 4"));
        assert!(text.contains("Total region length: 50 bp"));
        assert!(text.contains("Mean region length: 12.50 bp"));
        assert!(text.ends_with("chr1\t1\nchr2\t2\nchr10\t1\n"));
    }
}
