//! Read-only index of target regions grouped per contig.
//!
//! Regions are grouped by contig and sorted by `(start, end)`. Overlap queries find the
//! first region whose end reaches the query start with a boundary binary search and then
//! scan forward while region starts stay within the query end. That scan is exact when
//! region ends are non-decreasing along the sorted list (tiling or nested-free sets).
//! Contigs violating this get an interval tree at build time instead.

use crate::alignment_record::AlignedRecord;
use crate::bed::read_bed_regions;
use crate::region::Region;
use coitrees::{BasicCOITree, Interval, IntervalTree};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

/// A region group failed validation. Nothing from the offending group was inserted.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedRegionSet {
    ContigMismatch { key: String, regions: Vec<Region> },
    Unsorted { contig: String },
}

impl fmt::Display for MalformedRegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedRegionSet::ContigMismatch { key, regions } => {
                write!(f, "The following regions did not match contig '{key}':")?;
                for region in regions {
                    write!(f, " {region}")?;
                }
                Ok(())
            }
            MalformedRegionSet::Unsorted { contig } => {
                write!(f, "The regions of contig '{contig}' were not sorted")
            }
        }
    }
}

impl std::error::Error for MalformedRegionSet {}

impl From<MalformedRegionSet> for io::Error {
    fn from(e: MalformedRegionSet) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    }
}

/// Regions of one contig plus the lookup strategy chosen for them
struct ContigRegions {
    regions: Vec<Region>,
    // Only present when region ends are not monotonic along the start order
    tree: Option<BasicCOITree<u32, u32>>,
}

impl ContigRegions {
    fn new(contig: &str, regions: Vec<Region>) -> Self {
        let monotonic_ends = regions.windows(2).all(|w| w[0].end() <= w[1].end());
        let tree = if monotonic_ends {
            None
        } else {
            warn!(
                "Regions on contig '{}' overlap without monotonic ends, using an interval tree for lookups",
                contig
            );
            let intervals: Vec<Interval<u32>> = regions
                .iter()
                .enumerate()
                .map(|(i, region)| Interval::new(region.start(), region.end(), i as u32))
                .collect();
            Some(BasicCOITree::new(intervals.as_slice()))
        };
        Self { regions, tree }
    }

    fn overlapping(&self, start: i32, end: i32) -> Vec<&Region> {
        if self.regions.is_empty() {
            return Vec::new();
        }

        if let Some(tree) = &self.tree {
            let mut hits: Vec<u32> = Vec::new();
            tree.query(start, end, |interval| {
                hits.push(u32::clone(&interval.metadata));
            });
            hits.sort_unstable();
            return hits
                .into_iter()
                .map(|i| &self.regions[i as usize])
                .collect();
        }

        let Some(first) = first_ending_at_or_after(&self.regions, start) else {
            return Vec::new();
        };
        self.regions[first..]
            .iter()
            .take_while(|region| region.start() <= end)
            .collect()
    }
}

/// Lowest index whose region ends at or after `position`.
///
/// Assumes region ends are non-decreasing along the slice.
fn first_ending_at_or_after(regions: &[Region], position: i32) -> Option<usize> {
    let mut low = 0;
    let mut high = regions.len();

    while high - low >= 2 {
        let middle = low + (high - low) / 2;
        if regions[middle].end() < position {
            low = middle + 1;
        } else if regions[middle - 1].end() < position {
            return Some(middle);
        } else {
            high = middle;
        }
    }

    // At most one candidate remains
    if low < high && regions[low].end() >= position {
        Some(low)
    } else {
        None
    }
}

fn validate_group(key: &str, regions: &[Region]) -> Result<(), MalformedRegionSet> {
    let mismatched: Vec<Region> = regions
        .iter()
        .filter(|region| region.contig() != key)
        .cloned()
        .collect();
    if !mismatched.is_empty() {
        return Err(MalformedRegionSet::ContigMismatch {
            key: key.to_string(),
            regions: mismatched,
        });
    }
    if !regions.windows(2).all(|w| w[0] <= w[1]) {
        return Err(MalformedRegionSet::Unsorted {
            contig: key.to_string(),
        });
    }
    Ok(())
}

/// Accumulates regions before freezing them into a [`RegionIndex`].
#[derive(Default)]
pub struct RegionIndexBuilder {
    contigs: FxHashMap<String, Vec<Region>>,
}

impl RegionIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, region: Region) -> &mut Self {
        self.contigs
            .entry(region.contig().to_string())
            .or_default()
            .push(region);
        self
    }

    pub fn add_all<I: IntoIterator<Item = Region>>(&mut self, regions: I) -> &mut Self {
        for region in regions {
            self.add(region);
        }
        self
    }

    /// Insert a pre-grouped, pre-sorted region list for `contig`, replacing any regions
    /// gathered for it so far. The list is validated before anything is inserted.
    pub fn put_contig(
        &mut self,
        contig: &str,
        regions: Vec<Region>,
    ) -> Result<&mut Self, MalformedRegionSet> {
        validate_group(contig, &regions)?;
        self.contigs.insert(contig.to_string(), regions);
        Ok(self)
    }

    pub fn build(self) -> RegionIndex {
        let contigs = self
            .contigs
            .into_iter()
            .map(|(contig, mut regions)| {
                regions.sort();
                let entry = ContigRegions::new(&contig, regions);
                (contig, entry)
            })
            .collect();
        RegionIndex { contigs }
    }
}

#[derive(Serialize, Deserialize)]
struct SerializableRegionIndex {
    contigs: Vec<(String, Vec<Region>)>,
}

/// Immutable contig → sorted regions mapping. Safe to share across worker threads.
pub struct RegionIndex {
    contigs: FxHashMap<String, ContigRegions>,
}

impl RegionIndex {
    /// Group and sort an unordered region list.
    pub fn build(regions: Vec<Region>) -> Self {
        let mut builder = RegionIndexBuilder::new();
        builder.add_all(regions);
        builder.build()
    }

    /// Freeze already grouped and sorted region lists, rejecting the whole set if any
    /// group is malformed.
    pub fn from_contig_groups<I>(groups: I) -> Result<Self, MalformedRegionSet>
    where
        I: IntoIterator<Item = (String, Vec<Region>)>,
    {
        let mut builder = RegionIndexBuilder::new();
        for (contig, regions) in groups {
            builder.put_contig(&contig, regions)?;
        }
        Ok(builder.build())
    }

    /// Regions on the record's contig overlapping `[record.start, record.end]`, in
    /// ascending `(start, end)` order. Unmapped records never overlap anything.
    pub fn retrieve_overlaps(&self, record: &AlignedRecord) -> Vec<&Region> {
        if record.is_unmapped() {
            return Vec::new();
        }
        match record.contig() {
            Some(contig) => self.overlapping(contig, record.start(), record.end()),
            None => Vec::new(),
        }
    }

    pub fn overlapping(&self, contig: &str, start: i32, end: i32) -> Vec<&Region> {
        match self.contigs.get(contig) {
            Some(entry) => entry.overlapping(start, end),
            None => Vec::new(),
        }
    }

    pub fn contig_regions(&self, contig: &str) -> Option<&[Region]> {
        self.contigs.get(contig).map(|entry| entry.regions.as_slice())
    }

    pub fn contigs(&self) -> impl Iterator<Item = &str> {
        self.contigs.keys().map(String::as_str)
    }

    pub fn contains_region(&self, region: &Region) -> bool {
        self.contigs
            .get(region.contig())
            .is_some_and(|entry| entry.regions.binary_search(region).is_ok())
    }

    pub fn num_contigs(&self) -> usize {
        self.contigs.len()
    }

    pub fn num_regions(&self) -> usize {
        self.contigs.values().map(|entry| entry.regions.len()).sum()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let serializable = SerializableRegionIndex {
            contigs: self
                .contigs
                .iter()
                .map(|(contig, entry)| (contig.clone(), entry.regions.clone()))
                .collect(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serde::encode_into_std_write(&serializable, &mut writer, bincode::config::standard())
            .map_err(|e| io::Error::other(format!("Failed to serialize region index: {e:?}")))?;
        Ok(())
    }

    /// Load a saved index. Every group is validated again before the index is frozen.
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let serializable: SerializableRegionIndex =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(
                |e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Failed to deserialize region index: {e:?}"),
                    )
                },
            )?;
        Ok(Self::from_contig_groups(serializable.contigs)?)
    }

    /// Use the `<bed>.ridx` cache next to the BED file when present, otherwise build the
    /// index from the BED file and write the cache.
    pub fn load_or_build(bed_file: &str, force_rebuild: bool) -> io::Result<Self> {
        let index_file = format!("{bed_file}.ridx");
        let index_path = Path::new(&index_file);

        if !force_rebuild && index_path.exists() {
            warn_if_stale(bed_file, &index_file);
            debug!("Loading region index from {}", index_file);
            return Self::load(index_path);
        }

        let regions = read_bed_regions(bed_file)?;
        info!("Read {} regions from {}", regions.len(), bed_file);
        let index = Self::build(regions);
        if let Err(e) = index.save(index_path) {
            warn!("Unable to write region index cache {}: {}", index_file, e);
        }
        Ok(index)
    }
}

fn warn_if_stale(bed_file: &str, index_file: &str) {
    let modified = |path: &str| std::fs::metadata(path).and_then(|m| m.modified());
    match (modified(bed_file), modified(index_file)) {
        (Ok(bed_ts), Ok(index_ts)) => {
            if bed_ts > index_ts {
                warn!("BED file {} has been modified since the region index was created", bed_file);
            }
        }
        _ => warn!(
            "Unable to compare timestamps of {} and {}, the region index may be stale",
            bed_file, index_file
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noodles::sam::alignment::record::Flags;

    fn region(contig: &str, start: i32, end: i32) -> Region {
        Region::new(contig, start, end).unwrap()
    }

    fn mapped(contig: &str, start: i32, end: i32) -> AlignedRecord {
        AlignedRecord::new(Some("read"), Some(contig), Some(0), start, end, Flags::empty())
    }

    fn spans(regions: Vec<&Region>) -> Vec<(i32, i32)> {
        regions.iter().map(|r| (r.start(), r.end())).collect()
    }

    #[test]
    fn test_boundary_cases_against_record_span() {
        // Record spans [100, 200]
        let record = mapped("chr1", 100, 200);
        let cases = [
            ((89, 99), false),
            ((90, 100), true),
            ((200, 210), true),
            ((201, 211), false),
            ((150, 160), true),
            ((90, 210), true),
        ];
        for ((start, end), expected) in cases {
            let index = RegionIndex::build(vec![region("chr1", start, end)]);
            assert_eq!(
                !index.retrieve_overlaps(&record).is_empty(),
                expected,
                "region [{start}, {end}]"
            );
        }
    }

    fn tiled(count: i32) -> RegionIndex {
        // Regions [1,10], [11,20], ... on chr1
        RegionIndex::build((0..count).map(|i| region("chr1", i * 10 + 1, i * 10 + 10)).collect())
    }

    #[test]
    fn test_binary_search_odd_and_even_lengths() {
        for count in [1, 2, 5, 6] {
            let index = tiled(count);
            let last_start = (count - 1) * 10 + 1;
            let last_end = count * 10;

            // Before all regions
            assert!(index.overlapping("chr1", -20, 0).is_empty());
            // After all regions
            assert!(index.overlapping("chr1", last_end + 1, last_end + 50).is_empty());
            // Exactly at the first region
            assert_eq!(spans(index.overlapping("chr1", 1, 1)), vec![(1, 10)]);
            // Exactly at the last region
            assert_eq!(
                spans(index.overlapping("chr1", last_end, last_end)),
                vec![(last_start, last_end)]
            );
            // Everything
            assert_eq!(index.overlapping("chr1", 1, last_end).len(), count as usize);
        }
    }

    #[test]
    fn test_contiguous_sublist_in_middle() {
        let index = tiled(6);
        assert_eq!(
            spans(index.overlapping("chr1", 15, 35)),
            vec![(11, 20), (21, 30), (31, 40)]
        );
        assert_eq!(spans(index.overlapping("chr1", 20, 21)), vec![(11, 20), (21, 30)]);
    }

    #[test]
    fn test_contig_isolation() {
        let index = RegionIndex::build(vec![region("chr1", 100, 200), region("chr2", 100, 200)]);
        let hits = index.retrieve_overlaps(&mapped("chr2", 150, 160));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].contig(), "chr2");
        assert!(index.retrieve_overlaps(&mapped("chr3", 150, 160)).is_empty());
    }

    #[test]
    fn test_unmapped_record_short_circuits() {
        let index = RegionIndex::build(vec![region("chr1", 1, 1000)]);
        let placed_unmapped =
            AlignedRecord::new(Some("read"), Some("chr1"), Some(0), 100, 100, Flags::UNMAPPED);
        assert!(index.retrieve_overlaps(&placed_unmapped).is_empty());
        let no_contig = AlignedRecord::new(Some("read"), None, None, 0, 0, Flags::empty());
        assert!(index.retrieve_overlaps(&no_contig).is_empty());
    }

    #[test]
    fn test_build_sorts_unordered_input() {
        let index = RegionIndex::build(vec![
            region("chr1", 50, 60),
            region("chr2", 5, 6),
            region("chr1", 10, 20),
        ]);
        assert_eq!(index.num_contigs(), 2);
        assert_eq!(index.num_regions(), 3);
        let chr1: Vec<i32> = index.contig_regions("chr1").unwrap().iter().map(|r| r.start()).collect();
        assert_eq!(chr1, vec![10, 50]);
        assert!(index.contains_region(&region("chr2", 5, 6)));
        assert!(!index.contains_region(&region("chr2", 5, 7)));
    }

    #[test]
    fn test_put_contig_rejects_mismatch_without_mutation() {
        let mut builder = RegionIndexBuilder::new();
        builder.add(region("chr1", 1, 10));
        let result = builder.put_contig("chr1", vec![region("chr1", 20, 30), region("chr2", 40, 50)]);
        assert!(matches!(
            result,
            Err(MalformedRegionSet::ContigMismatch { ref key, ref regions })
                if key == "chr1" && regions == &vec![region("chr2", 40, 50)]
        ));
        let index = builder.build();
        assert_eq!(spans(index.overlapping("chr1", 1, 100)), vec![(1, 10)]);
    }

    #[test]
    fn test_from_contig_groups_rejects_unsorted() {
        let result = RegionIndex::from_contig_groups(vec![
            ("chr1".to_string(), vec![region("chr1", 1, 10)]),
            ("chr2".to_string(), vec![region("chr2", 30, 40), region("chr2", 1, 10)]),
        ]);
        assert!(matches!(
            result,
            Err(MalformedRegionSet::Unsorted { ref contig }) if contig == "chr2"
        ));
    }

    #[test]
    fn test_non_monotonic_ends_fall_back_to_tree() {
        // [1,1000] swallows the later regions, so ends are not monotonic
        let index = RegionIndex::build(vec![
            region("chr1", 1, 1000),
            region("chr1", 10, 20),
            region("chr1", 30, 40),
            region("chr1", 500, 600),
        ]);
        assert_eq!(
            spans(index.overlapping("chr1", 550, 560)),
            vec![(1, 1000), (500, 600)]
        );
        assert_eq!(
            spans(index.overlapping("chr1", 15, 35)),
            vec![(1, 1000), (10, 20), (30, 40)]
        );
        assert!(index.overlapping("chr1", 1001, 2000).is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("regions.ridx");
        let index = RegionIndex::build(vec![
            region("chr1", 1, 10),
            region("chr1", 11, 20),
            region("chrX", 5, 500),
        ]);
        index.save(&path)?;

        let loaded = RegionIndex::load(&path)?;
        assert_eq!(loaded.num_regions(), 3);
        assert_eq!(spans(loaded.overlapping("chr1", 10, 11)), vec![(1, 10), (11, 20)]);
        assert!(loaded.contains_region(&region("chrX", 5, 500)));
        Ok(())
    }
}
