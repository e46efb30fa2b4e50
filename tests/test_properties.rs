use proptest::prelude::*;
use regalign::key::{RegionKey, ShuffleKey};
use regalign::region::Region;
use regalign::region_index::RegionIndex;
use regalign::shuffle::LocalShuffle;
use std::collections::BTreeMap;

fn region_strategy() -> impl Strategy<Value = Region> {
    (
        prop::sample::select(vec!["chr1", "chr2", "chrX"]),
        1i32..2_000,
        0i32..300,
    )
        .prop_map(|(contig, start, len)| Region::new(contig, start, start + len).unwrap())
}

/// Consecutive, non-overlapping regions with random gaps on one contig
fn tiled_strategy() -> impl Strategy<Value = Vec<Region>> {
    prop::collection::vec((0i32..50, 0i32..100), 0..40).prop_map(|steps| {
        let mut next = 1;
        steps
            .into_iter()
            .map(|(gap, len)| {
                let start = next + gap;
                let region = Region::new("chr1", start, start + len).unwrap();
                next = start + len + 1;
                region
            })
            .collect()
    })
}

fn brute_force(regions: &[Region], contig: &str, start: i32, end: i32) -> Vec<Region> {
    let mut hits: Vec<Region> = regions
        .iter()
        .filter(|r| r.overlaps(contig, start, end))
        .cloned()
        .collect();
    hits.sort();
    hits
}

proptest! {
    #[test]
    fn overlap_matches_brute_force(
        regions in prop::collection::vec(region_strategy(), 0..60),
        contig in prop::sample::select(vec!["chr1", "chr2", "chr3"]),
        start in -10i32..2_500,
        len in 0i32..400,
    ) {
        let index = RegionIndex::build(regions.clone());
        let end = start + len;
        let found: Vec<Region> = index.overlapping(contig, start, end).into_iter().cloned().collect();
        prop_assert_eq!(found, brute_force(&regions, contig, start, end));
    }

    #[test]
    fn tiled_overlap_is_a_contiguous_sublist(
        regions in tiled_strategy(),
        start in -10i32..6_000,
        len in 0i32..500,
    ) {
        let index = RegionIndex::from_contig_groups(vec![("chr1".to_string(), regions.clone())]).unwrap();
        let end = start + len;
        let found: Vec<Region> = index.overlapping("chr1", start, end).into_iter().cloned().collect();
        let expected = brute_force(&regions, "chr1", start, end);
        prop_assert_eq!(&found, &expected);

        if let Some(first) = expected.first() {
            let offset = regions.iter().position(|r| r == first).unwrap();
            prop_assert_eq!(&regions[offset..offset + expected.len()], expected.as_slice());
        }
    }

    #[test]
    fn shuffle_groups_are_complete_and_sorted(
        keys in prop::collection::vec((region_strategy(), 0i32..10_000), 0..200),
        partitions in 1usize..8,
    ) {
        let mut expected: BTreeMap<Region, usize> = BTreeMap::new();
        let mut shuffle = LocalShuffle::new(partitions);
        for (i, (region, position)) in keys.into_iter().enumerate() {
            *expected.entry(region.clone()).or_default() += 1;
            shuffle.emit(RegionKey::new(region, position), i);
        }

        let partitioned = shuffle.into_partitions();
        let mut seen: BTreeMap<Region, usize> = BTreeMap::new();
        for (partition, groups) in partitioned.iter().enumerate() {
            for group in groups {
                prop_assert!(!seen.contains_key(&group.region), "region split across groups");
                seen.insert(group.region.clone(), group.entries.len());

                for (key, _) in &group.entries {
                    prop_assert_eq!(key.natural(), &group.region);
                    prop_assert_eq!(key.partition(partitions), partition);
                }
                for pair in group.entries.windows(2) {
                    prop_assert!(pair[0].0.position() <= pair[1].0.position());
                }
            }
        }
        prop_assert_eq!(seen, expected);
    }
}
