//! Composite shuffle keys.
//!
//! A key is a [`Region`] (the natural key) plus a coordinate tiebreak. Partitioning and
//! grouping look only at the region, sorting looks at the whole key, so each region's
//! records reach one partition as one group, in coordinate order.

use crate::region::Region;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHasher;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};

/// The three shuffle hooks, all derived from `natural()` and the key's `Ord`.
pub trait ShuffleKey: Ord + Sized {
    fn natural(&self) -> &Region;

    fn partition(&self, partitions: usize) -> usize {
        partition_for(self.natural(), partitions)
    }

    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn group_cmp(&self, other: &Self) -> Ordering {
        self.natural().cmp(other.natural())
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn decode<R: Read>(reader: &mut R) -> io::Result<Self>;
}

/// Partition of a region among `partitions` buckets. Uses a fixed-seed hasher so every
/// process agrees on the assignment.
pub fn partition_for(region: &Region, partitions: usize) -> usize {
    let mut hasher = FxHasher::default();
    region.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// Region plus the record's alignment start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    region: Region,
    position: i32,
}

impl RegionKey {
    pub fn new(region: Region, position: i32) -> Self {
        Self { region, position }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn position(&self) -> i32 {
        self.position
    }
}

impl ShuffleKey for RegionKey {
    fn natural(&self) -> &Region {
        &self.region
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_region(writer, &self.region)?;
        writer.write_i32::<BigEndian>(self.position)
    }

    fn decode<R: Read>(reader: &mut R) -> io::Result<Self> {
        let region = read_region(reader)?;
        let position = reader.read_i32::<BigEndian>()?;
        Ok(Self { region, position })
    }
}

/// Region plus reference sequence index and alignment start.
///
/// Within a region, keys are ordered by reference index, then position. Keys without a
/// reference index (unmapped records) come after every key that has one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionReferenceKey {
    region: Region,
    reference_id: Option<u32>,
    position: i32,
}

impl RegionReferenceKey {
    pub fn new(region: Region, reference_id: Option<u32>, position: i32) -> Self {
        Self {
            region,
            reference_id,
            position,
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn reference_id(&self) -> Option<u32> {
        self.reference_id
    }

    pub fn position(&self) -> i32 {
        self.position
    }
}

fn cmp_reference_ids(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Ord for RegionReferenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.region
            .cmp(&other.region)
            .then_with(|| cmp_reference_ids(self.reference_id, other.reference_id))
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for RegionReferenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ShuffleKey for RegionReferenceKey {
    fn natural(&self) -> &Region {
        &self.region
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_region(writer, &self.region)?;
        let reference_id = match self.reference_id {
            Some(id) => i32::try_from(id).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Reference index {id} does not fit the key encoding"),
                )
            })?,
            None => -1,
        };
        writer.write_i32::<BigEndian>(reference_id)?;
        writer.write_i32::<BigEndian>(self.position)
    }

    fn decode<R: Read>(reader: &mut R) -> io::Result<Self> {
        let region = read_region(reader)?;
        let reference_id = match reader.read_i32::<BigEndian>()? {
            -1 => None,
            id => Some(u32::try_from(id).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid encoded reference index {id}"),
                )
            })?),
        };
        let position = reader.read_i32::<BigEndian>()?;
        Ok(Self {
            region,
            reference_id,
            position,
        })
    }
}

/// Region layout: u16 byte length, UTF-8 contig, start, end (all big-endian).
fn write_region<W: Write>(writer: &mut W, region: &Region) -> io::Result<()> {
    let contig = region.contig().as_bytes();
    let len = u16::try_from(contig.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Contig name of {} bytes is too long to encode", contig.len()),
        )
    })?;
    writer.write_u16::<BigEndian>(len)?;
    writer.write_all(contig)?;
    writer.write_i32::<BigEndian>(region.start())?;
    writer.write_i32::<BigEndian>(region.end())
}

fn read_region<R: Read>(reader: &mut R) -> io::Result<Region> {
    let len = reader.read_u16::<BigEndian>()? as usize;
    let mut contig = vec![0u8; len];
    reader.read_exact(&mut contig)?;
    let contig = String::from_utf8(contig)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let start = reader.read_i32::<BigEndian>()?;
    let end = reader.read_i32::<BigEndian>()?;
    Region::new(contig, start, end).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn region(contig: &str, start: i32, end: i32) -> Region {
        Region::new(contig, start, end).unwrap()
    }

    #[test]
    fn test_region_key_wire_layout() {
        let key = RegionKey::new(region("chr1", 100, 200), 150);
        let mut bytes = Vec::new();
        key.encode(&mut bytes).unwrap();
        assert_eq!(
            bytes,
            vec![
                0, 4, b'c', b'h', b'r', b'1', // contig
                0, 0, 0, 100, // start
                0, 0, 0, 200, // end
                0, 0, 0, 150, // position
            ]
        );
        assert_eq!(RegionKey::decode(&mut Cursor::new(bytes)).unwrap(), key);
    }

    #[test]
    fn test_reference_key_wire_layout() {
        let key = RegionReferenceKey::new(region("X", 1, 2), Some(3), 1);
        let mut bytes = Vec::new();
        key.encode(&mut bytes).unwrap();
        assert_eq!(
            bytes,
            vec![0, 1, b'X', 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 1]
        );

        let unmapped = RegionReferenceKey::new(region("X", 1, 2), None, 0);
        let mut bytes = Vec::new();
        unmapped.encode(&mut bytes).unwrap();
        assert_eq!(&bytes[11..15], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(
            RegionReferenceKey::decode(&mut Cursor::new(bytes)).unwrap(),
            unmapped
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        // Truncated after the contig
        let err = RegionKey::decode(&mut Cursor::new(vec![0, 1, b'X', 0, 0])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        // End before start
        let bytes = vec![0, 1, b'X', 0, 0, 0, 9, 0, 0, 0, 2, 0, 0, 0, 3];
        let err = RegionKey::decode(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_encode_rejects_oversized_contig() {
        let name = "c".repeat(u16::MAX as usize + 1);
        let key = RegionKey::new(region(&name, 1, 1), 1);
        let err = key.encode(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_hooks_share_the_natural_key() {
        let a = RegionKey::new(region("chr1", 100, 200), 180);
        let b = RegionKey::new(region("chr1", 100, 200), 120);
        let c = RegionKey::new(region("chr1", 100, 201), 90);

        assert_eq!(a.group_cmp(&b), Ordering::Equal);
        assert_eq!(a.partition(7), b.partition(7));
        assert_eq!(b.sort_cmp(&a), Ordering::Less);
        // Region order wins over the position
        assert_eq!(a.sort_cmp(&c), Ordering::Less);
        assert_ne!(a.group_cmp(&c), Ordering::Equal);
    }

    #[test]
    fn test_partition_is_in_range() {
        let key = RegionKey::new(region("chr7", 5, 50), 10);
        for partitions in 1..20 {
            assert!(key.partition(partitions) < partitions);
        }
        assert_eq!(key.partition(0), 0);
    }

    #[test]
    fn test_missing_reference_sorts_last() {
        let r = region("chr1", 1, 100);
        let mut keys = vec![
            RegionReferenceKey::new(r.clone(), None, 0),
            RegionReferenceKey::new(r.clone(), Some(1), 5),
            RegionReferenceKey::new(r.clone(), Some(0), 50),
            RegionReferenceKey::new(r.clone(), Some(0), 10),
        ];
        keys.sort_by(|a, b| a.sort_cmp(b));
        let order: Vec<(Option<u32>, i32)> =
            keys.iter().map(|k| (k.reference_id(), k.position())).collect();
        assert_eq!(
            order,
            vec![(Some(0), 10), (Some(0), 50), (Some(1), 5), (None, 0)]
        );
    }
}
