//! Classification of the records an aligner emits for one read or read pair.

use crate::alignment_record::AlignedRecord;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlignedReadType {
    Unmapped,
    Mapped,
    Multimapped,
    /// Only secondary/supplementary records mapped, the primary did not.
    MultimappedSupplementaryOnly,
    Invalid,
}

impl AlignedReadType {
    pub const ALL: [AlignedReadType; 5] = [
        AlignedReadType::Unmapped,
        AlignedReadType::Mapped,
        AlignedReadType::Multimapped,
        AlignedReadType::MultimappedSupplementaryOnly,
        AlignedReadType::Invalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlignedReadType::Unmapped => "UNMAPPED",
            AlignedReadType::Mapped => "MAPPED",
            AlignedReadType::Multimapped => "MULTIMAPPED",
            AlignedReadType::MultimappedSupplementaryOnly => "MULTIMAPPED_SUPPLEMENTARY_ONLY",
            AlignedReadType::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for AlignedReadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlignedReadPairType {
    BothUnmapped,
    BothMapped,
    BothMultimapped,
    BothMultimappedSupplementaryOnly,
    OneUnmappedOneMapped,
    OneUnmappedOneMultimapped,
    OneUnmappedOneMultimappedSupplementaryOnly,
    OneMappedOneMultimapped,
    OneMappedOneMultimappedSupplementaryOnly,
    OneMultimappedOneMultimappedSupplementaryOnly,
    Invalid,
}

impl AlignedReadPairType {
    pub const ALL: [AlignedReadPairType; 11] = [
        AlignedReadPairType::BothUnmapped,
        AlignedReadPairType::BothMapped,
        AlignedReadPairType::BothMultimapped,
        AlignedReadPairType::BothMultimappedSupplementaryOnly,
        AlignedReadPairType::OneUnmappedOneMapped,
        AlignedReadPairType::OneUnmappedOneMultimapped,
        AlignedReadPairType::OneUnmappedOneMultimappedSupplementaryOnly,
        AlignedReadPairType::OneMappedOneMultimapped,
        AlignedReadPairType::OneMappedOneMultimappedSupplementaryOnly,
        AlignedReadPairType::OneMultimappedOneMultimappedSupplementaryOnly,
        AlignedReadPairType::Invalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlignedReadPairType::BothUnmapped => "BOTH_UNMAPPED",
            AlignedReadPairType::BothMapped => "BOTH_MAPPED",
            AlignedReadPairType::BothMultimapped => "BOTH_MULTIMAPPED",
            AlignedReadPairType::BothMultimappedSupplementaryOnly => {
                "BOTH_MULTIMAPPED_SUPPLEMENTARY_ONLY"
            }
            AlignedReadPairType::OneUnmappedOneMapped => "ONE_UNMAPPED_ONE_MAPPED",
            AlignedReadPairType::OneUnmappedOneMultimapped => "ONE_UNMAPPED_ONE_MULTIMAPPED",
            AlignedReadPairType::OneUnmappedOneMultimappedSupplementaryOnly => {
                "ONE_UNMAPPED_ONE_MULTIMAPPED_SUPPLEMENTARY_ONLY"
            }
            AlignedReadPairType::OneMappedOneMultimapped => "ONE_MAPPED_ONE_MULTIMAPPED",
            AlignedReadPairType::OneMappedOneMultimappedSupplementaryOnly => {
                "ONE_MAPPED_ONE_MULTIMAPPED_SUPPLEMENTARY_ONLY"
            }
            AlignedReadPairType::OneMultimappedOneMultimappedSupplementaryOnly => {
                "ONE_MULTIMAPPED_ONE_MULTIMAPPED_SUPPLEMENTARY_ONLY"
            }
            AlignedReadPairType::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for AlignedReadPairType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify all records of a single read.
///
/// Exactly one primary (non-secondary, non-supplementary) record must be present, and for
/// paired reads every record must belong to the same mate as the primary.
pub fn classify(records: &[AlignedRecord]) -> AlignedReadType {
    let mut primaries = records.iter().filter(|r| !r.is_secondary_or_supplementary());
    let primary = match (primaries.next(), primaries.next()) {
        (Some(primary), None) => primary,
        _ => return AlignedReadType::Invalid,
    };

    if primary.is_paired()
        && records
            .iter()
            .any(|r| r.is_paired() && r.is_first_of_pair() != primary.is_first_of_pair())
    {
        return AlignedReadType::Invalid;
    }

    match (records.len(), primary.is_unmapped()) {
        (1, true) => AlignedReadType::Unmapped,
        (1, false) => AlignedReadType::Mapped,
        (_, true) => AlignedReadType::MultimappedSupplementaryOnly,
        (_, false) => AlignedReadType::Multimapped,
    }
}

/// Combine the types of both mates. Symmetric in its arguments.
pub fn classify_pair(first: AlignedReadType, second: AlignedReadType) -> AlignedReadPairType {
    use AlignedReadPairType as P;
    use AlignedReadType as T;

    let (a, b) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };
    match (a, b) {
        (T::Invalid, _) | (_, T::Invalid) => P::Invalid,
        (T::Unmapped, T::Unmapped) => P::BothUnmapped,
        (T::Mapped, T::Mapped) => P::BothMapped,
        (T::Multimapped, T::Multimapped) => P::BothMultimapped,
        (T::MultimappedSupplementaryOnly, T::MultimappedSupplementaryOnly) => {
            P::BothMultimappedSupplementaryOnly
        }
        (T::Unmapped, T::Mapped) => P::OneUnmappedOneMapped,
        (T::Unmapped, T::Multimapped) => P::OneUnmappedOneMultimapped,
        (T::Unmapped, T::MultimappedSupplementaryOnly) => {
            P::OneUnmappedOneMultimappedSupplementaryOnly
        }
        (T::Mapped, T::Multimapped) => P::OneMappedOneMultimapped,
        (T::Mapped, T::MultimappedSupplementaryOnly) => P::OneMappedOneMultimappedSupplementaryOnly,
        (T::Multimapped, T::MultimappedSupplementaryOnly) => {
            P::OneMultimappedOneMultimappedSupplementaryOnly
        }
        // Unreachable after ordering the pair
        _ => P::Invalid,
    }
}

/// The records of one read with the primary record first.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    records: Vec<AlignedRecord>,
    read_type: AlignedReadType,
}

impl AlignedRead {
    pub fn new(mut records: Vec<AlignedRecord>) -> Self {
        if let Some(i) = records
            .iter()
            .position(|r| !r.is_secondary_or_supplementary())
        {
            records[..=i].rotate_right(1);
        }
        let read_type = classify(&records);
        Self { records, read_type }
    }

    pub fn read_type(&self) -> AlignedReadType {
        self.read_type
    }

    pub fn is_valid(&self) -> bool {
        self.read_type != AlignedReadType::Invalid
    }

    pub fn primary(&self) -> Option<&AlignedRecord> {
        if self.is_valid() {
            self.records.first()
        } else {
            None
        }
    }

    /// Secondary and supplementary records, `None` for an invalid read.
    pub fn supplementary(&self) -> Option<&[AlignedRecord]> {
        if self.is_valid() {
            Some(&self.records[1..])
        } else {
            None
        }
    }

    pub fn records(&self) -> &[AlignedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AlignedRecord> {
        self.records
    }
}

/// Both mates of a template, split on the first-of-pair flag.
#[derive(Debug, Clone)]
pub struct AlignedReadPair {
    first: AlignedRead,
    second: AlignedRead,
    pair_type: AlignedReadPairType,
}

impl AlignedReadPair {
    pub fn new(records: Vec<AlignedRecord>) -> Self {
        let (first, second): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.is_first_of_pair());
        let first = AlignedRead::new(first);
        let second = AlignedRead::new(second);
        let pair_type = classify_pair(first.read_type(), second.read_type());
        Self {
            first,
            second,
            pair_type,
        }
    }

    pub fn first(&self) -> &AlignedRead {
        &self.first
    }

    pub fn second(&self) -> &AlignedRead {
        &self.second
    }

    pub fn pair_type(&self) -> AlignedReadPairType {
        self.pair_type
    }

    pub fn into_records(self) -> Vec<AlignedRecord> {
        let mut records = self.first.into_records();
        records.extend(self.second.into_records());
        records
    }
}

/// Per-category counters, mergeable across workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadTypeCounts {
    reads: [u64; 5],
    pairs: [u64; 11],
}

impl ReadTypeCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&mut self, read_type: AlignedReadType) {
        self.reads[read_type as usize] += 1;
    }

    pub fn record_pair(&mut self, pair: &AlignedReadPair) {
        self.record_read(pair.first().read_type());
        self.record_read(pair.second().read_type());
        self.pairs[pair.pair_type() as usize] += 1;
    }

    pub fn reads(&self, read_type: AlignedReadType) -> u64 {
        self.reads[read_type as usize]
    }

    pub fn pairs(&self, pair_type: AlignedReadPairType) -> u64 {
        self.pairs[pair_type as usize]
    }

    pub fn merge(&mut self, other: &ReadTypeCounts) {
        for (a, b) in self.reads.iter_mut().zip(other.reads.iter()) {
            *a += b;
        }
        for (a, b) in self.pairs.iter_mut().zip(other.pairs.iter()) {
            *a += b;
        }
    }

    /// Non-zero counters as `(name, count)`, reads first.
    pub fn non_zero(&self) -> Vec<(&'static str, u64)> {
        let reads = AlignedReadType::ALL
            .iter()
            .map(|t| (t.as_str(), self.reads(*t)));
        let pairs = AlignedReadPairType::ALL
            .iter()
            .map(|t| (t.as_str(), self.pairs(*t)));
        reads
            .chain(pairs)
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}
