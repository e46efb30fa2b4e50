use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive, 1-based genomic interval on a single contig.
///
/// Equality, hashing and ordering are all defined on `(contig, start, end)` in that
/// order; every shuffle hook in [`crate::key`] projects onto this same definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    contig: String,
    start: i32,
    end: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    EmptyContig,
    InvalidStart(i32),
    EndBeforeStart { start: i32, end: i32 },
    /// A 0-based start that has no 1-based counterpart in 32 bits.
    StartOverflow(i32),
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::EmptyContig => write!(f, "Region contig name is empty"),
            RegionError::InvalidStart(start) => {
                write!(f, "Region start must be 1 or higher (got {start})")
            }
            RegionError::EndBeforeStart { start, end } => {
                write!(f, "Region end ({end}) lies before its start ({start})")
            }
            RegionError::StartOverflow(start) => {
                write!(f, "Region start {start} is too large to convert to 1-based")
            }
        }
    }
}

impl std::error::Error for RegionError {}

impl Region {
    pub fn new(contig: impl Into<String>, start: i32, end: i32) -> Result<Self, RegionError> {
        let contig = contig.into();
        if contig.is_empty() {
            return Err(RegionError::EmptyContig);
        }
        if start < 1 {
            return Err(RegionError::InvalidStart(start));
        }
        if end < start {
            return Err(RegionError::EndBeforeStart { start, end });
        }
        Ok(Self { contig, start, end })
    }

    /// Convert a BED-style 0-based, end-exclusive range into an inclusive 1-based region.
    /// A missing end yields a single-base region.
    pub fn from_bed(contig: impl Into<String>, start: i32, end: Option<i32>) -> Result<Self, RegionError> {
        let start = start
            .checked_add(1)
            .ok_or(RegionError::StartOverflow(start))?;
        Self::new(contig, start, end.unwrap_or(start))
    }

    pub fn contig(&self) -> &str {
        &self.contig
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn len(&self) -> i32 {
        self.end - self.start + 1
    }

    /// Inclusive overlap test on the same contig.
    pub fn overlaps(&self, contig: &str, start: i32, end: i32) -> bool {
        self.contig == contig && self.start <= end && self.end >= start
    }

    /// File stem used for the per-region output of the reduce stage.
    pub fn output_name(&self) -> String {
        format!("{}-{}-{}", self.contig, self.start, self.end)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.contig, self.start, self.end)
    }
}
