use noodles::core::Position;
use noodles::sam;
use noodles::sam::alignment::record::cigar::op::{Kind, Op};
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::RecordBuf;
use std::io;

/// A typed view over one aligner output record.
///
/// Carries the fields needed for region assignment and read classification next to the
/// parsed SAM record itself, which is handed on unchanged to the reduce stage.
///
/// ## Coordinates
/// - `start`: 1-based leftmost mapped position (`0` when the record has no position)
/// - `end`: inclusive end computed from the reference-consuming CIGAR operations
#[derive(Debug, Clone)]
pub struct AlignedRecord {
    name: Option<String>,
    contig: Option<String>,
    reference_id: Option<usize>,
    start: i32,
    end: i32,
    flags: Flags,
    record: RecordBuf,
}

impl AlignedRecord {
    /// Build the typed view from a parsed record, resolving the contig name through the header.
    pub fn from_record_buf(header: &sam::Header, record: RecordBuf) -> io::Result<Self> {
        let reference_id = record.reference_sequence_id();
        let contig = match reference_id {
            Some(id) => {
                let (name, _) = header.reference_sequences().get_index(id).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Reference sequence index {id} is missing from the SAM header"),
                    )
                })?;
                Some(name.to_string())
            }
            None => None,
        };

        let start = match record.alignment_start() {
            Some(position) => i32::try_from(usize::from(position)).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Alignment start does not fit a 32-bit coordinate",
                )
            })?,
            None => 0,
        };
        let span = reference_span(record.cigar().as_ref());
        let end = if span > 0 && !record.flags().is_unmapped() {
            start + span - 1
        } else {
            start
        };

        Ok(Self {
            name: record.name().map(|name| name.to_string()),
            contig,
            reference_id,
            start,
            end,
            flags: record.flags(),
            record,
        })
    }

    /// Build a record directly from its attributes. The backing SAM record gets a single
    /// match operation spanning `start..=end` when mapped.
    pub fn new(
        name: Option<&str>,
        contig: Option<&str>,
        reference_id: Option<usize>,
        start: i32,
        end: i32,
        flags: Flags,
    ) -> Self {
        let mut record = RecordBuf::default();
        if let Some(name) = name {
            record.name_mut().replace(name.into());
        }
        *record.flags_mut() = flags;
        *record.reference_sequence_id_mut() = reference_id;
        *record.alignment_start_mut() = usize::try_from(start).ok().and_then(Position::new);
        if !flags.is_unmapped() && end >= start && start > 0 {
            record
                .cigar_mut()
                .as_mut()
                .push(Op::new(Kind::Match, (end - start + 1) as usize));
        }

        Self {
            name: name.map(str::to_string),
            contig: contig.map(str::to_string),
            reference_id,
            start,
            end,
            flags,
            record,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Contig name, `None` for records without a reference sequence.
    pub fn contig(&self) -> Option<&str> {
        self.contig.as_deref()
    }

    pub fn reference_id(&self) -> Option<usize> {
        self.reference_id
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_unmapped(&self) -> bool {
        self.flags.is_unmapped()
    }

    pub fn is_secondary_or_supplementary(&self) -> bool {
        self.flags.is_secondary() || self.flags.is_supplementary()
    }

    pub fn is_paired(&self) -> bool {
        self.flags.is_segmented()
    }

    pub fn is_first_of_pair(&self) -> bool {
        self.flags.is_first_segment()
    }

    pub fn record(&self) -> &RecordBuf {
        &self.record
    }

    pub fn into_record(self) -> RecordBuf {
        self.record
    }
}

/// Number of reference bases covered by a list of CIGAR operations
fn reference_span(ops: &[Op]) -> i32 {
    ops.iter()
        .filter(|op| {
            matches!(
                op.kind(),
                Kind::Match
                    | Kind::Deletion
                    | Kind::Skip
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch
            )
        })
        .map(|op| op.len() as i32)
        .sum()
}
