use crate::alignment_record::AlignedRecord;
use crate::classify::{AlignedRead, AlignedReadPair, AlignedReadPairType, ReadTypeCounts};
use crate::key::RegionReferenceKey;
use crate::pipeline::{command_from_argv, run_commands, PipelineError, PipelineOptions};
use crate::region_index::RegionIndex;
use crate::sink::{Sink, SinkError, TemplateSink};
use log::debug;
use noodles::sam;
use noodles::sam::alignment::RecordBuf;
use std::io::Read;

#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub pipeline: PipelineOptions,
    /// Drop templates classified as invalid instead of assigning their records.
    pub skip_invalid: bool,
}

#[derive(Debug, Default)]
pub struct MapOutput {
    /// Header of the aligner output, used to write the per-region files.
    pub header: sam::Header,
    pub emitted: Vec<(RegionReferenceKey, RecordBuf)>,
    pub counts: ReadTypeCounts,
    /// Records that overlap no region (including every unmapped record).
    pub unassigned_records: u64,
    pub skipped_templates: u64,
}

/// Classifies each template and emits one keyed record per overlapping region.
struct TemplateAssigner<'a> {
    index: &'a RegionIndex,
    skip_invalid: bool,
    output: MapOutput,
}

impl<'a> TemplateAssigner<'a> {
    fn new(index: &'a RegionIndex, skip_invalid: bool) -> Self {
        Self {
            index,
            skip_invalid,
            output: MapOutput::default(),
        }
    }

    fn handle_template(&mut self, records: Vec<AlignedRecord>) -> Result<(), SinkError> {
        let records = if records.iter().any(|r| r.is_paired()) {
            let pair = AlignedReadPair::new(records);
            self.output.counts.record_pair(&pair);
            if self.skip_invalid && pair.pair_type() == AlignedReadPairType::Invalid {
                self.output.skipped_templates += 1;
                return Ok(());
            }
            pair.into_records()
        } else {
            let read = AlignedRead::new(records);
            self.output.counts.record_read(read.read_type());
            if self.skip_invalid && !read.is_valid() {
                self.output.skipped_templates += 1;
                return Ok(());
            }
            read.into_records()
        };

        for record in records {
            self.assign(record);
        }
        Ok(())
    }

    fn assign(&mut self, record: AlignedRecord) {
        let regions = self.index.retrieve_overlaps(&record);
        if regions.is_empty() {
            self.output.unassigned_records += 1;
            return;
        }

        let reference_id = record.reference_id().and_then(|id| u32::try_from(id).ok());
        let position = record.start();
        let record = record.into_record();
        for region in regions {
            let key = RegionReferenceKey::new(region.clone(), reference_id, position);
            self.output.emitted.push((key, record.clone()));
        }
    }
}

/// Map one input unit: run the stages over `input`, classify the aligner's templates and
/// key every record by each region it overlaps.
pub fn map_unit(
    input: Vec<u8>,
    stages: &[Vec<String>],
    index: &RegionIndex,
    options: &MapOptions,
) -> Result<MapOutput, PipelineError> {
    let mut commands = stages
        .iter()
        .map(|argv| command_from_argv(argv).ok_or(PipelineError::EmptyChain))
        .collect::<Result<Vec<_>, _>>()?;

    let mut assigner = TemplateAssigner::new(index, options.skip_invalid);
    let mut sink = TemplateSink::new(|records: Vec<AlignedRecord>| assigner.handle_template(records));
    run_commands(input, &mut sink, &mut commands, &options.pipeline)?;
    let header = sink.into_header().unwrap_or_default();

    let mut output = assigner.output;
    output.header = header;
    debug!(
        "Mapped unit: {} keyed records, {} unassigned, {} skipped templates",
        output.emitted.len(),
        output.unassigned_records,
        output.skipped_templates
    );
    Ok(output)
}

/// Assign already-aligned SAM text without running any external stage.
pub fn map_aligned<R: Read>(
    reader: R,
    index: &RegionIndex,
    skip_invalid: bool,
) -> Result<MapOutput, SinkError> {
    let mut assigner = TemplateAssigner::new(index, skip_invalid);
    let mut sink = TemplateSink::new(|records: Vec<AlignedRecord>| assigner.handle_template(records));
    sink.handle_stream(reader)?;
    let header = sink.into_header().unwrap_or_default();

    let mut output = assigner.output;
    output.header = header;
    Ok(output)
}
