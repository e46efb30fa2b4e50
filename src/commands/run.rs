use crate::classify::ReadTypeCounts;
use crate::key::RegionReferenceKey;
use crate::mapper::{map_unit, MapOptions, MapOutput};
use crate::reducer::{build_output_header, write_region_groups};
use crate::region_index::RegionIndex;
use crate::samples::read_samples;
use crate::shuffle::LocalShuffle;
use log::{error, info, warn};
use noodles::sam::alignment::RecordBuf;
use rayon::prelude::*;
use std::io;
use std::path::PathBuf;

/// Configuration for the run command
pub struct RunConfig {
    /// Each input file is one unit of work, fed whole into its own pipeline invocation.
    pub inputs: Vec<String>,
    /// Argument vectors of the stages; the first is the aligner.
    pub stages: Vec<Vec<String>>,
    pub samples: Option<String>,
    pub partitions: usize,
    pub output_dir: PathBuf,
    pub map: MapOptions,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub units: usize,
    pub failed_units: usize,
    pub keyed_records: usize,
    pub unassigned_records: u64,
    pub skipped_templates: u64,
    pub counts: ReadTypeCounts,
    pub outputs: Vec<PathBuf>,
}

fn map_input(path: &str, index: &RegionIndex, config: &RunConfig) -> io::Result<MapOutput> {
    let input = std::fs::read(path).map_err(|e| {
        io::Error::new(e.kind(), format!("Failed to read input '{path}': {e}"))
    })?;
    info!("Mapping {} ({} bytes)", path, input.len());
    Ok(map_unit(input, &config.stages, index, &config.map)?)
}

/// Map every input unit in parallel, shuffle the keyed records by region and write one
/// SAM file per region. A failing unit is reported and skipped; the others still produce
/// output.
pub fn run_pipeline_units(index: &RegionIndex, config: &RunConfig) -> io::Result<RunSummary> {
    let samples = match &config.samples {
        Some(path) => read_samples(path)?,
        None => Vec::new(),
    };

    let results: Vec<(String, io::Result<MapOutput>)> = config
        .inputs
        .par_iter()
        .map(|path| (path.clone(), map_input(path, index, config)))
        .collect();

    let mut summary = RunSummary {
        units: results.len(),
        ..Default::default()
    };
    let mut shuffle: LocalShuffle<RegionReferenceKey, RecordBuf> =
        LocalShuffle::new(config.partitions);
    let mut aligner_header = None;

    for (path, result) in results {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!("Input unit {path} failed: {e}");
                summary.failed_units += 1;
                continue;
            }
        };

        summary.counts.merge(&output.counts);
        summary.unassigned_records += output.unassigned_records;
        summary.skipped_templates += output.skipped_templates;
        summary.keyed_records += output.emitted.len();
        shuffle.extend(output.emitted);

        match &aligner_header {
            None => aligner_header = Some(output.header),
            Some(header) => {
                if header.reference_sequences() != output.header.reference_sequences() {
                    warn!("Input unit {path} was aligned against different reference sequences");
                }
            }
        }
    }

    for (name, count) in summary.counts.non_zero() {
        info!("{name}: {count}");
    }

    if let Some(aligner_header) = aligner_header {
        let header = build_output_header(&aligner_header, &samples)?;
        let groups = shuffle.into_groups();
        info!(
            "Writing {} region groups from {} partitions",
            groups.len(),
            config.partitions.max(1)
        );
        summary.outputs = write_region_groups(&groups, &header, &config.output_dir)?;
    }

    info!(
        "Processed {} units ({} failed): {} keyed records, {} unassigned records, {} region files",
        summary.units,
        summary.failed_units,
        summary.keyed_records,
        summary.unassigned_records,
        summary.outputs.len()
    );
    Ok(summary)
}
