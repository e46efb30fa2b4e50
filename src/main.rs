use clap::Parser;
use log::info;
use rayon::ThreadPoolBuilder;
use regalign::commands::index::{load_index, write_stats};
use regalign::commands::query::{parse_range, write_overlaps};
use regalign::commands::run::{run_pipeline_units, RunConfig};
use regalign::mapper::MapOptions;
use regalign::pipeline::PipelineOptions;
use regalign::region_index::RegionIndex;
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

fn default_threads() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Path to the BED file with the target regions. A `<bed>.ridx` index is looked for or generated next to it.
    #[clap(short = 'r', long, value_parser)]
    regions: String,

    /// Force the regeneration of the index, even if it already exists.
    #[clap(short = 'I', long, action)]
    force_reindex: bool,

    /// Number of threads for parallel processing.
    #[clap(short = 't', long, value_parser, default_value_t = default_threads())]
    num_threads: NonZeroUsize,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Assign aligned reads to target regions, streaming reads through an external aligner.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Load or build the region index and print statistics
    Index {
        #[clap(flatten)]
        common: CommonOpts,
    },
    /// List the regions overlapping a range
    Query {
        #[clap(flatten)]
        common: CommonOpts,

        /// Range in the format `contig:start-end` (1-based, inclusive)
        #[clap(short = 'R', long, value_parser)]
        range: String,
    },
    /// Align the inputs and write one SAM file per region
    Run {
        #[clap(flatten)]
        common: CommonOpts,

        /// Input read files; each one is streamed whole through its own pipeline
        #[clap(short = 'i', long, value_parser, num_args = 1.., required = true)]
        input: Vec<String>,

        /// Aligner command line (reads stdin, writes SAM to stdout), split on whitespace
        #[clap(short = 'a', long, value_parser)]
        aligner: String,

        /// Additional stage after the aligner, split on whitespace (repeatable)
        #[clap(long, value_parser)]
        stage: Vec<String>,

        /// Sample sheet (CSV) whose lanes are added as read groups to the output header
        #[clap(short = 's', long, value_parser)]
        samples: Option<String>,

        /// Number of shuffle partitions
        #[clap(short = 'p', long, value_parser, default_value_t = 1)]
        partitions: usize,

        /// Output directory for the per-region SAM files
        #[clap(short = 'o', long, value_parser, default_value = "regions")]
        output_dir: PathBuf,

        /// Kill the pipeline of an input if it runs longer than this many seconds
        #[clap(long, value_parser)]
        timeout_secs: Option<u64>,

        /// Accept non-zero exit codes from pipeline stages
        #[clap(long, action)]
        allow_nonzero_exit: bool,

        /// Drop reads whose records cannot be classified instead of assigning them
        #[clap(long, action)]
        skip_invalid: bool,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::Index { common } => {
            let index = initialize_index(&common)?;
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            write_stats(&index, &mut out)?;
            out.flush()?;
        }
        Args::Query { common, range } => {
            let index = initialize_index(&common)?;
            let (contig, start, end) = parse_range(&range)?;
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let n = write_overlaps(&index, &contig, start, end, &mut out)?;
            out.flush()?;
            info!("Found {} overlapping regions", n);
        }
        Args::Run {
            common,
            input,
            aligner,
            stage,
            samples,
            partitions,
            output_dir,
            timeout_secs,
            allow_nonzero_exit,
            skip_invalid,
        } => {
            let index = initialize_index(&common)?;
            let stages: Vec<Vec<String>> = std::iter::once(&aligner)
                .chain(stage.iter())
                .map(|command| command.split_whitespace().map(str::to_string).collect())
                .collect();
            if stages.iter().any(Vec::is_empty) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Pipeline stages must not be empty",
                ));
            }

            let config = RunConfig {
                inputs: input,
                stages,
                samples,
                partitions,
                output_dir,
                map: MapOptions {
                    pipeline: PipelineOptions {
                        check_exit_status: !allow_nonzero_exit,
                        timeout: timeout_secs.map(Duration::from_secs),
                    },
                    skip_invalid,
                },
            };
            let summary = run_pipeline_units(&index, &config)?;
            if summary.failed_units > 0 {
                return Err(io::Error::other(format!(
                    "{} of {} input units failed",
                    summary.failed_units, summary.units
                )));
            }
        }
    }

    Ok(())
}

/// Initialize logging and the global thread pool
fn initialize(common: &CommonOpts) -> io::Result<()> {
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    ThreadPoolBuilder::new()
        .num_threads(common.num_threads.into())
        .build_global()
        .map_err(io::Error::other)
}

fn initialize_index(common: &CommonOpts) -> io::Result<RegionIndex> {
    initialize(common)?;
    load_index(&common.regions, common.force_reindex)
}
