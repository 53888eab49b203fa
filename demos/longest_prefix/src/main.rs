use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yamr::{LongestPrefixReducer, PipelineConfig, PrefixMapper, RunReport, RuntimePipeline};

/// Longest prefix shared by at least two lines of a text file.
#[derive(Parser, Debug)]
#[command(name = "yamr", version)]
struct Args {
    /// Input file with one record per line
    input: PathBuf,
    /// Requested map parallelism
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    map_count: u64,
    /// Number of reduce buckets (one result file each)
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    reduce_count: u64,
    /// Directory for result_<i>.txt files [default: $YAMR_OUTPUT_DIR or .]
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Print the run report as JSON
    #[arg(long)]
    report: bool,
    /// Keep going when individual jobs fail
    #[arg(long)]
    tolerate_failures: bool,
}

fn longest(report: &RunReport) -> Result<usize> {
    let mut best = 0;
    for path in report.artifacts.iter().flatten() {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let value: usize = text
            .trim()
            .parse()
            .with_context(|| format!("parse result in {}", path.display()))?;
        best = best.max(value);
    }
    Ok(best)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    info!(version = yamr::VERSION, "yamr");

    let map_count = usize::try_from(args.map_count).context("map count out of range")?;
    let reduce_count = usize::try_from(args.reduce_count).context("reduce count out of range")?;
    let mut config = PipelineConfig::new(&args.input, map_count, reduce_count)?.apply_env()?;
    if let Some(dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }
    if args.tolerate_failures {
        config = config.with_tolerate_job_failures(true);
    }

    let mut pipeline = RuntimePipeline::new(config);
    let report = pipeline.map_reduce(PrefixMapper, |_| LongestPrefixReducer::new())?;

    println!("{}", longest(&report)?);
    if args.report {
        println!("{}", report.to_json_pretty()?);
    }
    Ok(())
}
