use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yamr::io::{artifact_path, hash_to_partition, write_artifact};
use yamr::{LongestPrefixReducer, Mapper, PrefixMapper, Reducer};

#[derive(Parser, Debug)]
#[command(name = "yamr-naive", version)]
struct Args {
    input: PathBuf,
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    reduce_count: u64,
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let buckets = usize::try_from(args.reduce_count).context("reduce count out of range")?;

    let bytes = fs::read(&args.input).with_context(|| format!("read {}", args.input.display()))?;
    let lines: Vec<Cow<'_, str>> = bytes
        .split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .filter(|l| !l.is_empty())
        .map(String::from_utf8_lossy)
        .collect();

    // map: every prefix, bucketed with the same hash the engine uses
    let mapped: Vec<Vec<Vec<String>>> = lines
        .par_iter()
        .map(|line| {
            let mut local: Vec<Vec<String>> = vec![Vec::new(); buckets];
            PrefixMapper.do_map(line, &mut |p: String| {
                let bucket = hash_to_partition(p.as_bytes(), buckets);
                local[bucket].push(p);
            })?;
            Ok(local)
        })
        .collect::<Result<_>>()?;

    let mut grouped: Vec<Vec<String>> = vec![Vec::new(); buckets];
    for local in mapped {
        for (bucket, mut elements) in local.into_iter().enumerate() {
            grouped[bucket].append(&mut elements);
        }
    }

    let mut best = 0;
    for (bucket, elements) in grouped.iter().enumerate() {
        let mut reducer = LongestPrefixReducer::new();
        for element in elements {
            reducer.do_reduce(element)?;
        }
        let result = reducer.finish();
        write_artifact(artifact_path(&args.output_dir, bucket), &result)?;
        best = best.max(result);
    }
    info!(lines = lines.len(), buckets, "naive run complete");
    println!("{}", best);
    Ok(())
}
