use crate::api::{Mapper, Reducer, ReducerFactory};
use crate::config::PipelineConfig;
use crate::error::{Error, JobError, PoolError, Result};
use crate::io::{artifact_path, for_each_line_in, hash_to_partition, write_artifact, LineScan};
use crate::pool::WorkerPool;
use crate::split::{split_file, Partition};
use crate::stats::{RunReport, StageStats};
use anyhow::Context;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pipeline state. A run moves through every stage in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Splitting,
    Mapping,
    Shuffling,
    Reducing,
    Done,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Idle => Some(Stage::Splitting),
            Stage::Splitting => Some(Stage::Mapping),
            Stage::Mapping => Some(Stage::Shuffling),
            Stage::Shuffling => Some(Stage::Reducing),
            Stage::Reducing => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Splitting => "splitting",
            Stage::Mapping => "mapping",
            Stage::Shuffling => "shuffling",
            Stage::Reducing => "reducing",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type StageJob<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send + 'static>;

struct StageOutcome<T> {
    results: Vec<Result<T, JobError>>,
    stats: StageStats,
}

struct MapOutput<E> {
    elements: Vec<E>,
    scan: LineScan,
}

/// Split → Map → Shuffle → Reduce over a single input file.
///
/// Every stage runs on the pipeline's worker pool, restarted with the stage's
/// worker count and stopped (all workers joined) before the next stage starts.
pub struct RuntimePipeline {
    config: PipelineConfig,
    pool: WorkerPool,
    stage: Stage,
}

impl RuntimePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            pool: WorkerPool::new(),
            stage: Stage::Idle,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage reached by the last run; a failed run stays at the stage that failed.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn completed_jobs(&self) -> usize {
        self.pool.completed_jobs()
    }

    pub fn map_reduce<M, F>(&mut self, mapper: M, reducers: F) -> Result<RunReport>
    where
        M: Mapper + Send + Sync + 'static,
        F: ReducerFactory,
        F::Reducer: Reducer<Element = M::Element>,
    {
        self.config.validate()?;
        let run_start = Instant::now();
        self.stage = Stage::Idle;
        let mut report = RunReport {
            input: self.config.input.clone(),
            requested_map_parallelism: self.config.map_parallelism,
            reduce_parallelism: self.config.reduce_parallelism,
            ..RunReport::default()
        };

        info!(
            input = %self.config.input.display(),
            map_parallelism = self.config.map_parallelism,
            reduce_parallelism = self.config.reduce_parallelism,
            output_dir = %self.config.output_dir.display(),
            "yamr pipeline starting"
        );

        self.advance(Stage::Splitting);
        let partitions = self.split(&mut report)?;

        self.advance(Stage::Mapping);
        let mapped = self.map(&partitions, Arc::new(mapper), &mut report)?;

        self.advance(Stage::Shuffling);
        let buckets = self.shuffle(mapped, &mut report)?;

        self.advance(Stage::Reducing);
        let artifacts = self.reduce(buckets, Arc::new(reducers), &mut report)?;
        report.artifacts = artifacts;

        self.advance(Stage::Done);
        report.wall_ms = run_start.elapsed().as_millis() as u64;
        info!(
            partitions = report.partitions,
            buckets = report.reduce_parallelism,
            failed_jobs = report.failed_jobs(),
            wall_ms = report.wall_ms,
            "yamr pipeline complete"
        );
        Ok(report)
    }

    fn advance(&mut self, next: Stage) {
        debug_assert_eq!(self.stage.next(), Some(next));
        debug_assert!(!self.pool.is_running());
        info!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }

    fn split(&mut self, report: &mut RunReport) -> Result<Vec<Partition>> {
        let input = &self.config.input;
        let input_error = |source| Error::Input {
            path: input.clone(),
            source,
        };
        let metadata = fs::metadata(input).map_err(input_error)?;
        if !metadata.is_file() {
            return Err(input_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        File::open(input).map_err(input_error)?;

        let started = Instant::now();
        let partitions = split_file(input, self.config.map_parallelism).map_err(Error::Split)?;
        report.input_bytes = metadata.len();
        report.partitions = partitions.len();
        report.map_parallelism = partitions.len();
        for partition in &partitions {
            debug_assert!(!partition.is_empty());
            debug!(
                partition = partition.index,
                start = partition.start,
                bytes = partition.len(),
                "partition planned"
            );
        }

        let mut stats = StageStats::new(Stage::Splitting, 1, 1);
        stats.elements = partitions.len() as u64;
        stats.wall_ms = started.elapsed().as_millis() as u64;
        info!(
            phase = "split",
            bytes = metadata.len(),
            requested = self.config.map_parallelism,
            partitions = partitions.len(),
            wall_ms = stats.wall_ms,
            "Split phase complete"
        );
        report.stages.push(stats);
        Ok(partitions)
    }

    fn map<M>(
        &mut self,
        partitions: &[Partition],
        mapper: Arc<M>,
        report: &mut RunReport,
    ) -> Result<Vec<Vec<M::Element>>>
    where
        M: Mapper + Send + Sync + 'static,
    {
        let jobs: Vec<StageJob<MapOutput<M::Element>>> = partitions
            .iter()
            .map(|&partition| {
                let mapper = Arc::clone(&mapper);
                let input = self.config.input.clone();
                Box::new(move || map_partition(&input, &partition, mapper.as_ref())) as StageJob<_>
            })
            .collect();

        let outcome = self.run_stage(partitions.len(), jobs)?;
        let (outputs, mut stats) = self.settle(outcome)?;

        let mut mapped = Vec::with_capacity(outputs.len());
        for output in outputs {
            match output {
                Some(output) => {
                    stats.elements += output.elements.len() as u64;
                    report.lines += output.scan.lines;
                    report.empty_lines += output.scan.empty;
                    report.lossy_lines += output.scan.lossy;
                    report.bytes_scanned += output.scan.bytes;
                    mapped.push(output.elements);
                }
                None => mapped.push(Vec::new()),
            }
        }
        if report.lossy_lines > 0 {
            warn!(lines = report.lossy_lines, "decoded lines that are not valid UTF-8 lossily");
        }
        log_stage("map", &stats);
        report.stages.push(stats);
        Ok(mapped)
    }

    fn shuffle<E>(&mut self, mapped: Vec<Vec<E>>, report: &mut RunReport) -> Result<Vec<Vec<E>>>
    where
        E: AsRef<[u8]> + Send + 'static,
    {
        let num_buckets = self.config.reduce_parallelism;
        let batch = self.config.shuffle_batch;
        // One lock per bucket; writers only contend when they target the same bucket.
        let buckets: Arc<Vec<Mutex<Vec<E>>>> =
            Arc::new((0..num_buckets).map(|_| Mutex::new(Vec::new())).collect());

        let workers = mapped.len();
        let jobs: Vec<StageJob<u64>> = mapped
            .into_iter()
            .enumerate()
            .map(|(partition, elements)| {
                let buckets = Arc::clone(&buckets);
                Box::new(move || Ok(shuffle_partition(partition, elements, &buckets, batch))) as StageJob<u64>
            })
            .collect();

        let outcome = self.run_stage(workers, jobs)?;
        let (routed, mut stats) = self.settle(outcome)?;
        stats.elements = routed.into_iter().flatten().sum();

        let buckets = Arc::try_unwrap(buckets)
            .map_err(|_| Error::Internal("shuffle buckets still shared after the stage barrier".into()))?;
        let buckets: Vec<Vec<E>> = buckets
            .into_iter()
            .map(|bucket| bucket.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect();

        debug!(
            sizes = ?buckets.iter().map(Vec::len).collect::<Vec<_>>(),
            "bucket sizes after shuffle"
        );
        log_stage("shuffle", &stats);
        report.stages.push(stats);
        Ok(buckets)
    }

    fn reduce<F>(
        &mut self,
        buckets: Vec<Vec<<F::Reducer as Reducer>::Element>>,
        factory: Arc<F>,
        report: &mut RunReport,
    ) -> Result<Vec<Option<PathBuf>>>
    where
        F: ReducerFactory,
        <F::Reducer as Reducer>::Element: Send + 'static,
    {
        let workers = buckets.len();
        let jobs: Vec<StageJob<(PathBuf, u64)>> = buckets
            .into_iter()
            .enumerate()
            .map(|(bucket, elements)| {
                let factory = Arc::clone(&factory);
                let path = artifact_path(&self.config.output_dir, bucket);
                Box::new(move || reduce_bucket(bucket, &elements, factory.as_ref(), path)) as StageJob<_>
            })
            .collect();

        let outcome = self.run_stage(workers, jobs)?;
        let (outputs, mut stats) = self.settle(outcome)?;

        let artifacts = outputs
            .into_iter()
            .map(|output| {
                output.map(|(path, consumed)| {
                    stats.elements += consumed;
                    path
                })
            })
            .collect();
        log_stage("reduce", &stats);
        report.stages.push(stats);
        Ok(artifacts)
    }

    /// Runs `jobs` on a freshly started pool of `workers` threads and waits for all of them.
    fn run_stage<T>(&mut self, workers: usize, jobs: Vec<StageJob<T>>) -> Result<StageOutcome<T>>
    where
        T: Send + 'static,
    {
        let stage = self.stage;
        let total = jobs.len();
        let started = Instant::now();
        let mut stats = StageStats::new(stage, if total == 0 { 0 } else { workers }, total);
        let mut results = Vec::with_capacity(total);

        if total > 0 {
            self.pool.start(workers)?;
            let submitted: Result<Vec<_>, PoolError> =
                jobs.into_iter().map(|job| self.pool.submit(timed(job))).collect();
            // Stage barrier: returns once every submitted job has run and all workers joined.
            self.pool.stop()?;
            let handles = submitted?;

            let mut durations = Vec::with_capacity(total);
            for (job, handle) in handles.into_iter().enumerate() {
                match handle.wait() {
                    Ok((value, elapsed)) => {
                        durations.push(elapsed);
                        results.push(Ok(value));
                    }
                    Err(e) => {
                        error!(stage = %stage, job, error = %e, "job failed");
                        stats.failed_jobs += 1;
                        results.push(Err(e));
                    }
                }
            }
            stats.record_job_times(&durations);
        }

        stats.wall_ms = started.elapsed().as_millis() as u64;
        Ok(StageOutcome { results, stats })
    }

    /// Turns per-job results into per-job values, aborting unless failures are tolerated.
    fn settle<T>(&self, outcome: StageOutcome<T>) -> Result<(Vec<Option<T>>, StageStats)> {
        let StageOutcome { results, stats } = outcome;
        let total = results.len();
        let mut first_error = None;
        let values: Vec<Option<T>> = results
            .into_iter()
            .map(|result| match result {
                Ok(value) => Some(value),
                Err(e) => {
                    first_error.get_or_insert(e);
                    None
                }
            })
            .collect();

        if let Some(source) = first_error {
            if !self.config.tolerate_job_failures {
                return Err(Error::StageFailed {
                    stage: stats.stage,
                    failed: stats.failed_jobs,
                    total,
                    source,
                });
            }
            warn!(
                stage = %stats.stage,
                failed = stats.failed_jobs,
                total,
                "continuing past failed jobs"
            );
        }
        Ok((values, stats))
    }
}

fn timed<T>(job: StageJob<T>) -> impl FnOnce() -> anyhow::Result<(T, Duration)> + Send + 'static
where
    T: Send + 'static,
{
    move || {
        let started = Instant::now();
        job().map(|value| (value, started.elapsed()))
    }
}

fn map_partition<M: Mapper>(input: &Path, partition: &Partition, mapper: &M) -> anyhow::Result<MapOutput<M::Element>> {
    let mut elements = Vec::new();
    let scan = for_each_line_in(input, partition, |line| mapper.do_map(line, &mut |e| elements.push(e)))
        .with_context(|| format!("map partition {} [{}, {})", partition.index, partition.start, partition.end))?;
    // Stable: equal elements keep their emission order.
    elements.sort();
    debug!(
        partition = partition.index,
        bytes = partition.len(),
        lines = scan.lines,
        empty = scan.empty,
        elements = elements.len(),
        "map task finished"
    );
    Ok(MapOutput { elements, scan })
}

fn shuffle_partition<E: AsRef<[u8]>>(partition: usize, elements: Vec<E>, buckets: &[Mutex<Vec<E>>], batch: usize) -> u64 {
    let num_buckets = buckets.len();
    let mut local_buffers: Vec<Vec<E>> = (0..num_buckets).map(|_| Vec::new()).collect();
    let flush = |bucket: usize, pending: &mut Vec<E>| {
        buckets[bucket]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(pending);
    };

    let mut routed = 0u64;
    for element in elements {
        if element.as_ref().is_empty() {
            continue;
        }
        let bucket = hash_to_partition(element.as_ref(), num_buckets);
        let pending = &mut local_buffers[bucket];
        pending.push(element);
        routed += 1;
        if pending.len() >= batch {
            flush(bucket, pending);
        }
    }
    for (bucket, pending) in local_buffers.iter_mut().enumerate() {
        if !pending.is_empty() {
            flush(bucket, pending);
        }
    }
    debug!(partition, routed, "shuffle task finished");
    routed
}

fn reduce_bucket<F: ReducerFactory>(
    bucket: usize,
    elements: &[<F::Reducer as Reducer>::Element],
    factory: &F,
    path: PathBuf,
) -> anyhow::Result<(PathBuf, u64)> {
    let mut reducer = factory.create_reducer(bucket);
    for element in elements {
        reducer
            .do_reduce(element)
            .with_context(|| format!("reduce bucket {}", bucket))?;
    }
    let result = reducer.finish();
    write_artifact(&path, &result).with_context(|| format!("persist bucket {}", bucket))?;
    debug!(bucket, elements = elements.len(), result = %result, path = %path.display(), "reduce task finished");
    Ok((path, elements.len() as u64))
}

fn log_stage(phase: &str, stats: &StageStats) {
    info!(
        phase,
        jobs = stats.jobs,
        workers = stats.workers,
        failed = stats.failed_jobs,
        elements = stats.elements,
        min_job_ms = stats.min_job_ms,
        max_job_ms = stats.max_job_ms,
        wall_ms = stats.wall_ms,
        "{} phase complete",
        phase
    );
}
