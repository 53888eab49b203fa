use crate::runtime::Stage;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Serialize)]
pub struct StageStats {
    pub stage: Stage,
    pub workers: usize,
    pub jobs: usize,
    pub failed_jobs: usize,
    /// Elements produced by the stage (map, shuffle) or consumed by it (reduce).
    pub elements: u64,
    pub min_job_ms: u64,
    pub max_job_ms: u64,
    pub wall_ms: u64,
}

impl StageStats {
    pub fn new(stage: Stage, workers: usize, jobs: usize) -> Self {
        Self {
            stage,
            workers,
            jobs,
            failed_jobs: 0,
            elements: 0,
            min_job_ms: 0,
            max_job_ms: 0,
            wall_ms: 0,
        }
    }

    pub fn record_job_times(&mut self, durations: &[Duration]) {
        self.min_job_ms = durations.iter().min().map_or(0, |d| d.as_millis() as u64);
        self.max_job_ms = durations.iter().max().map_or(0, |d| d.as_millis() as u64);
    }
}

/// Summary of a completed pipeline run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub input: PathBuf,
    pub input_bytes: u64,
    pub requested_map_parallelism: usize,
    /// Map parallelism after coercion to the number of partitions.
    pub map_parallelism: usize,
    pub reduce_parallelism: usize,
    pub partitions: usize,
    pub lines: u64,
    pub empty_lines: u64,
    /// Lines that were not valid UTF-8; mapped after lossy decoding.
    pub lossy_lines: u64,
    /// Bytes read by map jobs that succeeded.
    pub bytes_scanned: u64,
    pub stages: Vec<StageStats>,
    /// Result files indexed by bucket; `None` where the reduce job failed.
    pub artifacts: Vec<Option<PathBuf>>,
    pub wall_ms: u64,
}

impl RunReport {
    pub fn failed_jobs(&self) -> usize {
        self.stages.iter().map(|s| s.failed_jobs).sum()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
