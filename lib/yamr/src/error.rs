use crate::runtime::Stage;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot open input {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("split failed: {0:#}")]
    Split(#[source] anyhow::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{stage} stage failed: {failed} of {total} jobs failed, first: {source}")]
    StageFailed {
        stage: Stage,
        failed: usize,
        total: usize,
        #[source]
        source: JobError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Lifecycle misuse and spawn failures of the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is already running")]
    AlreadyRunning,
    #[error("worker pool is not running")]
    NotRunning,
    #[error("worker pool needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn worker thread {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a job that did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job failed: {0:#}")]
    Failed(anyhow::Error),
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("job result was abandoned before it was produced")]
    Abandoned,
}
