pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod pool;
pub mod prefix;
pub mod runtime;
pub mod split;
pub mod stats;
pub mod utils;

pub use api::{Mapper, Reducer, ReducerFactory};
pub use config::PipelineConfig;
pub use error::{Error, JobError, PoolError, Result};
pub use pool::{JobHandle, Submitter, WorkerPool};
pub use prefix::{LongestPrefixReducer, PrefixMapper};
pub use runtime::{RuntimePipeline, Stage};
pub use split::{split_file, Partition};
pub use stats::{RunReport, StageStats};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
