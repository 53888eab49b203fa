//! Centralized environment variable names and default values for pipeline tuning.

// Environment variable names
pub const ENV_OUTPUT_DIR: &str = "YAMR_OUTPUT_DIR";
pub const ENV_SHUFFLE_BATCH: &str = "YAMR_SHUFFLE_BATCH";
pub const ENV_TOLERATE_JOB_FAILURES: &str = "YAMR_TOLERATE_JOB_FAILURES";

// Defaults
pub const DEFAULT_OUTPUT_DIR: &str = ".";
// Elements buffered per bucket by a shuffle job before taking the bucket lock
pub const DEFAULT_SHUFFLE_BATCH: usize = 1024;
