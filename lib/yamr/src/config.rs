use crate::constants::{
    DEFAULT_OUTPUT_DIR, DEFAULT_SHUFFLE_BATCH, ENV_OUTPUT_DIR, ENV_SHUFFLE_BATCH, ENV_TOLERATE_JOB_FAILURES,
};
use crate::error::{Error, Result};
use crate::utils::{is_truthy, parse_var};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input: PathBuf,
    /// Requested map parallelism; lowered when the input has fewer lines.
    pub map_parallelism: usize,
    /// Number of reduce buckets, one result file each.
    pub reduce_parallelism: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_shuffle_batch")]
    pub shuffle_batch: usize,
    /// Keep going when individual jobs fail instead of aborting the run.
    #[serde(default)]
    pub tolerate_job_failures: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_shuffle_batch() -> usize {
    DEFAULT_SHUFFLE_BATCH
}

impl PipelineConfig {
    pub fn new(input: impl Into<PathBuf>, map_parallelism: usize, reduce_parallelism: usize) -> Result<Self> {
        let config = Self {
            input: input.into(),
            map_parallelism,
            reduce_parallelism,
            output_dir: default_output_dir(),
            shuffle_batch: default_shuffle_batch(),
            tolerate_job_failures: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_shuffle_batch(mut self, shuffle_batch: usize) -> Self {
        self.shuffle_batch = shuffle_batch;
        self
    }

    pub fn with_tolerate_job_failures(mut self, tolerate: bool) -> Self {
        self.tolerate_job_failures = tolerate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.map_parallelism == 0 {
            return Err(Error::Config("map parallelism must be greater than 0".into()));
        }
        if self.reduce_parallelism == 0 {
            return Err(Error::Config("reduce parallelism must be greater than 0".into()));
        }
        if self.shuffle_batch == 0 {
            return Err(Error::Config("shuffle batch must be greater than 0".into()));
        }
        Ok(())
    }

    /// Applies `YAMR_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides resolved through `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(batch) = lookup(ENV_SHUFFLE_BATCH) {
            self.shuffle_batch =
                parse_var(ENV_SHUFFLE_BATCH, &batch).map_err(|e| Error::Config(format!("{:#}", e)))?;
        }
        if let Some(flag) = lookup(ENV_TOLERATE_JOB_FAILURES) {
            self.tolerate_job_failures = is_truthy(&flag);
        }
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn zero_parallelism_is_rejected() {
        assert!(matches!(PipelineConfig::new("in.txt", 0, 1), Err(Error::Config(_))));
        assert!(matches!(PipelineConfig::new("in.txt", 1, 0), Err(Error::Config(_))));
    }

    #[test]
    fn defaults() {
        let config = PipelineConfig::new("in.txt", 2, 3).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.shuffle_batch, DEFAULT_SHUFFLE_BATCH);
        assert!(!config.tolerate_job_failures);
    }

    #[test]
    fn overrides_apply_and_validate() {
        let vars: HashMap<&str, &str> = [
            (ENV_OUTPUT_DIR, "/tmp/out"),
            (ENV_SHUFFLE_BATCH, "16"),
            (ENV_TOLERATE_JOB_FAILURES, "yes"),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::new("in.txt", 2, 3)
            .unwrap()
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.shuffle_batch, 16);
        assert!(config.tolerate_job_failures);

        let bad = PipelineConfig::new("in.txt", 2, 3)
            .unwrap()
            .apply_overrides(|k| (k == ENV_SHUFFLE_BATCH).then(|| "0".to_string()));
        assert!(matches!(bad, Err(Error::Config(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"input":"data.txt","map_parallelism":4,"reduce_parallelism":2}"#).unwrap();
        assert_eq!(config.shuffle_batch, DEFAULT_SHUFFLE_BATCH);
        config.validate().unwrap();
    }
}
