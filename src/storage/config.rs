use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Which `SpillStore` implementation backs the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpillBackendKind {
    InMem,
    Disk,
}

/// Disk spill store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpillStoreConfig {
    /// Parent directory for per-instance run directories.
    pub scratch_dir: PathBuf,
    /// Memtable size that triggers writing a sorted run.
    pub memtable_limit_bytes: usize,
    /// Run count at which all runs are merged into one.
    pub max_spill_runs: usize,
    /// Every n-th record of a run is kept in the in-memory seek index.
    pub index_interval: usize,
}

impl SpillStoreConfig {
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn with_memtable_limit_bytes(mut self, bytes: usize) -> Self {
        self.memtable_limit_bytes = bytes;
        self
    }

    pub fn with_max_spill_runs(mut self, runs: usize) -> Self {
        self.max_spill_runs = runs;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig("spill.scratch_dir must be set".into()));
        }
        if self.memtable_limit_bytes == 0 {
            return Err(ConfigError::InvalidConfig("spill.memtable_limit_bytes must be > 0".into()));
        }
        if self.max_spill_runs < 2 {
            return Err(ConfigError::InvalidConfig("spill.max_spill_runs must be >= 2".into()));
        }
        if self.index_interval == 0 {
            return Err(ConfigError::InvalidConfig("spill.index_interval must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for SpillStoreConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("mini_batch"),
            memtable_limit_bytes: 64 * 1024 * 1024,
            max_spill_runs: 8,
            index_interval: 64,
        }
    }
}

/// Job config key holding the mini-batch block.
pub const MINI_BATCH_CONFIG_KEY: &str = "mini_batch";

/// Settings for one mini-batch group operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiniBatchConfig {
    pub backend: SpillBackendKind,
    pub spill: SpillStoreConfig,
    /// Upper bound on rows per emitted record batch.
    pub max_batch_rows: usize,
}

impl MiniBatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_rows == 0 {
            return Err(ConfigError::InvalidConfig("max_batch_rows must be > 0".into()));
        }
        if self.backend == SpillBackendKind::Disk {
            self.spill.validate()?;
        }
        Ok(())
    }
}

impl Default for MiniBatchConfig {
    fn default() -> Self {
        Self {
            backend: SpillBackendKind::Disk,
            spill: SpillStoreConfig::default(),
            max_batch_rows: 8192,
        }
    }
}

/// Reads the `mini_batch` block from the job config. A missing block yields the defaults.
pub fn parse_mini_batch_config_from_job_config(
    job_config: &HashMap<String, Value>,
) -> Result<MiniBatchConfig, ConfigError> {
    let cfg = match job_config.get(MINI_BATCH_CONFIG_KEY) {
        None | Some(Value::Null) => MiniBatchConfig::default(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| ConfigError::InvalidConfig(format!("{MINI_BATCH_CONFIG_KEY}: {e}")))?,
    };
    cfg.validate()?;
    Ok(cfg)
}

pub fn mini_batch_config_to_job_config_value(cfg: &MiniBatchConfig) -> Value {
    // Plain data structs; serialization cannot fail.
    serde_json::to_value(cfg).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SpillStoreConfig::default();
        cfg.validate().unwrap();
        assert!(cfg.scratch_dir.ends_with("mini_batch"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SpillStoreConfig::default().with_memtable_limit_bytes(0).validate().is_err());
        assert!(SpillStoreConfig::default().with_max_spill_runs(1).validate().is_err());
        assert!(SpillStoreConfig::default().with_scratch_dir("").validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: SpillStoreConfig =
            serde_json::from_str(r#"{"memtable_limit_bytes": 1024}"#).unwrap();
        assert_eq!(cfg.memtable_limit_bytes, 1024);
        assert_eq!(cfg.max_spill_runs, SpillStoreConfig::default().max_spill_runs);
    }

    #[test]
    fn missing_block_yields_defaults() {
        let cfg = parse_mini_batch_config_from_job_config(&HashMap::new()).unwrap();
        assert_eq!(cfg, MiniBatchConfig::default());
    }

    #[test]
    fn parses_mini_batch_block() {
        let mut job_config = HashMap::new();
        job_config.insert(
            MINI_BATCH_CONFIG_KEY.to_string(),
            serde_json::json!({
                "backend": "in_mem",
                "max_batch_rows": 16,
                "spill": { "max_spill_runs": 4 }
            }),
        );
        let cfg = parse_mini_batch_config_from_job_config(&job_config).unwrap();
        assert_eq!(cfg.backend, SpillBackendKind::InMem);
        assert_eq!(cfg.max_batch_rows, 16);
        assert_eq!(cfg.spill.max_spill_runs, 4);
        assert_eq!(cfg.spill.index_interval, SpillStoreConfig::default().index_interval);
    }

    #[test]
    fn job_config_value_roundtrips() {
        let cfg = MiniBatchConfig {
            backend: SpillBackendKind::InMem,
            spill: SpillStoreConfig::default().with_memtable_limit_bytes(4096),
            max_batch_rows: 3,
        };
        let mut job_config = HashMap::new();
        job_config.insert(MINI_BATCH_CONFIG_KEY.to_string(), mini_batch_config_to_job_config_value(&cfg));
        assert_eq!(parse_mini_batch_config_from_job_config(&job_config).unwrap(), cfg);
    }

    #[test]
    fn rejects_malformed_block() {
        let mut job_config = HashMap::new();
        job_config.insert(MINI_BATCH_CONFIG_KEY.to_string(), serde_json::json!({ "backend": "tape" }));
        let err = parse_mini_batch_config_from_job_config(&job_config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));

        job_config.insert(MINI_BATCH_CONFIG_KEY.to_string(), serde_json::json!({ "max_batch_rows": 0 }));
        assert!(parse_mini_batch_config_from_job_config(&job_config).is_err());
    }
}
