use std::collections::HashMap;

use serde_json::Value;

use crate::error::ConfigError;
use crate::storage::config::{parse_mini_batch_config_from_job_config, MiniBatchConfig};

/// What a mini-batch task knows about itself when it is opened.
#[derive(Clone, Debug)]
pub struct RuntimeContext {
    operator_name: String,
    task_index: i32,
    parallelism: i32,
    job_config: HashMap<String, Value>,
}

impl RuntimeContext {
    pub fn new(
        operator_name: impl Into<String>,
        task_index: i32,
        parallelism: i32,
        job_config: Option<HashMap<String, Value>>,
    ) -> Self {
        Self {
            operator_name: operator_name.into(),
            task_index,
            parallelism,
            job_config: job_config.unwrap_or_default(),
        }
    }

    /// The `mini_batch` block of the job config, defaults when absent.
    pub fn mini_batch_config(&self) -> Result<MiniBatchConfig, ConfigError> {
        parse_mini_batch_config_from_job_config(&self.job_config)
    }

    /// `operator_name[task_index/parallelism]`, used to tag log events.
    pub fn task_label(&self) -> String {
        format!("{}[{}/{}]", self.operator_name, self.task_index, self.parallelism)
    }
}
