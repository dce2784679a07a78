use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MrError, Result};
use crate::value::TypeTag;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_REDUCE_TASKS: usize = 1;

/// State of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Job not started.
    Pending,

    /// Job setup is being negotiated with the module.
    Negotiating,

    /// Mapping phase.
    Mapping,

    /// Map output is being grouped by key.
    Grouping,

    /// Reducing phase.
    Reducing,

    /// Job completed.
    Completed,

    Failed,
}

/// Settings for one job.
///
/// Only the negotiator writes a `JobConfig`. Once negotiation succeeds the
/// config is frozen into a [`FrozenJobConfig`] and handed to the tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Name of the job, used in logs.
    pub name: String,

    /// Input locations. Files, directories or glob patterns.
    pub input_paths: Vec<String>,

    /// Output location.
    pub output_path: Option<String>,

    pub output_key_type: Option<TypeTag>,
    pub output_value_type: Option<TypeTag>,
    pub map_output_key_type: Option<TypeTag>,
    pub map_output_value_type: Option<TypeTag>,

    /// Number of reduce partitions.
    pub reduce_tasks: usize,

    /// Capacity of the record channel between the map and group stages.
    pub channel_capacity: usize,

    /// Most map or reduce tasks running at once. Unset means one per core.
    pub max_parallel_tasks: Option<usize>,

    /// Free-form settings readable by the job module.
    pub properties: BTreeMap<String, String>,

    /// Auxiliary arguments to pass to the job module.
    pub args: Vec<String>,

    /// Set once the negotiator has accepted this config.
    #[serde(skip)]
    negotiated: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            input_paths: vec![],
            output_path: None,
            output_key_type: None,
            output_value_type: None,
            map_output_key_type: None,
            map_output_value_type: None,
            reduce_tasks: DEFAULT_REDUCE_TASKS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_parallel_tasks: None,
            properties: BTreeMap::new(),
            args: vec![],
            negotiated: false,
        }
    }
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load a job config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MrError::Config(format!("unable to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| MrError::Config(format!("unable to parse {}: {e}", path.display())))
    }

    pub fn set_input_paths<I, S>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_input_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.input_paths.push(path.into());
        self
    }

    pub fn set_output_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn set_output_key_type(&mut self, tag: TypeTag) -> &mut Self {
        self.output_key_type = Some(tag);
        self
    }

    pub fn set_output_value_type(&mut self, tag: TypeTag) -> &mut Self {
        self.output_value_type = Some(tag);
        self
    }

    pub fn set_map_output_key_type(&mut self, tag: TypeTag) -> &mut Self {
        self.map_output_key_type = Some(tag);
        self
    }

    pub fn set_map_output_value_type(&mut self, tag: TypeTag) -> &mut Self {
        self.map_output_value_type = Some(tag);
        self
    }

    pub fn set_reduce_tasks(&mut self, reduce_tasks: usize) -> &mut Self {
        self.reduce_tasks = reduce_tasks;
        self
    }

    pub fn set_channel_capacity(&mut self, capacity: usize) -> &mut Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn set_max_parallel_tasks(&mut self, tasks: usize) -> &mut Self {
        self.max_parallel_tasks = Some(tasks);
        self
    }

    /// Number of tasks allowed to run at once.
    pub fn parallelism(&self) -> usize {
        self.max_parallel_tasks.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        })
    }

    /// Read a free-form property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether module defaults and `job_setup` have already been applied.
    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    pub fn mark_negotiated(&mut self) -> &mut Self {
        self.negotiated = true;
        self
    }

    /// Take an immutable snapshot of this config.
    pub fn freeze(self) -> FrozenJobConfig {
        FrozenJobConfig(Arc::new(self))
    }
}

/// An immutable, shareable job config. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct FrozenJobConfig(Arc<JobConfig>);

impl Deref for FrozenJobConfig {
    type Target = JobConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
