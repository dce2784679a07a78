use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use common::{FrozenJobConfig, Key, KeyValue, MrError, Result, TaskId, TypeTag, Value};

/// Group of the counters maintained by the runtime itself.
pub const TASK_COUNTER_GROUP: &str = "task";

pub const MAP_INPUT_RECORDS: &str = "map_input_records";
pub const MAP_OUTPUT_RECORDS: &str = "map_output_records";
pub const COMBINE_INPUT_RECORDS: &str = "combine_input_records";
pub const COMBINE_OUTPUT_RECORDS: &str = "combine_output_records";
pub const REDUCE_INPUT_GROUPS: &str = "reduce_input_groups";
pub const REDUCE_INPUT_RECORDS: &str = "reduce_input_records";
pub const REDUCE_OUTPUT_RECORDS: &str = "reduce_output_records";

/// Destination of a task's emissions.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write(&self, record: KeyValue) -> Result<()>;

    /// Flush anything buffered. Called once after the task's last emission.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Job-wide counters, shared by every task of a job.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    inner: Arc<DashMap<(String, String), i64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, group: &str, name: &str, amount: i64) {
        *self
            .inner
            .entry((group.to_owned(), name.to_owned()))
            .or_insert(0) += amount;
    }

    pub fn get(&self, group: &str, name: &str) -> i64 {
        self.inner
            .get(&(group.to_owned(), name.to_owned()))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Sorted copy of every counter.
    pub fn snapshot(&self) -> BTreeMap<(String, String), i64> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// Which declared types an emission is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitPhase {
    /// Intermediate records bound for the group stage.
    MapOutput,
    /// Final records bound for the output sink.
    JobOutput,
}

/// Handle a hook uses to emit records and update counters.
///
/// Cloning is cheap; every clone writes to the same destination.
#[derive(Clone)]
pub struct TaskContext {
    task: TaskId,
    config: FrozenJobConfig,
    writer: Arc<dyn RecordWriter>,
    counters: Counters,
    cancel: CancellationToken,
    phase: EmitPhase,
    output_counter: &'static str,
}

impl TaskContext {
    pub fn new(
        task: TaskId,
        config: FrozenJobConfig,
        writer: Arc<dyn RecordWriter>,
        counters: Counters,
        cancel: CancellationToken,
        phase: EmitPhase,
        output_counter: &'static str,
    ) -> Self {
        Self {
            task,
            config,
            writer,
            counters,
            cancel,
            phase,
            output_counter,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task
    }

    pub fn configuration(&self) -> &FrozenJobConfig {
        &self.config
    }

    /// Emit one record.
    ///
    /// Waits while the destination applies backpressure. Fails if the
    /// record disagrees with the declared types, the destination is closed,
    /// or the job is cancelled while waiting.
    pub fn write(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> impl Future<Output = Result<()>> + Send + '_ {
        let record = KeyValue::new(key, value);
        self.emit(record)
    }

    pub async fn emit(&self, record: KeyValue) -> Result<()> {
        self.check_types(&record)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MrError::Cancelled { task: self.task.clone() }),
            written = self.writer.write(record) => {
                written?;
                self.counters.increment(TASK_COUNTER_GROUP, self.output_counter, 1);
                Ok(())
            }
        }
    }

    pub fn increment_counter(&self, group: &str, name: &str, amount: i64) {
        self.counters.increment(group, name, amount);
    }

    pub fn counter(&self, group: &str, name: &str) -> i64 {
        self.counters.get(group, name)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn check_types(&self, record: &KeyValue) -> Result<()> {
        let (key_tag, value_tag) = match self.phase {
            EmitPhase::MapOutput => (
                self.config.map_output_key_type,
                self.config.map_output_value_type,
            ),
            EmitPhase::JobOutput => (self.config.output_key_type, self.config.output_value_type),
        };

        if let Some(expected) = key_tag {
            let found = if std::str::from_utf8(record.key.as_bytes()).is_ok() {
                TypeTag::Text
            } else {
                TypeTag::Bytes
            };
            if expected != TypeTag::Bytes && expected != found {
                return Err(self.mismatch("key", expected, found));
            }
        }

        if let (Some(expected), Some(found)) = (value_tag, record.value.type_tag()) {
            if !expected.accepts(&record.value) {
                return Err(self.mismatch("value", expected, found));
            }
        }
        Ok(())
    }

    fn mismatch(&self, what: &'static str, expected: TypeTag, found: TypeTag) -> MrError {
        MrError::TypeMismatch {
            task: self.task.clone(),
            what,
            expected,
            found,
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
