use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use common::{FrozenJobConfig, KeyValue, MrError, Result, TaskId};

use crate::context::{
    Counters, EmitPhase, RecordWriter, TaskContext, COMBINE_INPUT_RECORDS,
    COMBINE_OUTPUT_RECORDS, MAP_INPUT_RECORDS, MAP_OUTPUT_RECORDS, TASK_COUNTER_GROUP,
};
use crate::group::Grouper;
use crate::module::JobModule;
use crate::signal::completion;
use crate::task::{TaskMachine, TaskState, TaskSummary};

type RecordIter = Box<dyn Iterator<Item = anyhow::Result<KeyValue>> + Send>;

/// A contiguous chunk of job input, consumed by exactly one map task.
///
/// Read failures surface as `Err` items and fail the task.
pub struct Split {
    pub id: usize,
    records: RecordIter,
}

impl Split {
    pub fn new<I>(id: usize, records: I) -> Self
    where
        I: IntoIterator<Item = anyhow::Result<KeyValue>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            id,
            records: Box::new(records.into_iter()),
        }
    }

    pub fn from_records(id: usize, records: Vec<KeyValue>) -> Self {
        Self::new(id, records.into_iter().map(Ok))
    }
}

impl Iterator for Split {
    type Item = anyhow::Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

impl std::fmt::Debug for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Split").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Map output held back for the combiner.
#[derive(Default)]
struct CombineBuffer(Mutex<Grouper>);

impl CombineBuffer {
    fn take(&self) -> Grouper {
        match self.0.lock() {
            Ok(mut grouper) => std::mem::take(&mut *grouper),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl RecordWriter for CombineBuffer {
    async fn write(&self, record: KeyValue) -> Result<()> {
        self.0
            .lock()
            .map_err(|_| MrError::Internal("combine buffer poisoned".into()))?
            .insert(record);
        Ok(())
    }
}

/// Runs the map hook over one split, one record at a time.
pub struct MapTaskRunner {
    machine: TaskMachine,
    module: Arc<dyn JobModule>,
    config: FrozenJobConfig,
    counters: Counters,
    cancel: CancellationToken,
}

impl MapTaskRunner {
    pub fn new(
        index: usize,
        module: Arc<dyn JobModule>,
        config: FrozenJobConfig,
        counters: Counters,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            machine: TaskMachine::new(TaskId::map(index)),
            module,
            config,
            counters,
            cancel,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        self.machine.task()
    }

    pub fn state(&self) -> TaskState {
        self.machine.state()
    }

    /// Map every record of `split`, sending emissions to `output`.
    ///
    /// The next record is not touched until the previous invocation has
    /// acknowledged. The first failure aborts the split; records already
    /// emitted are not taken back.
    pub async fn run(&mut self, split: Split, output: Arc<dyn RecordWriter>) -> Result<TaskSummary> {
        let module = self.module.clone();
        let cancel = self.cancel.clone();
        let task = self.machine.task().clone();
        let split_id = split.id;
        info!(task = %task, split = split_id, "starting map task");

        let phase = if module.has_reduce() {
            EmitPhase::MapOutput
        } else {
            EmitPhase::JobOutput
        };
        let buffer = (module.has_reduce() && module.has_combine())
            .then(|| Arc::new(CombineBuffer::default()));
        let sink: Arc<dyn RecordWriter> = match &buffer {
            Some(buffer) => buffer.clone(),
            None => output.clone(),
        };
        let ctx = TaskContext::new(
            task.clone(),
            self.config.clone(),
            sink,
            self.counters.clone(),
            cancel.clone(),
            phase,
            MAP_OUTPUT_RECORDS,
        );

        self.machine.lifecycle(module.map_setup(&ctx), &cancel).await?;

        let mut position = 0;
        for record in split {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    let err = MrError::Input(format!(
                        "split {split_id} record #{position}: {e:#}"
                    ));
                    return Err(self.machine.fail(err));
                }
            };
            self.counters.increment(TASK_COUNTER_GROUP, MAP_INPUT_RECORDS, 1);

            let (key, value) = record.into_parts();
            let described = key.clone();
            let (done, completion) = completion();
            let call = module.map(key, value, ctx.clone(), done);
            self.machine
                .invoke(
                    position,
                    || format!("record #{position} (key `{described}`)"),
                    call,
                    completion,
                    &cancel,
                )
                .await?;
            position += 1;
        }

        self.machine.lifecycle(module.map_cleanup(&ctx), &cancel).await?;

        if let Some(buffer) = buffer {
            self.combine(buffer.take(), output.clone(), position).await?;
        }

        if let Err(e) = output.finish().await {
            return Err(self.machine.fail(e));
        }
        let summary = self.machine.complete()?;
        debug!(task = %task, records = position, "map task completed");
        Ok(summary)
    }

    async fn combine(
        &mut self,
        grouper: Grouper,
        output: Arc<dyn RecordWriter>,
        mut position: usize,
    ) -> Result<()> {
        let module = self.module.clone();
        let cancel = self.cancel.clone();
        let ctx = TaskContext::new(
            self.machine.task().clone(),
            self.config.clone(),
            output,
            self.counters.clone(),
            cancel.clone(),
            EmitPhase::MapOutput,
            COMBINE_OUTPUT_RECORDS,
        );

        self.machine.lifecycle(module.combine_setup(&ctx), &cancel).await?;
        for group in grouper.into_sorted(module.as_ref()) {
            self.counters
                .increment(TASK_COUNTER_GROUP, COMBINE_INPUT_RECORDS, group.len() as i64);
            let key = group.key().clone();
            let values = group.into_values();
            let (done, completion) = completion();
            let call = module.combine(key.clone(), values, ctx.clone(), done);
            self.machine
                .invoke(
                    position,
                    || format!("combine of key `{key}`"),
                    call,
                    completion,
                    &cancel,
                )
                .await?;
            position += 1;
        }
        self.machine.lifecycle(module.combine_cleanup(&ctx), &cancel).await
    }
}
