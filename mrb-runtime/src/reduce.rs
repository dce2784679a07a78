use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use common::{FrozenJobConfig, Result, TaskId};

use crate::context::{
    Counters, EmitPhase, RecordWriter, TaskContext, REDUCE_INPUT_GROUPS, REDUCE_INPUT_RECORDS,
    REDUCE_OUTPUT_RECORDS, TASK_COUNTER_GROUP,
};
use crate::group::Partition;
use crate::module::JobModule;
use crate::signal::completion;
use crate::task::{TaskMachine, TaskState, TaskSummary};

/// Runs the reduce hook over one partition, one key at a time.
pub struct ReduceTaskRunner {
    machine: TaskMachine,
    module: Arc<dyn JobModule>,
    config: FrozenJobConfig,
    counters: Counters,
    cancel: CancellationToken,
}

impl ReduceTaskRunner {
    pub fn new(
        index: usize,
        module: Arc<dyn JobModule>,
        config: FrozenJobConfig,
        counters: Counters,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            machine: TaskMachine::new(TaskId::reduce(index)),
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

    /// Reduce every key of `partition`, sending emissions to `output`.
    ///
    /// Each key's value iterator is moved into the hook. Values the hook
    /// leaves unread are dropped when the runner moves to the next key.
    pub async fn run(
        &mut self,
        partition: Partition,
        output: Arc<dyn RecordWriter>,
    ) -> Result<TaskSummary> {
        let module = self.module.clone();
        let cancel = self.cancel.clone();
        let task = self.machine.task().clone();
        info!(task = %task, keys = partition.len(), "starting reduce task");

        let ctx = TaskContext::new(
            task.clone(),
            self.config.clone(),
            output.clone(),
            self.counters.clone(),
            cancel.clone(),
            EmitPhase::JobOutput,
            REDUCE_OUTPUT_RECORDS,
        );

        self.machine.lifecycle(module.reduce_setup(&ctx), &cancel).await?;

        for (position, (key, values)) in partition.enumerate() {
            self.counters.increment(TASK_COUNTER_GROUP, REDUCE_INPUT_GROUPS, 1);
            let values = values.counted(self.counters.clone(), REDUCE_INPUT_RECORDS);

            let described = key.clone();
            let (done, completion) = completion();
            let call = module.reduce(key, values, ctx.clone(), done);
            self.machine
                .invoke(
                    position,
                    || format!("key `{described}`"),
                    call,
                    completion,
                    &cancel,
                )
                .await?;
        }

        self.machine.lifecycle(module.reduce_cleanup(&ctx), &cancel).await?;

        if let Err(e) = output.finish().await {
            return Err(self.machine.fail(e));
        }
        let summary = self.machine.complete()?;
        debug!(task = %task, keys = summary.invocations, "reduce task completed");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{Group, Partition};
    use crate::signal::Done;
    use crate::values::ValueIterator;
    use anyhow::bail;
    use async_trait::async_trait;
    use common::{JobConfig, Key, KeyValue, MrError, TypeTag, Value};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<KeyValue>>);

    #[async_trait]
    impl RecordWriter for Collect {
        async fn write(&self, record: KeyValue) -> Result<()> {
            self.0.lock().await.push(record);
            Ok(())
        }
    }

    /// Sums values; reads only the first value of key `lazy`; fails on `bad`.
    struct Sum;

    #[async_trait]
    impl JobModule for Sum {
        fn name(&self) -> &str {
            "sum"
        }

        async fn map(&self, _: Key, _: Value, _: TaskContext, done: Done) -> anyhow::Result<()> {
            done.complete();
            Ok(())
        }

        async fn reduce(
            &self,
            key: Key,
            mut values: ValueIterator,
            ctx: TaskContext,
            done: Done,
        ) -> anyhow::Result<()> {
            match key.to_string().as_str() {
                "bad" => bail!("refusing to reduce"),
                "lazy" => {
                    let first = values.next_value()?;
                    ctx.write(key, first).await?;
                }
                _ => {
                    let mut total = 0;
                    while values.has_next() {
                        total += values.next_value()?.as_int().unwrap_or(0);
                    }
                    assert!(values.next_value().is_err());
                    ctx.write(key, total).await?;
                }
            }
            done.complete();
            Ok(())
        }
    }

    fn partition(entries: Vec<(&str, Vec<i64>)>) -> Partition {
        let groups = entries
            .into_iter()
            .map(|(key, values)| {
                let mut group = Group::new(Key::from(key));
                for v in values {
                    group.push(Value::from(v));
                }
                group
            })
            .collect();
        Partition::new(3, groups)
    }

    fn runner(config: JobConfig) -> ReduceTaskRunner {
        ReduceTaskRunner::new(
            3,
            Arc::new(Sum),
            config.freeze(),
            Counters::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn reduces_each_key_once_in_partition_order() {
        let mut runner = runner(JobConfig::new("sum"));
        let out = Arc::new(Collect::default());
        let summary = runner
            .run(partition(vec![("a", vec![1, 2]), ("lazy", vec![7, 8, 9]), ("z", vec![5])]), out.clone())
            .await
            .unwrap();

        assert_eq!(summary.task, TaskId::reduce(3));
        assert_eq!(summary.invocations, 3);
        assert_eq!(runner.state(), TaskState::Completed);
        let out: Vec<String> = out.0.lock().await.iter().map(ToString::to_string).collect();
        assert_eq!(out, vec!["a\t3", "lazy\t7", "z\t5"]);
        assert_eq!(runner.counters.get(TASK_COUNTER_GROUP, REDUCE_INPUT_GROUPS), 3);
        // `lazy` reads one of its three values.
        assert_eq!(runner.counters.get(TASK_COUNTER_GROUP, REDUCE_INPUT_RECORDS), 4);
        assert_eq!(runner.counters.get(TASK_COUNTER_GROUP, REDUCE_OUTPUT_RECORDS), 3);
    }

    #[tokio::test]
    async fn failure_names_the_key_and_stops_the_partition() {
        let mut runner = runner(JobConfig::new("sum"));
        let out = Arc::new(Collect::default());
        let err = runner
            .run(partition(vec![("a", vec![1]), ("bad", vec![1]), ("c", vec![1])]), out.clone())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MrError::Logic { ref record, .. } if record.as_deref() == Some("key `bad`")
        ));
        assert_eq!(runner.state(), TaskState::Failed);
        assert_eq!(out.0.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn output_type_mismatch_fails_the_task() {
        let mut config = JobConfig::new("sum");
        config.set_output_value_type(TypeTag::Text);
        let mut runner = runner(config);
        let err = runner
            .run(partition(vec![("a", vec![1])]), Arc::new(Collect::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, MrError::TypeMismatch { what: "value", .. }));
    }
}
