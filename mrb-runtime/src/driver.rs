use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::{FrozenJobConfig, JobConfig, JobState, MrError, Result, TaskId};

use crate::channel::record_channel;
use crate::context::{Counters, RecordWriter};
use crate::group::GroupStage;
use crate::io::{InputSource, OutputSink};
use crate::map::MapTaskRunner;
use crate::module::JobModule;
use crate::negotiate::JobConfigNegotiator;
use crate::reduce::ReduceTaskRunner;
use crate::task::TaskSummary;

/// Outcome of a successful job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub config: FrozenJobConfig,
    pub state: JobState,
    pub map_tasks: Vec<TaskSummary>,
    pub reduce_tasks: Vec<TaskSummary>,
    pub counters: BTreeMap<(String, String), i64>,
}

impl JobReport {
    pub fn counter(&self, group: &str, name: &str) -> i64 {
        self.counters
            .get(&(group.to_owned(), name.to_owned()))
            .copied()
            .unwrap_or(0)
    }
}

/// Runs one job in-process: negotiate, map, group, reduce, commit.
pub struct JobDriver {
    module: Arc<dyn JobModule>,
    input: Arc<dyn InputSource>,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
    state: JobState,
}

impl JobDriver {
    pub fn new(
        module: Arc<dyn JobModule>,
        input: Arc<dyn InputSource>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            module,
            input,
            sink,
            cancel: CancellationToken::new(),
            state: JobState::Pending,
        }
    }

    /// Token that aborts the job when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Run the job to completion.
    ///
    /// The first task failure cancels every other task and is returned.
    pub async fn run(&mut self, mut job: JobConfig) -> Result<JobReport> {
        self.state = JobState::Negotiating;
        let negotiator = JobConfigNegotiator::new(self.module.clone())
            .with_output_check(self.sink.clone())
            .with_cancellation(self.cancel.clone());
        let config = match negotiator.negotiate(&mut job).await {
            Ok(config) => config,
            Err(e) => {
                error!(job = %job.name, "job negotiation failed: {e}");
                self.cancel.cancel();
                self.state = JobState::Failed;
                return Err(e);
            }
        };

        let counters = Counters::new();
        let result = self.execute(&config, &counters).await;
        let succeeded = result.is_ok();
        if !succeeded {
            self.cancel.cancel();
            if let Err(e) = self.sink.abort(&config).await {
                warn!(job = %config.name, "unable to abort output: {e}");
            }
        }

        let cleanup = self
            .module
            .job_cleanup(&config, succeeded)
            .await
            .map_err(|e| MrError::from_hook(&TaskId::job(), None, e));

        let (map_tasks, reduce_tasks) = match (result, cleanup) {
            (Ok(tasks), Ok(())) => tasks,
            (Ok(_), Err(e)) | (Err(e), _) => {
                error!(job = %config.name, "job failed: {e}");
                self.state = JobState::Failed;
                return Err(e);
            }
        };

        self.state = JobState::Completed;
        info!(
            job = %config.name,
            maps = map_tasks.len(),
            reduces = reduce_tasks.len(),
            "job completed"
        );
        Ok(JobReport {
            config,
            state: self.state,
            map_tasks,
            reduce_tasks,
            counters: counters.snapshot(),
        })
    }

    async fn execute(
        &mut self,
        config: &FrozenJobConfig,
        counters: &Counters,
    ) -> Result<(Vec<TaskSummary>, Vec<TaskSummary>)> {
        let splits = self.input.splits(config)?;
        self.state = JobState::Mapping;
        info!(job = %config.name, splits = splits.len(), "starting map stage");

        if !self.module.has_reduce() {
            let permits = Arc::new(Semaphore::new(config.parallelism()));
            let mut maps = JoinSet::new();
            for (index, split) in splits.into_iter().enumerate() {
                let sink = self.sink.clone();
                let config = config.clone();
                let permits = permits.clone();
                let mut runner = self.map_runner(index, &config, counters);
                maps.spawn(async move {
                    let _permit = acquire(permits).await?;
                    let writer = sink.open(runner.task_id(), &config).await?;
                    runner.run(split, writer).await
                });
            }
            let maps = await_tasks(maps, &self.cancel).await?;
            self.sink.commit(config).await?;
            return Ok((maps, vec![]));
        }

        let (tx, mut rx) = record_channel(config.channel_capacity);
        let mut stage = GroupStage::new(self.module.clone());
        let collector = tokio::spawn(async move {
            stage.consume(&mut rx).await;
            stage
        });

        let permits = Arc::new(Semaphore::new(config.parallelism()));
        let mut maps = JoinSet::new();
        for (index, split) in splits.into_iter().enumerate() {
            let writer: Arc<dyn RecordWriter> = Arc::new(tx.clone());
            let permits = permits.clone();
            let mut runner = self.map_runner(index, config, counters);
            maps.spawn(async move {
                let _permit = acquire(permits).await?;
                runner.run(split, writer).await
            });
        }
        let maps = await_tasks(maps, &self.cancel).await;
        tx.close();
        drop(tx);

        self.state = JobState::Grouping;
        let stage = collector
            .await
            .map_err(|e| MrError::Internal(format!("group stage panicked: {e}")))?;
        let maps = maps?;
        info!(
            job = %config.name,
            keys = stage.key_count(),
            records = stage.record_count(),
            "map stage finished"
        );
        let partitions = stage.into_partitions(config.reduce_tasks)?;

        self.state = JobState::Reducing;
        let mut reduces = JoinSet::new();
        for partition in partitions {
            let sink = self.sink.clone();
            let config = config.clone();
            let permits = permits.clone();
            let mut runner = ReduceTaskRunner::new(
                partition.index(),
                self.module.clone(),
                config.clone(),
                counters.clone(),
                self.cancel.clone(),
            );
            reduces.spawn(async move {
                let _permit = acquire(permits).await?;
                let writer = sink.open(runner.task_id(), &config).await?;
                runner.run(partition, writer).await
            });
        }
        let reduces = await_tasks(reduces, &self.cancel).await?;

        self.sink.commit(config).await?;
        Ok((maps, reduces))
    }

    fn map_runner(
        &self,
        index: usize,
        config: &FrozenJobConfig,
        counters: &Counters,
    ) -> MapTaskRunner {
        MapTaskRunner::new(
            index,
            self.module.clone(),
            config.clone(),
            counters.clone(),
            self.cancel.clone(),
        )
    }
}

async fn acquire(permits: Arc<Semaphore>) -> Result<OwnedSemaphorePermit> {
    permits
        .acquire_owned()
        .await
        .map_err(|_| MrError::Internal("task permits were closed".into()))
}

/// Wait for every task in `tasks`. The first failure cancels the rest and
/// is returned once they have all stopped.
async fn await_tasks(
    mut tasks: JoinSet<Result<TaskSummary>>,
    cancel: &CancellationToken,
) -> Result<Vec<TaskSummary>> {
    let mut summaries = Vec::with_capacity(tasks.len());
    let mut failure: Option<MrError> = None;

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| MrError::Internal(format!("task panicked: {e}")))
            .and_then(|result| result);
        match outcome {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                if failure.is_none() {
                    cancel.cancel();
                    failure = Some(e);
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            summaries.sort_by_key(|s| s.task.index);
            Ok(summaries)
        }
    }
}
