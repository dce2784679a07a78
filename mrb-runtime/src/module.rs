use std::cmp::Ordering;

use anyhow::anyhow;
use async_trait::async_trait;

use common::{FrozenJobConfig, JobConfig, Key, Value};

use crate::context::TaskContext;
use crate::negotiate::JobDefaults;
use crate::signal::Done;
use crate::values::ValueIterator;

/// Map and reduce logic loaded into the runtime.
///
/// Every invocation hook receives a [`Done`] signal and the runtime waits
/// for it after the hook's future resolves. A hook may therefore finish
/// its work synchronously and call `done.complete()` before returning, or
/// hand `done` to some other task that acknowledges later. Returning an
/// error and calling `done.fail(..)` are both reported as a logic failure
/// of the task.
///
/// Only `name` and `map` are required. The optional hooks have defaults
/// that do nothing; a module opts into combine or reduce through
/// [`has_combine`](JobModule::has_combine) and
/// [`has_reduce`](JobModule::has_reduce).
#[async_trait]
pub trait JobModule: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Settings applied to a job config before `job_setup` runs, for
    /// fields the submitter left unset.
    fn defaults(&self) -> JobDefaults {
        JobDefaults::default()
    }

    /// Called once per job, before any task runs.
    async fn job_setup(&self, _job: &mut JobConfig, done: Done) -> anyhow::Result<()> {
        done.complete();
        Ok(())
    }

    async fn map_setup(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn map(&self, key: Key, value: Value, ctx: TaskContext, done: Done)
        -> anyhow::Result<()>;

    async fn map_cleanup(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn has_combine(&self) -> bool {
        false
    }

    async fn combine_setup(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Pre-aggregate one map task's output for a single key.
    async fn combine(
        &self,
        key: Key,
        _values: ValueIterator,
        _ctx: TaskContext,
        _done: Done,
    ) -> anyhow::Result<()> {
        Err(anyhow!("module defines no combine hook (key `{key}`)"))
    }

    async fn combine_cleanup(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether the job has a reduce stage. Map-only jobs send map output
    /// straight to the output sink.
    fn has_reduce(&self) -> bool {
        true
    }

    async fn reduce_setup(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reduce(
        &self,
        key: Key,
        _values: ValueIterator,
        _ctx: TaskContext,
        _done: Done,
    ) -> anyhow::Result<()> {
        Err(anyhow!("module defines no reduce hook (key `{key}`)"))
    }

    async fn reduce_cleanup(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Pick the partition for a key. `None` falls back to hash partitioning.
    fn partition(&self, _key: &Key, _partitions: usize) -> Option<usize> {
        None
    }

    /// Order in which a partition's keys are handed to reduce.
    fn compare_keys(&self, a: &Key, b: &Key) -> Ordering {
        a.cmp(b)
    }

    /// Decides which keys share one reduce or combine call. Keys comparing
    /// `Equal` form a single group, delivered under the first of them in
    /// sort order.
    ///
    /// Must agree with [`compare_keys`](JobModule::compare_keys): keys it
    /// treats as equal have to sort next to each other.
    fn group_keys(&self, a: &Key, b: &Key) -> Ordering {
        self.compare_keys(a, b)
    }

    /// Called once after the job ends, successful or not.
    async fn job_cleanup(&self, _job: &FrozenJobConfig, _succeeded: bool) -> anyhow::Result<()> {
        Ok(())
    }
}
