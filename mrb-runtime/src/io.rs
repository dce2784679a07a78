//! Collaborators at the edges of a job: where splits come from and where
//! final records go.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use common::{FrozenJobConfig, JobConfig, KeyValue, MrError, Result, TaskId};

use crate::context::RecordWriter;
use crate::map::Split;

/// Produces the input splits of a job.
pub trait InputSource: Send + Sync {
    fn splits(&self, job: &FrozenJobConfig) -> Result<Vec<Split>>;
}

/// Receives the final records of a job.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Called during negotiation. Fails if the output location cannot be
    /// used, for instance because it already exists.
    async fn check_output(&self, _job: &JobConfig) -> Result<()> {
        Ok(())
    }

    /// A writer for the records of one task.
    async fn open(&self, task: &TaskId, job: &FrozenJobConfig) -> Result<Arc<dyn RecordWriter>>;

    /// Called once after every task succeeded.
    async fn commit(&self, _job: &FrozenJobConfig) -> Result<()> {
        Ok(())
    }

    /// Called once after a task failed.
    async fn abort(&self, _job: &FrozenJobConfig) -> Result<()> {
        Ok(())
    }
}

/// Input held in memory, one split per inner vector.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    splits: Vec<Vec<KeyValue>>,
}

impl MemoryInput {
    pub fn new(splits: Vec<Vec<KeyValue>>) -> Self {
        Self { splits }
    }

    /// One split per text. Each line becomes a record keyed by its byte
    /// offset within the text.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let splits = texts
            .into_iter()
            .map(|text| {
                let mut offset = 0;
                text.as_ref()
                    .split_inclusive('\n')
                    .map(|raw| {
                        let line = raw.trim_end_matches(['\n', '\r']);
                        let record = KeyValue::new(offset.to_string(), line);
                        offset += raw.len();
                        record
                    })
                    .collect()
            })
            .collect();
        Self { splits }
    }
}

impl InputSource for MemoryInput {
    fn splits(&self, _job: &FrozenJobConfig) -> Result<Vec<Split>> {
        Ok(self
            .splits
            .iter()
            .enumerate()
            .map(|(id, records)| Split::from_records(id, records.clone()))
            .collect())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<(TaskId, KeyValue)>,
    existing: HashSet<String>,
    committed: bool,
    aborted: bool,
}

/// Output kept in memory. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `path` already holds output.
    pub async fn mark_existing(&self, path: impl Into<String>) {
        self.state.lock().await.existing.insert(path.into());
    }

    /// Every record written so far, in arrival order.
    pub async fn records(&self) -> Vec<KeyValue> {
        let state = self.state.lock().await;
        state.records.iter().map(|(_, kv)| kv.clone()).collect()
    }

    pub async fn records_of(&self, task: &TaskId) -> Vec<KeyValue> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .filter(|(t, _)| t == task)
            .map(|(_, kv)| kv.clone())
            .collect()
    }

    pub async fn is_committed(&self) -> bool {
        self.state.lock().await.committed
    }

    pub async fn is_aborted(&self) -> bool {
        self.state.lock().await.aborted
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn check_output(&self, job: &JobConfig) -> Result<()> {
        let state = self.state.lock().await;
        match &job.output_path {
            Some(path) if state.existing.contains(path) => Err(MrError::Config(format!(
                "output location `{path}` already exists"
            ))),
            _ => Ok(()),
        }
    }

    async fn open(&self, task: &TaskId, _job: &FrozenJobConfig) -> Result<Arc<dyn RecordWriter>> {
        Ok(Arc::new(MemoryWriter {
            task: task.clone(),
            state: self.state.clone(),
        }))
    }

    async fn commit(&self, job: &FrozenJobConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        state.committed = true;
        if let Some(path) = &job.output_path {
            state.existing.insert(path.clone());
        }
        Ok(())
    }

    async fn abort(&self, _job: &FrozenJobConfig) -> Result<()> {
        self.state.lock().await.aborted = true;
        Ok(())
    }
}

struct MemoryWriter {
    task: TaskId,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl RecordWriter for MemoryWriter {
    async fn write(&self, record: KeyValue) -> Result<()> {
        self.state.lock().await.records.push((self.task.clone(), record));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texts_become_offset_keyed_lines() {
        let input = MemoryInput::from_texts(["ab\r\ncd\n", "x"]);
        let mut splits = input.splits(&JobConfig::new("t").freeze()).unwrap();
        assert_eq!(splits.len(), 2);

        let first: Vec<String> = splits
            .remove(0)
            .map(|r| r.unwrap().to_string())
            .collect();
        assert_eq!(first, vec!["0\tab", "4\tcd"]);
    }

    #[tokio::test]
    async fn sink_keeps_records_per_task() {
        let sink = MemorySink::new();
        let job = JobConfig::new("t").freeze();
        let a = sink.open(&TaskId::reduce(0), &job).await.unwrap();
        let b = sink.open(&TaskId::reduce(1), &job).await.unwrap();
        a.write(KeyValue::new("x", 1)).await.unwrap();
        b.write(KeyValue::new("y", 2)).await.unwrap();

        assert_eq!(sink.records().await.len(), 2);
        assert_eq!(sink.records_of(&TaskId::reduce(1)).await, vec![KeyValue::new("y", 2)]);
    }

    #[tokio::test]
    async fn committed_output_counts_as_existing() {
        let sink = MemorySink::new();
        let mut job = JobConfig::new("t");
        job.set_output_path("out");
        sink.check_output(&job).await.unwrap();
        sink.commit(&job.clone().freeze()).await.unwrap();
        assert!(sink.is_committed().await);
        assert!(sink.check_output(&job).await.is_err());
    }
}
