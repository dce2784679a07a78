use std::fmt;

use crate::value::TypeTag;
use crate::Key;

/// What kind of work a task performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Job-level hooks (setup and cleanup).
    Job,
    Map,
    Reduce,
}

/// Identity of a task, reported with every task failure.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub kind: TaskKind,
    pub index: usize,
}

impl TaskId {
    pub fn job() -> Self {
        Self {
            kind: TaskKind::Job,
            index: 0,
        }
    }

    pub fn map(index: usize) -> Self {
        Self {
            kind: TaskKind::Map,
            index,
        }
    }

    pub fn reduce(index: usize) -> Self {
        Self {
            kind: TaskKind::Reduce,
            index,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TaskKind::Job => f.write_str("job"),
            TaskKind::Map => write!(f, "m-{:05}", self.index),
            TaskKind::Reduce => write!(f, "r-{:05}", self.index),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MrError {
    /// Invalid or unusable job settings. Fatal to the whole job.
    #[error("invalid job configuration: {0}")]
    Config(String),

    /// A map, combine or reduce hook threw or signalled failure.
    #[error("task {task} failed on {}: {source:#}", describe(.record))]
    Logic {
        task: TaskId,
        record: Option<String>,
        source: anyhow::Error,
    },

    /// `next_value` was called on a drained value iterator.
    #[error("value iterator for key `{key}` is exhausted")]
    IteratorExhausted { key: Key },

    /// A record was pushed after the record channel was closed.
    #[error("record channel is closed")]
    ChannelClosed,

    /// The task observed the job being aborted.
    #[error("task {task} cancelled")]
    Cancelled { task: TaskId },

    #[error("type mismatch in {what} from task {task}: expected {expected}, received {found}")]
    TypeMismatch {
        task: TaskId,
        what: &'static str,
        expected: TypeTag,
        found: TypeTag,
    },

    #[error("illegal partition {partition} for key `{key}` ({partitions} partitions)")]
    IllegalPartition {
        key: Key,
        partition: usize,
        partitions: usize,
    },

    /// The input collaborator could not deliver a split.
    #[error("input error: {0}")]
    Input(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe(record: &Option<String>) -> &str {
    record.as_deref().unwrap_or("setup/cleanup")
}

impl MrError {
    /// Wrap a hook failure, passing runtime errors that travelled through the
    /// hook (closed channel, cancellation, type mismatch) through unchanged.
    pub fn from_hook(task: &TaskId, record: Option<String>, error: anyhow::Error) -> Self {
        match error.downcast::<MrError>() {
            Ok(inner) => inner,
            Err(source) => MrError::Logic {
                task: task.clone(),
                record,
                source,
            },
        }
    }

    /// The task this error is attributed to, if any.
    pub fn task(&self) -> Option<&TaskId> {
        match self {
            MrError::Logic { task, .. }
            | MrError::Cancelled { task }
            | MrError::TypeMismatch { task, .. } => Some(task),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MrError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, MrError>;
