//! Task runtime for job modules.
//!
//! A job is negotiated once by the [`JobConfigNegotiator`], then every input
//! [`Split`] is handed to a [`MapTaskRunner`]. Map emissions flow through a
//! bounded record channel into the [`GroupStage`], which groups them by key
//! and cuts them into partitions. Each [`Partition`] is reduced by a
//! [`ReduceTaskRunner`] that hands the module one [`ValueIterator`] per key.
//! [`JobDriver`] wires the stages together for a whole job.

pub mod channel;
pub mod context;
pub mod driver;
pub mod group;
pub mod io;
pub mod map;
pub mod module;
pub mod negotiate;
pub mod reduce;
pub mod signal;
pub mod task;
pub mod values;

pub use channel::{record_channel, RecordReceiver, RecordSender};
pub use context::{Counters, EmitPhase, RecordWriter, TaskContext, TASK_COUNTER_GROUP};
pub use driver::{JobDriver, JobReport};
pub use group::{Group, GroupStage, Partition};
pub use io::{InputSource, MemoryInput, MemorySink, OutputSink};
pub use map::{MapTaskRunner, Split};
pub use module::JobModule;
pub use negotiate::{JobConfigNegotiator, JobDefaults};
pub use reduce::ReduceTaskRunner;
pub use signal::{completion, Completion, Done};
pub use task::{TaskState, TaskSummary};
pub use values::{ValueIterator, ValueSource};
