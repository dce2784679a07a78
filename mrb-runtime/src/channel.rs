//! Bounded record conduit between the map stage and the group stage.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use common::{KeyValue, MrError, Result};

use crate::context::RecordWriter;

/// Create a bounded record channel holding at most `capacity` records.
///
/// Any number of [`RecordSender`]s may push; exactly one [`RecordReceiver`]
/// pops. Records from one sender arrive in the order they were pushed.
pub fn record_channel(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        RecordSender {
            tx,
            closed: closed.clone(),
        },
        RecordReceiver { rx, closed },
    )
}

/// Producer half of the record channel.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<KeyValue>,
    closed: CancellationToken,
}

impl RecordSender {
    /// Push a record, waiting while the channel is full.
    ///
    /// Fails with [`MrError::ChannelClosed`] once the channel was closed,
    /// including pushes that were blocked at the time it closed.
    pub async fn push(&self, record: KeyValue) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(MrError::ChannelClosed);
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(MrError::ChannelClosed),
            sent = self.tx.send(record) => sent.map_err(|_| MrError::ChannelClosed),
        }
    }

    /// Stop accepting pushes. Records already buffered are still delivered.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("record channel closed by producer side");
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

#[async_trait]
impl RecordWriter for RecordSender {
    async fn write(&self, record: KeyValue) -> Result<()> {
        self.push(record).await
    }
}

/// Consumer half of the record channel.
#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::Receiver<KeyValue>,
    closed: CancellationToken,
}

impl RecordReceiver {
    /// Pop the next record, waiting while the channel is empty.
    ///
    /// Returns `None` at end of input: the channel was closed and drained,
    /// or every sender was dropped.
    pub async fn pop(&mut self) -> Option<KeyValue> {
        if self.closed.is_cancelled() {
            return self.drain_one();
        }
        tokio::select! {
            biased;
            record = self.rx.recv() => record,
            _ = self.closed.cancelled() => self.drain_one(),
        }
    }

    fn drain_one(&mut self) -> Option<KeyValue> {
        self.rx.close();
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.closed.cancel();
        self.rx.close();
    }
}
