//! One-shot completion signal handed to every hook invocation.

use anyhow::anyhow;
use tokio::sync::oneshot;

/// The hook's side of the completion signal.
///
/// A hook must call exactly one of [`Done::complete`] or [`Done::fail`].
/// Both consume the signal, so it cannot be acknowledged twice. Dropping it
/// without calling either fails the invocation.
#[derive(Debug)]
#[must_use = "the runtime waits until `complete` or `fail` is called"]
pub struct Done {
    tx: oneshot::Sender<anyhow::Result<()>>,
}

impl Done {
    pub fn complete(self) {
        let _ = self.tx.send(Ok(()));
    }

    pub fn fail(self, error: impl Into<anyhow::Error>) {
        let _ = self.tx.send(Err(error.into()));
    }

    /// Complete or fail depending on `result`.
    pub fn finish(self, result: anyhow::Result<()>) {
        let _ = self.tx.send(result);
    }
}

/// The runtime's side of the completion signal.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<anyhow::Result<()>>,
}

impl Completion {
    /// Wait for the hook to acknowledge.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("completion signal dropped without being called")),
        }
    }
}

pub fn completion() -> (Done, Completion) {
    let (tx, rx) = oneshot::channel();
    (Done { tx }, Completion { rx })
}
