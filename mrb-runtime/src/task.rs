//! Task lifecycle shared by map and reduce runners.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use common::{MrError, Result, TaskId};

use crate::signal::Completion;

/// State of a map or reduce task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No invocation in flight.
    Idle,

    /// The hook for the record or key at `position` is running.
    Running { position: usize },

    /// The hook returned; waiting for its completion signal.
    AwaitingCallback { position: usize },

    Completed,

    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Idle, Running { .. } | Completed | Failed) => true,
            (Running { position: a }, AwaitingCallback { position: b }) => a == b,
            (Running { .. }, Failed) => true,
            (AwaitingCallback { .. }, Idle | Failed) => true,
            _ => false,
        }
    }
}

/// What a finished task reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub task: TaskId,
    /// Number of completed hook invocations.
    pub invocations: usize,
    pub state: TaskState,
}

/// Drives one task through its states, one hook invocation at a time.
#[derive(Debug)]
pub(crate) struct TaskMachine {
    task: TaskId,
    state: TaskState,
    invocations: usize,
}

impl TaskMachine {
    pub(crate) fn new(task: TaskId) -> Self {
        Self {
            task,
            state: TaskState::Idle,
            invocations: 0,
        }
    }

    pub(crate) fn task(&self) -> &TaskId {
        &self.task
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(MrError::Internal(format!(
                "task {} cannot move from {:?} to {:?}",
                self.task, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Mark the task failed and hand back the error.
    pub(crate) fn fail(&mut self, err: MrError) -> MrError {
        if !self.state.is_terminal() {
            self.state = TaskState::Failed;
        }
        if err.is_cancelled() {
            debug!(task = %self.task, "task cancelled");
        } else {
            error!(task = %self.task, "task failed: {err}");
        }
        err
    }

    pub(crate) fn complete(&mut self) -> Result<TaskSummary> {
        self.transition(TaskState::Completed)?;
        Ok(self.summary())
    }

    pub(crate) fn summary(&self) -> TaskSummary {
        TaskSummary {
            task: self.task.clone(),
            invocations: self.invocations,
            state: self.state,
        }
    }

    fn cancelled(&mut self) -> MrError {
        let task = self.task.clone();
        self.fail(MrError::Cancelled { task })
    }

    /// Run one hook invocation: await the hook, then its completion signal.
    ///
    /// `record` describes the record or key for error reports and is only
    /// evaluated on failure.
    pub(crate) async fn invoke<F>(
        &mut self,
        position: usize,
        record: impl FnOnce() -> String,
        call: F,
        completion: Completion,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        if cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        self.transition(TaskState::Running { position })?;

        let returned = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled()),
            returned = call => returned,
        };
        if let Err(e) = returned {
            let err = MrError::from_hook(&self.task, Some(record()), e);
            return Err(self.fail(err));
        }

        self.transition(TaskState::AwaitingCallback { position })?;
        let acknowledged = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled()),
            acknowledged = completion.wait() => acknowledged,
        };
        if let Err(e) = acknowledged {
            let err = MrError::from_hook(&self.task, Some(record()), e);
            return Err(self.fail(err));
        }

        self.transition(TaskState::Idle)?;
        self.invocations += 1;
        Ok(())
    }

    /// Run a setup or cleanup hook. These have no completion signal.
    pub(crate) async fn lifecycle<F>(&mut self, call: F, cancel: &CancellationToken) -> Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        if cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        let returned = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled()),
            returned = call => returned,
        };
        returned.map_err(|e| {
            let err = MrError::from_hook(&self.task, None, e);
            self.fail(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::completion;
    use anyhow::anyhow;

    #[test]
    fn legal_transitions() {
        use TaskState::*;
        assert!(Idle.can_transition_to(Running { position: 0 }));
        assert!(Running { position: 0 }.can_transition_to(AwaitingCallback { position: 0 }));
        assert!(!Running { position: 0 }.can_transition_to(AwaitingCallback { position: 1 }));
        assert!(AwaitingCallback { position: 0 }.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(AwaitingCallback { position: 0 }));
        assert!(!Running { position: 0 }.can_transition_to(Running { position: 1 }));
        assert!(!Completed.can_transition_to(Idle));
        assert!(!Failed.can_transition_to(Running { position: 0 }));
    }

    #[tokio::test]
    async fn invoke_returns_to_idle() {
        let mut machine = TaskMachine::new(TaskId::map(0));
        let cancel = CancellationToken::new();
        let (done, completion) = completion();
        machine
            .invoke(0, String::new, async move { done.complete(); Ok(()) }, completion, &cancel)
            .await
            .unwrap();
        assert_eq!(machine.state(), TaskState::Idle);
        assert_eq!(machine.invocations, 1);
        assert_eq!(machine.complete().unwrap().state, TaskState::Completed);
    }

    #[tokio::test]
    async fn failed_acknowledgment_fails_the_task() {
        let mut machine = TaskMachine::new(TaskId::reduce(1));
        let cancel = CancellationToken::new();
        let (done, completion) = completion();
        let err = machine
            .invoke(
                4,
                || "key `x`".to_string(),
                async move {
                    done.fail(anyhow!("nope"));
                    Ok(())
                },
                completion,
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(machine.state(), TaskState::Failed);
        assert_eq!(err.to_string(), "task r-00001 failed on key `x`: nope");
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_acknowledgment() {
        let mut machine = TaskMachine::new(TaskId::map(2));
        let cancel = CancellationToken::new();
        let (done, completion) = completion();
        let trigger = cancel.clone();
        let err = machine
            .invoke(
                0,
                String::new,
                async move {
                    // Acknowledge never arrives; the job is aborted instead.
                    tokio::spawn(async move {
                        let _keep = done;
                        trigger.cancel();
                        std::future::pending::<()>().await;
                    });
                    Ok(())
                },
                completion,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(machine.state(), TaskState::Failed);
    }

    #[tokio::test]
    async fn cancelled_task_starts_no_invocation() {
        let mut machine = TaskMachine::new(TaskId::map(0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (done, completion) = completion();
        let err = machine
            .invoke(0, String::new, async move { done.complete(); Ok(()) }, completion, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(machine.invocations, 0);
    }
}
