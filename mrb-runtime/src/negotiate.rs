use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use common::{FrozenJobConfig, JobConfig, MrError, Result, TaskId, TypeTag};

use crate::io::OutputSink;
use crate::module::JobModule;
use crate::signal::completion;

/// Settings a module proposes for fields the submitter left unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDefaults {
    pub input_paths: Vec<String>,
    pub output_path: Option<String>,
    pub output_key_type: Option<TypeTag>,
    pub output_value_type: Option<TypeTag>,
    pub map_output_key_type: Option<TypeTag>,
    pub map_output_value_type: Option<TypeTag>,
}

impl JobDefaults {
    /// Fill the unset fields of `job`. Fields already set are left alone.
    pub fn apply(&self, job: &mut JobConfig) {
        if job.input_paths.is_empty() {
            job.input_paths = self.input_paths.clone();
        }
        if job.output_path.is_none() {
            job.output_path = self.output_path.clone();
        }
        fill(&mut job.output_key_type, self.output_key_type);
        fill(&mut job.output_value_type, self.output_value_type);
        fill(&mut job.map_output_key_type, self.map_output_key_type);
        fill(&mut job.map_output_value_type, self.map_output_value_type);
    }
}

fn fill(slot: &mut Option<TypeTag>, default: Option<TypeTag>) {
    if slot.is_none() {
        *slot = default;
    }
}

/// Prepares a job config before any task runs.
///
/// Negotiation happens once per job: module defaults are applied, the
/// module's `job_setup` hook runs and acknowledges, the result is checked
/// and then frozen. Tasks only ever see the frozen config.
pub struct JobConfigNegotiator {
    module: Arc<dyn JobModule>,
    sink: Option<Arc<dyn OutputSink>>,
    cancel: CancellationToken,
}

impl JobConfigNegotiator {
    pub fn new(module: Arc<dyn JobModule>) -> Self {
        Self {
            module,
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort negotiation when `cancel` fires, even while `job_setup` is
    /// still pending.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Also ask `sink` whether the output location is usable.
    pub fn with_output_check(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Negotiate `job` and freeze the result.
    ///
    /// A config that was already negotiated is only checked again: module
    /// defaults and `job_setup` are not applied a second time.
    pub async fn negotiate(&self, job: &mut JobConfig) -> Result<FrozenJobConfig> {
        if job.is_negotiated() {
            debug!(job = %job.name, "job configuration already negotiated");
        } else {
            info!(job = %job.name, module = self.module.name(), "negotiating job configuration");
            self.setup(job).await?;
        }

        self.validate(job)?;
        if let Some(sink) = &self.sink {
            sink.check_output(job).await?;
        }
        job.mark_negotiated();
        Ok(job.clone().freeze())
    }

    async fn setup(&self, job: &mut JobConfig) -> Result<()> {
        self.module.defaults().apply(job);

        let task = TaskId::job();
        let (done, completion) = completion();
        let returned = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MrError::Cancelled { task }),
            returned = self.module.job_setup(job, done) => returned,
        };
        returned.map_err(|e| setup_error(&task, e))?;
        let acknowledged = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MrError::Cancelled { task }),
            acknowledged = completion.wait() => acknowledged,
        };
        acknowledged.map_err(|e| setup_error(&task, e))?;
        debug!("job setup acknowledged");

        fill(&mut job.map_output_key_type, job.output_key_type);
        fill(&mut job.map_output_value_type, job.output_value_type);
        Ok(())
    }

    fn validate(&self, job: &JobConfig) -> Result<()> {
        if job.input_paths.is_empty() {
            return Err(MrError::Config("no input paths were set".into()));
        }
        if job.output_path.as_deref().map_or(true, str::is_empty) {
            return Err(MrError::Config("no output path was set".into()));
        }

        let tags = [
            ("output key type", job.output_key_type, true),
            ("output value type", job.output_value_type, false),
            ("map output key type", job.map_output_key_type, true),
            ("map output value type", job.map_output_value_type, false),
        ];
        for (what, tag, is_key) in tags {
            match tag {
                None => return Err(MrError::Config(format!("{what} was not set"))),
                Some(tag) if is_key && !tag.is_key_type() => {
                    return Err(MrError::Config(format!(
                        "{what} `{tag}` cannot describe a key"
                    )))
                }
                Some(_) => {}
            }
        }

        if job.channel_capacity == 0 {
            return Err(MrError::Config("channel capacity must be positive".into()));
        }
        if job.max_parallel_tasks == Some(0) {
            return Err(MrError::Config("at least one task must be allowed to run".into()));
        }
        if self.module.has_reduce() && job.reduce_tasks == 0 {
            return Err(MrError::Config(format!(
                "module `{}` has a reduce hook but no reduce tasks were requested",
                self.module.name()
            )));
        }
        Ok(())
    }
}

fn setup_error(task: &TaskId, error: anyhow::Error) -> MrError {
    match MrError::from_hook(task, None, error) {
        MrError::Logic { source, .. } => MrError::Config(format!("job setup failed: {source:#}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::io::MemorySink;
    use crate::signal::Done;
    use anyhow::bail;
    use async_trait::async_trait;
    use common::{Key, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Setup {
        calls: AtomicUsize,
        fail: bool,
        forget_ack: bool,
        hold_ack: bool,
        append_input: bool,
    }

    #[async_trait]
    impl JobModule for Setup {
        fn name(&self) -> &str {
            "setup"
        }

        fn defaults(&self) -> JobDefaults {
            JobDefaults {
                input_paths: vec!["/tmp/in.txt".into()],
                output_path: Some("/tmp/out/".into()),
                output_key_type: Some(TypeTag::Text),
                output_value_type: Some(TypeTag::Int),
                ..JobDefaults::default()
            }
        }

        async fn job_setup(&self, job: &mut JobConfig, done: Done) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("no such corpus");
            }
            job.set("setup.ran", "yes");
            if self.append_input {
                job.add_input_path("/tmp/extra");
            }
            if self.hold_ack {
                tokio::spawn(async move {
                    let _done = done;
                    std::future::pending::<()>().await;
                });
            } else if !self.forget_ack {
                tokio::spawn(async move { done.complete() });
            }
            Ok(())
        }

        async fn map(&self, _: Key, _: Value, _: TaskContext, done: Done) -> anyhow::Result<()> {
            done.complete();
            Ok(())
        }
    }

    #[tokio::test]
    async fn defaults_fill_unset_fields_and_setup_runs_once() {
        let module = Arc::new(Setup::default());
        let negotiator = JobConfigNegotiator::new(module.clone());
        let mut job = JobConfig::new("wc");

        let frozen = negotiator.negotiate(&mut job).await.unwrap();

        assert_eq!(module.calls.load(Ordering::SeqCst), 1);
        assert_eq!(frozen.input_paths, vec!["/tmp/in.txt"]);
        assert_eq!(frozen.output_path.as_deref(), Some("/tmp/out/"));
        assert_eq!(frozen.map_output_key_type, Some(TypeTag::Text));
        assert_eq!(frozen.map_output_value_type, Some(TypeTag::Int));
        assert_eq!(frozen.get("setup.ran"), Some("yes"));
        assert_eq!(*frozen, job);
    }

    #[tokio::test]
    async fn explicit_settings_win_over_defaults() {
        let negotiator = JobConfigNegotiator::new(Arc::new(Setup::default()));
        let mut job = JobConfig::new("wc");
        job.set_input_paths(["a.txt", "b.txt"]).set_output_path("out");

        let frozen = negotiator.negotiate(&mut job).await.unwrap();
        assert_eq!(frozen.input_paths, vec!["a.txt", "b.txt"]);
        assert_eq!(frozen.output_path.as_deref(), Some("out"));
    }

    #[tokio::test]
    async fn negotiation_is_idempotent() {
        let negotiator = JobConfigNegotiator::new(Arc::new(Setup::default()));
        let mut job = JobConfig::new("wc");
        let first = negotiator.negotiate(&mut job).await.unwrap();
        let second = negotiator.negotiate(&mut job).await.unwrap();
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn renegotiation_runs_no_second_setup() {
        let module = Arc::new(Setup {
            append_input: true,
            ..Setup::default()
        });
        let negotiator = JobConfigNegotiator::new(module.clone());
        let mut job = JobConfig::new("wc");
        job.set_output_path("out");

        let first = negotiator.negotiate(&mut job).await.unwrap();
        assert!(job.is_negotiated());
        let second = negotiator.negotiate(&mut job).await.unwrap();

        assert_eq!(module.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.input_paths, vec!["/tmp/in.txt", "/tmp/extra"]);
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_setup() {
        let cancel = CancellationToken::new();
        let negotiator = JobConfigNegotiator::new(Arc::new(Setup {
            hold_ack: true,
            ..Setup::default()
        }))
        .with_cancellation(cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::task::yield_now().await;
            cancel.cancel();
        });
        let mut job = JobConfig::new("wc");
        let err = negotiator.negotiate(&mut job).await.unwrap_err();
        trigger.await.unwrap();

        assert!(err.is_cancelled());
        assert!(!job.is_negotiated());
    }

    #[tokio::test]
    async fn setup_failure_is_a_config_error() {
        let negotiator = JobConfigNegotiator::new(Arc::new(Setup {
            fail: true,
            ..Setup::default()
        }));
        let err = negotiator.negotiate(&mut JobConfig::new("wc")).await.unwrap_err();
        assert!(matches!(err, MrError::Config(ref msg) if msg.contains("no such corpus")));
    }

    #[tokio::test]
    async fn missing_acknowledgment_is_a_config_error() {
        let negotiator = JobConfigNegotiator::new(Arc::new(Setup {
            forget_ack: true,
            ..Setup::default()
        }));
        let err = negotiator.negotiate(&mut JobConfig::new("wc")).await.unwrap_err();
        assert!(matches!(err, MrError::Config(_)));
    }

    #[tokio::test]
    async fn rejects_unusable_settings() {
        let negotiator = JobConfigNegotiator::new(Arc::new(Setup::default()));

        let mut job = JobConfig::new("wc");
        job.set_output_key_type(TypeTag::Int);
        assert!(matches!(
            negotiator.negotiate(&mut job).await,
            Err(MrError::Config(ref msg)) if msg.contains("cannot describe a key")
        ));

        let mut job = JobConfig::new("wc");
        job.set_reduce_tasks(0);
        assert!(matches!(negotiator.negotiate(&mut job).await, Err(MrError::Config(_))));

        let mut job = JobConfig::new("wc");
        job.set_channel_capacity(0);
        assert!(matches!(negotiator.negotiate(&mut job).await, Err(MrError::Config(_))));

        let mut job = JobConfig::new("wc");
        job.set_max_parallel_tasks(0);
        assert!(matches!(negotiator.negotiate(&mut job).await, Err(MrError::Config(_))));
    }

    #[tokio::test]
    async fn existing_output_is_rejected_by_the_sink() {
        let sink = MemorySink::new();
        sink.mark_existing("/tmp/out/").await;
        let negotiator =
            JobConfigNegotiator::new(Arc::new(Setup::default())).with_output_check(Arc::new(sink));
        assert!(matches!(
            negotiator.negotiate(&mut JobConfig::new("wc")).await,
            Err(MrError::Config(ref msg)) if msg.contains("already exists")
        ));
    }
}
