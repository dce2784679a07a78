//! Map-only search. Emits every input line containing the pattern given as
//! the first module argument.

use anyhow::anyhow;
use async_trait::async_trait;

use common::{JobConfig, Key, TypeTag, Value};
use mrb_runtime::{Done, JobDefaults, JobModule, TaskContext};

pub struct Grep;

#[async_trait]
impl JobModule for Grep {
    fn name(&self) -> &str {
        "grep"
    }

    fn defaults(&self) -> JobDefaults {
        JobDefaults {
            output_key_type: Some(TypeTag::Text),
            output_value_type: Some(TypeTag::Text),
            ..JobDefaults::default()
        }
    }

    async fn job_setup(&self, job: &mut JobConfig, done: Done) -> anyhow::Result<()> {
        match job.args.first() {
            Some(pattern) if !pattern.is_empty() => done.complete(),
            _ => done.fail(anyhow!("grep needs a pattern as its first argument")),
        }
        Ok(())
    }

    async fn map(&self, key: Key, value: Value, ctx: TaskContext, done: Done) -> anyhow::Result<()> {
        let pattern = ctx
            .configuration()
            .args
            .first()
            .cloned()
            .unwrap_or_default();
        if let Value::Text(line) = value {
            if line.contains(pattern.as_str()) {
                ctx.write(key, line).await?;
            }
        }
        done.complete();
        Ok(())
    }

    fn has_reduce(&self) -> bool {
        false
    }
}
