//! Word count. Counts how often each whitespace-separated word occurs.
//!
//! Set the `wordcount.lowercase` property to `true` to fold case first.

use async_trait::async_trait;
use tracing::debug;

use common::{JobConfig, Key, TypeTag, Value};
use mrb_runtime::{Done, JobDefaults, JobModule, TaskContext, ValueIterator};

pub const DEFAULT_INPUT: &str = "/tmp/wordcount/4300.txt";
pub const DEFAULT_OUTPUT: &str = "/tmp/wordcount/uniques/";

pub const LOWERCASE: &str = "wordcount.lowercase";

pub struct WordCount;

/// Sum every count in `values`. Shared by the combiner and the reducer.
async fn sum(key: Key, values: ValueIterator, ctx: TaskContext, done: Done) -> anyhow::Result<()> {
    let mut total = 0i64;
    for value in values {
        total += match value {
            Value::Int(n) => n,
            other => anyhow::bail!("count for `{key}` is not an integer: {other}"),
        };
    }
    ctx.write(key, total).await?;
    done.complete();
    Ok(())
}

#[async_trait]
impl JobModule for WordCount {
    fn name(&self) -> &str {
        "wc"
    }

    fn defaults(&self) -> JobDefaults {
        JobDefaults {
            output_key_type: Some(TypeTag::Text),
            output_value_type: Some(TypeTag::Int),
            ..JobDefaults::default()
        }
    }

    async fn job_setup(&self, job: &mut JobConfig, done: Done) -> anyhow::Result<()> {
        if job.input_paths.is_empty() {
            job.add_input_path(DEFAULT_INPUT);
        }
        if job.output_path.is_none() {
            job.set_output_path(DEFAULT_OUTPUT);
        }
        debug!(input = ?job.input_paths, output = ?job.output_path, "word count job set up");
        done.complete();
        Ok(())
    }

    async fn map(&self, _key: Key, value: Value, ctx: TaskContext, done: Done) -> anyhow::Result<()> {
        let lowercase = ctx.configuration().get(LOWERCASE) == Some("true");
        let line = match value {
            Value::Text(line) => line,
            other => other.to_string(),
        };
        for word in line.split_whitespace() {
            if lowercase {
                ctx.write(word.to_lowercase(), 1).await?;
            } else {
                ctx.write(word, 1).await?;
            }
        }
        done.complete();
        Ok(())
    }

    fn has_combine(&self) -> bool {
        true
    }

    async fn combine(
        &self,
        key: Key,
        values: ValueIterator,
        ctx: TaskContext,
        done: Done,
    ) -> anyhow::Result<()> {
        sum(key, values, ctx, done).await
    }

    async fn reduce(
        &self,
        key: Key,
        values: ValueIterator,
        ctx: TaskContext,
        done: Done,
    ) -> anyhow::Result<()> {
        sum(key, values, ctx, done).await
    }
}
