//! A MapReduce-compatible application that computes the
//! degree of each vertex in a graph, given a list of edges.
//!
//! Every input line holds one edge as two whitespace-separated vertex ids.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use common::{Key, TypeTag, Value};
use mrb_runtime::{Done, JobDefaults, JobModule, TaskContext, ValueIterator};

pub struct VertexDegree;

fn parse_line(line: &str) -> Result<(u64, u64)> {
    let mut iter = line.split_whitespace().take(2);
    let a = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    let b = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    Ok((a, b))
}

#[async_trait]
impl JobModule for VertexDegree {
    fn name(&self) -> &str {
        "vertex-degree"
    }

    fn defaults(&self) -> JobDefaults {
        JobDefaults {
            output_key_type: Some(TypeTag::Text),
            output_value_type: Some(TypeTag::Int),
            ..JobDefaults::default()
        }
    }

    async fn map(&self, _key: Key, value: Value, ctx: TaskContext, done: Done) -> Result<()> {
        let text = value
            .as_text()
            .ok_or_else(|| anyhow!("edge list lines must be text"))?;
        let edges = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_line)
            .collect::<Result<Vec<_>>>()?;

        for (a, b) in edges {
            ctx.write(a.to_string(), 1).await?;
            ctx.write(b.to_string(), 1).await?;
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
    ) -> Result<()> {
        self.reduce(key, values, ctx, done).await
    }

    async fn reduce(
        &self,
        key: Key,
        values: ValueIterator,
        ctx: TaskContext,
        done: Done,
    ) -> Result<()> {
        let mut count = 0i64;

        for value in values {
            count += value
                .as_int()
                .ok_or_else(|| anyhow!("degree of vertex {key} is not an integer"))?;
        }

        ctx.write(key, count).await?;
        done.complete();
        Ok(())
    }
}
