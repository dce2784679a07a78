use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::info;

use common::codec::encode_line;
use common::{FrozenJobConfig, JobConfig, KeyValue, MrError, Result, TaskId, TaskKind};
use mrb_runtime::{OutputSink, RecordWriter};

pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Writes job output as tab-separated text, one `part-*` file per task.
#[derive(Debug, Clone, Default)]
pub struct TextOutput;

impl TextOutput {
    pub fn new() -> Self {
        Self
    }
}

fn output_dir(job: &JobConfig) -> Result<PathBuf> {
    job.output_path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| MrError::Config("no output path was set".into()))
}

/// Name of the file holding the output of `task`.
pub fn part_name(task: &TaskId) -> Result<String> {
    match task.kind {
        TaskKind::Map => Ok(format!("part-m-{:05}", task.index)),
        TaskKind::Reduce => Ok(format!("part-r-{:05}", task.index)),
        TaskKind::Job => Err(MrError::Internal("the job itself writes no records".into())),
    }
}

#[async_trait]
impl OutputSink for TextOutput {
    async fn check_output(&self, job: &JobConfig) -> Result<()> {
        let dir = output_dir(job)?;
        if fs::try_exists(&dir).await? {
            return Err(MrError::Config(format!(
                "output location `{}` already exists",
                dir.display()
            )));
        }
        Ok(())
    }

    async fn open(&self, task: &TaskId, job: &FrozenJobConfig) -> Result<Arc<dyn RecordWriter>> {
        let dir = output_dir(job)?;
        fs::create_dir_all(&dir).await?;
        let file = File::create(dir.join(part_name(task)?)).await?;
        Ok(Arc::new(TextWriter {
            out: Mutex::new(BufWriter::new(file)),
        }))
    }

    async fn commit(&self, job: &FrozenJobConfig) -> Result<()> {
        let dir = output_dir(job)?;
        fs::create_dir_all(&dir).await?;
        File::create(dir.join(SUCCESS_MARKER)).await?;
        info!(output = %dir.display(), "job output committed");
        Ok(())
    }
}

struct TextWriter {
    out: Mutex<BufWriter<File>>,
}

#[async_trait]
impl RecordWriter for TextWriter {
    async fn write(&self, record: KeyValue) -> Result<()> {
        let mut line = encode_line(&record);
        line.push('\n');
        self.out.lock().await.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        self.out.lock().await.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(dir: &std::path::Path) -> JobConfig {
        let mut job = JobConfig::new("test");
        job.set_output_path(dir.display().to_string());
        job
    }

    #[tokio::test]
    async fn writes_part_files_and_marks_success() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        let job = job(&out);
        let output = TextOutput::new();
        output.check_output(&job).await.unwrap();

        let frozen = job.freeze();
        let writer = output.open(&TaskId::reduce(1), &frozen).await.unwrap();
        writer.write(KeyValue::new("the", 2)).await.unwrap();
        writer.write(KeyValue::new("cat", 1)).await.unwrap();
        writer.finish().await.unwrap();
        output.commit(&frozen).await.unwrap();

        let text = std::fs::read_to_string(out.join("part-r-00001")).unwrap();
        assert_eq!(text, "the\t2\ncat\t1\n");
        assert!(out.join(SUCCESS_MARKER).exists());
    }

    #[tokio::test]
    async fn existing_output_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let err = TextOutput::new().check_output(&job(root.path())).await.unwrap_err();
        assert!(matches!(err, MrError::Config(ref msg) if msg.contains("already exists")));
    }

    #[test]
    fn part_names_follow_the_task() {
        assert_eq!(part_name(&TaskId::map(7)).unwrap(), "part-m-00007");
        assert_eq!(part_name(&TaskId::reduce(0)).unwrap(), "part-r-00000");
        assert!(part_name(&TaskId::job()).is_err());
    }
}
