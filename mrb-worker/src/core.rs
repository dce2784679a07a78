use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::signal;
use tracing::{info, warn};

use common::JobConfig;
use mrb_runtime::{JobDriver, JobReport};

use crate::args::RunArgs;
use crate::input::{LineFormat, TextInput};
use crate::output::TextOutput;

pub fn list() {
    for name in workload::names() {
        println!("{name}");
    }
}

/// Build the job config: the JSON file if given, overridden by flags.
pub fn build_config(args: &RunArgs) -> Result<JobConfig> {
    let mut job = match &args.config {
        Some(path) => JobConfig::from_json_file(path)?,
        None => JobConfig::default(),
    };
    if job.name.is_empty() {
        job.name = args.workload.clone();
    }
    if !args.input.is_empty() {
        job.set_input_paths(args.input.iter().cloned());
    }
    if let Some(output) = &args.output {
        job.set_output_path(output);
    }
    if let Some(reducers) = args.reducers {
        job.set_reduce_tasks(reducers);
    }
    if let Some(capacity) = args.capacity {
        job.set_channel_capacity(capacity);
    }
    if let Some(tasks) = args.parallelism {
        job.set_max_parallel_tasks(tasks);
    }
    for (key, value) in &args.properties {
        job.set(key, value);
    }
    if !args.args.is_empty() {
        job.args = args.args.clone();
    }
    Ok(job)
}

pub async fn run(args: RunArgs) -> Result<JobReport> {
    let module = workload::try_named(&args.workload)
        .ok_or_else(|| anyhow!("The workload `{}` is not a known workload", args.workload))?;
    let job = build_config(&args)?;

    let format = if args.kv_input {
        LineFormat::KeyValue
    } else {
        LineFormat::Offset
    };
    let input = TextInput::new(format, args.lines_per_split);
    let mut driver = JobDriver::new(module, Arc::new(input), Arc::new(TextOutput::new()));

    let cancel = driver.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling job");
            cancel.cancel();
        }
    });

    info!("Running workload `{}`", args.workload);
    let report = driver.run(job).await?;
    Ok(report)
}

pub fn print_report(report: &JobReport) {
    println!("[Job `{}`]", report.config.name);
    println!(
        "map tasks: {}, reduce tasks: {}",
        report.map_tasks.len(),
        report.reduce_tasks.len()
    );
    for ((group, name), value) in &report.counters {
        println!("{group}.{name}={value}");
    }
}
