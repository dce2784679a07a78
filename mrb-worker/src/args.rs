use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the workloads this worker can run.
    List,
    /// Run a job locally, from input files to an output directory.
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Name of the workload
    #[arg(short, long)]
    pub workload: String,

    /// Input file, directory or glob pattern. May be repeated.
    #[arg(short, long)]
    pub input: Vec<String>,

    /// Output directory. Must not exist yet.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Number of reduce partitions.
    #[arg(short, long)]
    pub reducers: Option<usize>,

    /// Capacity of the channel between the map and group stages.
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Most map or reduce tasks running at once. Defaults to one per core.
    #[arg(short = 'p', long)]
    pub parallelism: Option<usize>,

    /// Cut input files into splits of this many lines instead of one split per file.
    #[arg(long)]
    pub lines_per_split: Option<usize>,

    /// Read input lines as tab-separated key/value pairs.
    #[arg(long)]
    pub kv_input: bool,

    /// JSON job configuration. Command line flags override its fields.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Job property, as `key=value`. May be repeated.
    #[arg(short = 'D', value_name = "KEY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Auxiliary arguments to pass to the MapReduce application.
    #[clap(value_parser, last = true)]
    pub args: Vec<String>,
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

pub fn parse_args() -> Commands {
    Args::parse().command
}
