use tracing_subscriber::EnvFilter;

mod args;
use args::{parse_args, Commands};

mod core;
mod input;
mod output;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match parse_args() {
        Commands::List => core::list(),
        Commands::Run(args) => {
            let report = core::run(args).await?;
            core::print_report(&report);
        }
    }

    Ok(())
}
