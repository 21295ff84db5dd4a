mod cli;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use ingestbox::config::Config;
use ingestbox::jobs::JobType;
use ingestbox::{api, worker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Api(args) => api::run(args.address).await?,
        Commands::Worker(args) => {
            let config = Config::load().map_err(|e| format!("failed to load config: {e}"))?;
            let queue: JobType = args
                .queue
                .as_deref()
                .unwrap_or(&config.worker.queue)
                .parse()?;
            if args.once {
                let processed = worker::run_once(config, queue).await?;
                if !processed {
                    eprintln!("No pending jobs.");
                }
            } else {
                let poll_ms = args.poll_ms.unwrap_or(config.worker.poll_interval_ms);
                let opts = worker::WorkerOptions {
                    queue,
                    poll_interval: Duration::from_millis(poll_ms),
                    count: config.worker.count,
                };
                worker::run(config, opts).await?;
            }
        }
    }

    Ok(())
}
