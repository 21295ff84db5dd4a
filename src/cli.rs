use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "ingestbox")]
#[command(about = "Ingestbox CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the service: front-end API plus in-process worker loops
    Api(ApiArgs),

    /// Drain one job queue directly. The job store is embedded, so this
    /// runs against a stopped API service (maintenance, backfills).
    Worker(WorkerArgs),
}

#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    /// Address to bind the API server to
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub address: SocketAddr,
}

#[derive(clap::Args, Debug)]
pub struct WorkerArgs {
    /// Queue to serve: ingest | checksum_update | prune
    /// (defaults to the configured worker.queue)
    #[arg(long)]
    pub queue: Option<String>,

    /// Process a single job and exit
    #[arg(long)]
    pub once: bool,

    /// Polling interval in milliseconds when the queue is empty
    #[arg(long)]
    pub poll_ms: Option<u64>,
}
