use anyhow::{bail, Context};
use clap::Parser;
use mr::config::{load_json, WorkerConfig};
use mr::logging::init_logging;
use mr::worker_node::spawn_workers;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Serve map and reduce requests on one or more addresses
#[derive(Parser, Debug)]
#[command(name = "worker")]
struct Args {
    /// Addresses to bind (bare port or host:port); one server each
    #[arg(required = true)]
    addresses: Vec<String>,

    /// JSON config file; flags override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// How long a server waits for a connection before re-checking its stop flag
    #[arg(long)]
    recv_timeout_ms: Option<u64>,

    /// Ceiling on a single request or reply, in bytes
    #[arg(long)]
    max_message_len: Option<usize>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> anyhow::Result<WorkerConfig> {
        let mut config: WorkerConfig = match &self.config {
            Some(path) => load_json(path)?,
            None => WorkerConfig::default(),
        };
        config.addresses = self.addresses;
        if let Some(ms) = self.recv_timeout_ms {
            config.recv_timeout_ms = ms;
        }
        if let Some(len) = self.max_message_len {
            config.limits.max_message_len = len;
        }
        config.validate().context("invalid worker configuration")?;
        Ok(config)
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config()?;

    let workers = spawn_workers(&config).await?;
    if workers.is_empty() {
        bail!("no address could be bound");
    }

    for worker in workers {
        let addr = worker.addr;
        let served = worker
            .handle
            .await
            .with_context(|| format!("server on {} panicked", addr))?;
        info!(%addr, served, "server exited");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
