use anyhow::Context;
use clap::Parser;
use mr::config::{load_json, DistributorConfig};
use mr::distributor_node::run_distributor;
use mr::encoding::CountEncoding;
use mr::logging::init_logging;
use mr::report::OutputFormat;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// Count word frequencies in a file using a pool of workers
#[derive(Parser, Debug)]
#[command(name = "distributor")]
struct Args {
    /// Text file to count
    input: PathBuf,

    /// Worker addresses (bare port or host:port), in dispatch order
    #[arg(required = true)]
    workers: Vec<String>,

    /// JSON config file; flags override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// How reduce replies are parsed
    #[arg(long, value_enum)]
    final_encoding: Option<CountEncoding>,

    /// Ceiling on a single request or reply, in bytes
    #[arg(long)]
    max_message_len: Option<usize>,

    /// Give up on a request after this many milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> anyhow::Result<DistributorConfig> {
        let mut config: DistributorConfig = match &self.config {
            Some(path) => load_json(path)?,
            None => DistributorConfig::default(),
        };
        config.input = self.input;
        config.workers = self.workers;
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(encoding) = self.final_encoding {
            config.final_encoding = encoding;
        }
        if let Some(len) = self.max_message_len {
            config.limits.max_message_len = len;
        }
        if self.request_timeout_ms.is_some() {
            config.request_timeout_ms = self.request_timeout_ms;
        }
        config.validate().context("invalid distributor configuration")?;
        Ok(config)
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let (report, _stats) = run_distributor(&config).await?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    report.write(config.format, &mut out)?;
    out.flush()?;
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
