use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use linkspeed::config::{AppConfig, LogFormat, LoggingConfig};
use linkspeed::report::format_human;
use linkspeed::{RunContext, RunOptions};

#[derive(Parser)]
#[command(
    name = "linkspeed",
    about = "Measure download and upload bandwidth against the best nearby speedtest server",
    version,
    long_about = None
)]
struct Cli {
    /// Test against this server URL instead of selecting one
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Upload a single payload of this many bytes
    #[arg(long, value_name = "BYTES")]
    upsize: Option<u64>,

    /// Number of download passes per worker
    #[arg(long, value_name = "N")]
    downtimes: Option<u32>,

    /// Pick a random server among the N closest instead of probing latency
    #[arg(long, value_name = "N")]
    randomize: Option<usize>,

    /// Configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// JSON output for machine parsing
    #[arg(long)]
    json: bool,

    /// Abandon a transfer worker after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            server: self.server.clone(),
            randomize: self.randomize,
            upsize: self.upsize,
            downtimes: self.downtimes,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Load the config under a temporary stderr subscriber, so fallback
/// warnings are visible before the configured one is installed.
fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || AppConfig::load_or_default(path))
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let opts = cli.run_options();
    tracing::info!(
        server = ?opts.server,
        randomize = ?opts.randomize,
        upsize = ?opts.upsize,
        downtimes = ?opts.downtimes,
        "starting speed test"
    );

    let ctx = RunContext::from_config(config)?;
    let report = linkspeed::run(&ctx, &opts).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_human(&report));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
