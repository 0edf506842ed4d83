//! osv-batch-scan - look up known vulnerabilities for a JSON package list.
//!
//! Input is a JSON array of `{"name", "version", "ecosystem"}` objects read
//! from `--input` or stdin. Records are written to stdout as JSON; logs go
//! to stderr.

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use osv_batch_scanner::{
    OsvBatchExecutor, OsvConfig, PackageRef, RetryingDatabase, ScanPipeline, ScanSummary,
    VulnerabilityDatabase,
};

#[derive(Parser, Debug)]
#[command(name = "osv-batch-scan", version, about)]
struct Cli {
    /// JSON file with the package list (default: stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Packages per request (default: OSV_MAX_BATCH_SIZE or 1000)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Batches in flight at once
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Retry failed batches with exponential backoff
    #[arg(long)]
    retry: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    let config = OsvConfig::from_env()?;
    let packages = read_packages(cli.input.as_deref())?;

    let executor = OsvBatchExecutor::new(&config)?;
    tracing::info!(url = executor.batch_url(), "OSV batch endpoint");

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(token.clone()));

    if cli.retry {
        let database = RetryingDatabase::new(executor, config.retry.clone())
            .with_cancellation(token.clone());
        run(database, &config, &cli, token, &packages).await
    } else {
        run(executor, &config, &cli, token, &packages).await
    }
}

async fn run<D>(
    database: D,
    config: &OsvConfig,
    cli: &Cli,
    token: CancellationToken,
    packages: &[PackageRef],
) -> Result<(), Box<dyn std::error::Error>>
where
    D: VulnerabilityDatabase + 'static,
{
    let pipeline = ScanPipeline::from_config(database, config)
        .with_batch_size(cli.batch_size.unwrap_or(config.max_batch_size))
        .with_concurrency(cli.concurrency)
        .with_cancellation(token);

    let records = pipeline.scan(packages).await?;
    let summary = ScanSummary::from_records(&records);

    let output = if cli.pretty {
        serde_json::to_string_pretty(&records)?
    } else {
        serde_json::to_string(&records)?
    };
    println!("{}", output);

    tracing::info!(
        total = summary.total_packages,
        vulnerable = summary.vulnerable_packages,
        vulnerabilities = summary.total_vulnerabilities,
        "Scan finished"
    );
    Ok(())
}

fn read_packages(
    input: Option<&std::path::Path>,
) -> Result<Vec<PackageRef>, Box<dyn std::error::Error>> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(raw.trim_start_matches('\u{feff}'))?)
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    if signal::ctrl_c().await.is_ok() {
        tracing::warn!("Interrupted; cancelling scan after the current batch");
        token.cancel();
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
