use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use feedroll::config::{CliOverrides, Config};
use feedroll::feed::FeedClient;
use feedroll::pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "feedroll",
    about = "Fetch RSS subscriptions into a rolling archive and health report"
)]
struct Args {
    /// TOML config file (defaults apply when absent)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: CliOverrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; RUST_LOG controls verbosity
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from '{}'", path.display()))?,
        None => Config::default(),
    };
    config.apply_cli(&args.overrides);

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory '{}'",
            config.output_dir.display()
        )
    })?;

    let client = FeedClient::new(&config).context("Failed to build HTTP client")?;
    let output = pipeline::run(&config, &client, Utc::now()).await;

    output
        .write(&config.output_dir)
        .context("Failed to write output files")?;

    let ok_sites = output.sites.iter().filter(|s| s.ok).count();
    tracing::info!(
        output_dir = %config.output_dir.display(),
        archive_total = output.report.archive_total,
        in_window = output.report.items.len(),
        ok_sites = ok_sites,
        total_sites = output.sites.len(),
        "Wrote output files"
    );
    println!(
        "{}: {} archived, {} in window, {}/{} sites ok",
        config.output_dir.display(),
        output.report.archive_total,
        output.report.items.len(),
        ok_sites,
        output.sites.len()
    );
    Ok(())
}
