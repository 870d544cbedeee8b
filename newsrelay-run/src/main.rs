//! newsrelay-run - one pass of the relay pipeline, meant to be run from cron

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use libnewsrelay::logging::{LogFormat, LoggingConfig};
use libnewsrelay::platforms::x::XClient;
use libnewsrelay::{Config, Credentials, RelayError, RunController, StateStore};

#[derive(Parser, Debug)]
#[command(name = "newsrelay-run")]
#[command(version, about = "Fetch, filter and republish matching posts once")]
#[command(long_about = r#"Fetch recent posts from every configured source, keep the ones that
mention a configured keyword, and republish them with source attribution.

Credentials are read from the environment:
    X_BEARER_TOKEN                      read API
    X_API_KEY, X_API_SECRET,
    X_ACCESS_TOKEN, X_ACCESS_SECRET     write API (OAuth 1.0a)

EXAMPLES:
    # One run with the default config location
    newsrelay-run

    # Explicit config, JSON summary for scripting
    newsrelay-run --config ./relay.toml --format json | jq '.posted'

    # Fail the cron job when every source errored
    newsrelay-run --strict

EXIT CODES:
    0 - Run completed (per-source errors are counted, not fatal)
    1 - Every source errored (with --strict), or an unexpected failure
    2 - Configuration error (bad config file, missing credentials)
"#)]
struct Cli {
    /// Path to the config file (default: $NEWSRELAY_CONFIG or ~/.config/newsrelay/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the published ledger and cursor file
    #[arg(long, value_name = "DIR")]
    state_dir: Option<String>,

    /// Directory for status.json and index.html
    #[arg(long, value_name = "DIR")]
    status_dir: Option<String>,

    /// Do not write the status dashboard
    #[arg(long)]
    no_status: bool,

    /// Summary output format
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Log format (text, json, pretty); overrides NEWSRELAY_LOG_FORMAT
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Exit 1 when every source errored
    #[arg(long)]
    strict: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.verbose = cli.verbose;
    logging.init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<RelayError>()
                .map(RelayError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.state_dir {
        config.state.dir = dir;
    }
    if let Some(dir) = cli.status_dir {
        config.status.dir = dir;
    }
    if cli.no_status {
        config.status.enabled = false;
    }

    let credentials = Credentials::from_env()?;
    let client = XClient::new(&config.api, credentials)?;

    let mut store = StateStore::load(&config.state);
    let controller = RunController::new(&config, &client, &client, &client);
    let summary = controller.run(&mut store).await;

    match cli.format.as_str() {
        "json" => {
            let json =
                serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
            println!("{}", json);
        }
        _ => print!("{}", summary.render_text()),
    }

    if cli.strict && summary.is_total_failure() {
        tracing::error!("Every source failed this run");
        return Ok(1);
    }
    Ok(0)
}
