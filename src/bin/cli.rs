//! Sitemapper CLI
//!
//! Runs the scheduler locally. Sites given on the command line or in a seed
//! file are announced on the bus, and every bus event is printed to stdout as
//! one JSON line.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use sitemapper::{
    engine::HttpEngineFactory,
    error::{AppError, Result},
    events::{Bus, Channel, Envelope, Route, Subscribe, Topic},
    models::{Config, Site},
    services::Scheduler,
    utils::url::site_id_for,
};
use tokio_util::sync::CancellationToken;

/// sitemapper - Scheduled Site Crawler
#[derive(Parser, Debug)]
#[command(
    name = "sitemapper",
    version,
    about = "Queue sites and crawl them with a bounded number of workers"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "sitemapper.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and print bus events as JSON lines
    Run {
        /// Host or URL to crawl (repeatable)
        #[arg(long = "site")]
        sites: Vec<String>,

        /// JSON file holding an array of site records
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Exit once nothing is queued or crawling
        #[arg(long)]
        until_idle: bool,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Writes each envelope to stdout as a JSON line.
struct JsonLines;

#[async_trait]
impl Subscribe for JsonLines {
    async fn on_event(&self, envelope: &Envelope) -> Result<()> {
        let line = serde_json::to_string(envelope)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

/// Collect sites from `--site` flags and the seed file.
fn collect_sites(hosts: &[String], seed: Option<&PathBuf>) -> Result<Vec<Site>> {
    let mut sites: Vec<Site> = match seed {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        }
        None => Vec::new(),
    };

    for site in &mut sites {
        if site.id.trim().is_empty() {
            site.id = site_id_for(&site.host);
        }
    }
    sites.extend(hosts.iter().map(|host| Site::new(site_id_for(host), host.as_str())));

    Ok(sites)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Validate => {
            log::info!("Validating configuration...");
            let config = Config::load(&cli.config)?;
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Config OK");
        }

        Command::Run {
            sites,
            seed,
            until_idle,
        } => {
            let config = Config::load_or_default(&cli.config);
            log::info!("Loaded configuration from {}", cli.config.display());
            config.validate()?;
            let sites = collect_sites(&sites, seed.as_ref())?;
            if sites.is_empty() && until_idle {
                return Err(AppError::config("Nothing to crawl: pass --site or --seed"));
            }

            let bus = Bus::new();
            let printer = bus.subscribe_routes(Route::all(), Arc::new(JsonLines));

            let scheduler = Scheduler::new(&config, bus.clone(), Arc::new(HttpEngineFactory));
            let token = CancellationToken::new();
            let (handle, task) = scheduler.spawn(token.clone());

            log::info!("Announcing {} site(s)", sites.len());
            for site in sites {
                bus.publish(Channel::Sites, Topic::Added, site);
            }

            let poll = config.scheduler.tick_interval();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("Interrupted, shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll), if until_idle => {
                        if handle.snapshot().await?.is_idle() {
                            log::info!("All sites crawled");
                            break;
                        }
                    }
                }
            }

            token.cancel();
            if let Err(e) = task.await {
                log::error!("Scheduler task failed: {}", e);
            }
            printer.unsubscribe().await;
        }
    }

    Ok(())
}
