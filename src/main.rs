use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use feedguard::cache::ExpiringCache;
use feedguard::classify::{ClassificationService, HttpClassifier, MediaKind, UserFilter};
use feedguard::config::{load_config, Config};
use feedguard::error::FilterError;
use feedguard::stats::StatsRecorder;
use feedguard::storage::{JsonFileStore, Storage};

#[derive(Parser)]
#[command(name = "feedguard")]
#[command(about = "Check feed media against user filters via the classification service.")]
#[command(version)]
struct Cli {
    /// Config file (default: <config_dir>/feedguard/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the classification service is up
    Health,
    /// Classify one media URL
    Check {
        url: String,
        /// Treat the URL as a video poster
        #[arg(long)]
        video: bool,
        /// `term` or `term:level`; stored filters are used when omitted
        #[arg(short, long = "filter")]
        filters: Vec<UserFilter>,
    },
    /// Show persisted counters
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("feedguard: {e}");
            return ExitCode::FAILURE;
        }
    };
    feedguard::init_tracing(&config.logging);

    match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("feedguard: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<ExitCode, FilterError> {
    let storage: Arc<dyn Storage> = Arc::new(JsonFileStore::new(config.storage.resolved_path()));

    match command {
        Command::Health => {
            let client = HttpClassifier::new(&config.backend.base_url)?;
            match client.health().await {
                Ok(()) => {
                    println!("online ({})", client.base_url());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("offline ({}): {e}", client.base_url());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Check {
            url,
            video,
            filters,
        } => {
            let filters = if filters.is_empty() {
                storage.load_filters().await?
            } else {
                filters
            };
            let kind = if video { MediaKind::Video } else { MediaKind::Image };

            let stats = Arc::new(
                StatsRecorder::load(Arc::clone(&storage), config.stats.save_interval()).await,
            );
            let service = ClassificationService::new(
                Arc::new(HttpClassifier::new(&config.backend.base_url)?),
                ExpiringCache::new(config.cache.capacity, config.cache.ttl()),
                Arc::clone(&stats),
            );
            let verdict = service.classify(&url, &filters, kind).await;
            stats.flush().await?;

            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(if verdict.error.is_some() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Stats => {
            let stats = storage.load_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
