//! guildkeeper daemon: reconciles every tracked guild once per tick until
//! interrupted.
//!
//! Logs go to stderr, and additionally to a daily-rotated file when
//! `logging.file_dir` is set.

use clap::Parser;
use guildkeeper::config::BotConfig;
use guildkeeper::events::EventReconciler;
use guildkeeper::members::MemberReconciler;
use guildkeeper::moderation::AllowAll;
use guildkeeper::notify::PlainPresenter;
use guildkeeper::remote::discord::DiscordRestClient;
use guildkeeper::scheduler::TickScheduler;
use guildkeeper::store::GuildDataStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Periodic upkeep for Discord guilds.
#[derive(Parser)]
#[command(name = "guildkeeper", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "GUILDKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(BotConfig::default_config_path);
    let config = if config_path.exists() {
        BotConfig::from_file(&config_path)?
    } else {
        BotConfig::default()
    };

    if cli.write_config {
        config.save_to_file(&config_path)?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config);
    tracing::info!(config = %config_path.display(), "guildkeeper starting");

    let api = Arc::new(DiscordRestClient::from_config(&config.discord)?);
    let store = Arc::new(GuildDataStore::open(&config.storage.data_dir)?);
    let presenter = Arc::new(PlainPresenter);

    let scheduler = TickScheduler::new(
        store,
        EventReconciler::new(api.clone(), presenter.clone()),
        MemberReconciler::new(api, presenter, Arc::new(AllowAll), config.nicknames.pool()),
        config.tick_interval(),
    );

    let cancel = CancellationToken::new();
    let handle = scheduler.spawn(cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    cancel.cancel();

    handle.await.map_err(|e| {
        tracing::error!(error = %e, "scheduler task failed");
        anyhow::anyhow!("scheduler task failed: {e}")
    })?;

    tracing::info!("guildkeeper shut down cleanly");
    Ok(())
}

fn init_tracing(config: &BotConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter))
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let Some(dir) = &config.logging.file_dir else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(dir, "guildkeeper.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Some(guard)
}
