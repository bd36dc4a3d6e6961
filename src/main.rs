use access_group_sync::config::SyncConfig;
use access_group_sync::services::{CloudflareClient, RoleDatabase};
use access_group_sync::sync::{IntervalTicks, Reconciler, Scheduler};
use access_group_sync::utils::cache::GroupCache;
use access_group_sync::utils::clock::SystemClock;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Sync control panel roles to Cloudflare Zero Trust access groups
#[derive(Debug, Parser)]
#[command(name = "access-group-sync", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Initialize logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    let cli = Cli::parse();

    let config = match SyncConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let directory = match CloudflareClient::from_config(&config.cloudflare) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let authority = RoleDatabase::connect_lazy(&config.database);

    let staleness_threshold = match config.sync.staleness_threshold() {
        Ok(threshold) => threshold,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let reconciler = Reconciler::new(authority, directory, GroupCache::new(), SystemClock)
        .with_staleness_threshold(staleness_threshold)
        .with_halt_on_error(config.sync.halt_on_error);

    let ticks = IntervalTicks::new(Duration::from_secs(config.sync.check_interval_secs));
    let mut scheduler = Scheduler::new(reconciler, config.groups, ticks);

    match scheduler.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Access group sync stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
