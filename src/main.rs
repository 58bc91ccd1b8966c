use std::sync::Arc;

use clap::Parser;
use radguard::backend::Backend;
use radguard::cli::{Cli, Commands};
use radguard::codec::WireCodec;
use radguard::config::ServerConfig;
use radguard::dialog_store::{DialogLogger, RedisDialogStore};
use radguard::error::RadGuardError;
use radguard::logging::init_tracing;
use radguard::matching::MatchEngine;
use radguard::pools::PoolRuntimes;
use radguard::servers::{self, ListenerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), RadGuardError> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::ConfigCheck { .. } => {
            radguard::cli::config_check(cli.config().as_ref())?;
            return Ok(());
        }
        Commands::ShowConfig { .. } => {
            radguard::cli::show_config(cli.config().as_ref());
            return Ok(());
        }
        Commands::Server { .. } => {}
    }

    let config = ServerConfig::try_from_path(cli.config().as_ref())?;

    let log_level = if cli.debug() { "debug" } else { &config.log_level };
    if let Err(err) = init_tracing(log_level) {
        eprintln!("failed to initialise logging: {err}");
    }

    info!(%config, "starting radguard");

    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<(), RadGuardError> {
    let match_engine = MatchEngine::build(
        &config.pool_match_rules,
        &config.reply_match_rules.auth,
        &config.reply_match_rules.acct,
    )?;
    let pools = PoolRuntimes::build(&config.address_pools)?;

    let dialog_logger = match &config.redis_storage {
        Some(redis_config) => {
            let store = RedisDialogStore::connect(&redis_config.url).await?;
            Some(DialogLogger::new(store, redis_config))
        }
        None => None,
    };

    let auth_address = config.auth_listener_address();
    let acct_address = config.acct_listener_address();
    let max_concurrent = config.max_concurrent;
    let shared_secret = config.shared_secret.clone();

    let backend = Arc::new(Backend::new(config, match_engine, pools, dialog_logger));
    let decoder = Arc::new(WireCodec::new(shared_secret.clone().into_bytes()));
    let encoder = Arc::new(WireCodec::new(shared_secret.into_bytes()));

    let (auth_handle, auth_cancel) = servers::spawn(
        backend.clone(),
        decoder.clone(),
        encoder.clone(),
        ListenerConfig {
            address: auth_address,
            max_concurrent,
        },
    )
    .await?;

    let (acct_handle, acct_cancel) = servers::spawn(
        backend,
        decoder,
        encoder,
        ListenerConfig {
            address: acct_address,
            max_concurrent,
        },
    )
    .await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to listen for ctrl-c");
            }
            info!("received shutdown signal, stopping listeners");
        }
    }

    auth_cancel.cancel();
    acct_cancel.cancel();

    if let Err(err) = auth_handle.await {
        error!(error = %err, "auth listener task panicked");
    }
    if let Err(err) = acct_handle.await {
        error!(error = %err, "acct listener task panicked");
    }

    info!("shutdown complete");
    Ok(())
}
