// Copyright (C) 2024-2026 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use clap::{Parser, Subcommand};
use coindrpc::CoinRpcClient;
use payouts_lib::background_tasks::{start_confirmation_tracker, start_network_stats};
use payouts_lib::config::{Config, PoolConfig};
use payouts_lib::daemon::CoinDaemon;
use payouts_lib::logging::setup_logging;
use payouts_lib::payments::PaymentProcessor;
use payouts_lib::payments::recovery::replay;
use payouts_lib::scheduler::{CycleScheduler, SchedulerState};
use payouts_lib::shielding::{ShieldingManager, ShieldingSettings, start_shielding};
use payouts_lib::store::{BatchOutcome, LedgerRegistry};
use payouts_lib::utils::time_provider::{SystemTimeProvider, TimeProvider};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::signal::{ShutdownReason, watch_stop_signals};

mod signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env("PAYOUTS_CONFIG"))]
    config: String,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Log to this file in addition to the console
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-apply a ledger batch written after a failed commit
    Replay {
        /// Coin name of the pool the batch belongs to
        #[arg(long)]
        pool: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = args.log_level {
        config = config.with_log_level(level);
    }
    if args.log_file.is_some() {
        config = config.with_log_file(args.log_file);
    }
    // hold guard to ensure file logs are flushed on exit
    let _guard = match setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Some(Command::Replay { pool, file }) => replay_batch(&config, &pool, file).await,
        None => run_pools(config).await,
    }
}

async fn replay_batch(config: &Config, coin: &str, file: PathBuf) -> ExitCode {
    let Some(pool) = config.pool(coin) else {
        error!("No pool configured for {coin}");
        return ExitCode::FAILURE;
    };
    let ledger = match LedgerRegistry::default().open(&pool.ledger).await {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("{coin}: failed to open ledger: {e}");
            return ExitCode::FAILURE;
        }
    };
    match replay(ledger.as_ref(), &file).await {
        Ok(BatchOutcome::Applied) => {
            info!("{coin}: applied {}", file.display());
            ExitCode::SUCCESS
        }
        Ok(BatchOutcome::AlreadyApplied) => {
            warn!("{coin}: {} was already applied, nothing changed", file.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{coin}: failed to replay {}: {e}", file.display());
            ExitCode::FAILURE
        }
    }
}

/// Start the scheduler and background tasks of one pool.
async fn start_pool(
    pool: &PoolConfig,
    registry: &mut LedgerRegistry,
    clock: Arc<dyn TimeProvider>,
    exit_sender: &watch::Sender<ShutdownReason>,
) -> Result<Vec<JoinHandle<()>>, String> {
    let coin = pool.coin.name.clone();
    let processing = &pool.payment_processing;

    let client = CoinRpcClient::from_config(&pool.daemon)
        .map_err(|e| format!("{coin}: failed to create daemon client: {e}"))?;
    let daemon: Arc<dyn CoinDaemon> = Arc::new(client);
    let ledger = registry
        .open(&pool.ledger)
        .await
        .map_err(|e| format!("{coin}: failed to open ledger: {e}"))?;
    let processor = PaymentProcessor::setup(pool, daemon.clone(), ledger.clone(), clock)
        .await
        .map_err(|e| format!("{coin}: {e}"))?;
    if processing.solo_mining {
        info!("{coin}: solo rounds are settled alongside pool rounds");
    }

    let keys = processor.keys().clone();
    let units = processor.settings().units;
    let mut handles = Vec::new();

    let scheduler = CycleScheduler::new(
        Arc::new(processor),
        processing.effective_payment_interval(),
    );
    let shutdown = exit_sender.subscribe();
    let scheduler_coin = coin.clone();
    handles.push(tokio::spawn(async move {
        if scheduler.run(shutdown).await == SchedulerState::Halted {
            error!("{scheduler_coin}: payments stay halted until the node is restarted");
        }
    }));

    handles.push(start_confirmation_tracker(
        daemon.clone(),
        ledger.clone(),
        keys.clone(),
        Duration::from_secs(processing.confirmations_interval.max(1)),
        exit_sender.subscribe(),
    ));
    handles.push(start_network_stats(
        daemon.clone(),
        ledger,
        keys,
        Duration::from_secs(processing.stats_interval.max(1)),
        pool.coin.get_info,
        exit_sender.subscribe(),
    ));

    if pool.coin.require_shielding {
        let settings = ShieldingSettings::from_config(pool, units).map_err(|e| e.to_string())?;
        handles.push(start_shielding(
            ShieldingManager::new(settings, daemon),
            exit_sender.subscribe(),
        ));
    }
    Ok(handles)
}

async fn run_pools(config: Config) -> ExitCode {
    info!("Starting payment processing...");
    let exit_sender = watch::Sender::new(ShutdownReason::None);
    let sig_handle = watch_stop_signals(exit_sender.clone());

    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let mut registry = LedgerRegistry::default();
    let mut handles = Vec::new();
    for pool in config
        .pools
        .iter()
        .filter(|pool| pool.payment_processing.enabled)
    {
        match start_pool(pool, &mut registry, clock.clone(), &exit_sender).await {
            Ok(pool_handles) => {
                info!("{}: payment processing started", pool.coin.name);
                handles.extend(pool_handles);
            }
            Err(e) => {
                error!("Failed to start pool: {e}");
                exit_sender.send_replace(ShutdownReason::Error);
                break;
            }
        }
    }
    if handles.is_empty() && *exit_sender.borrow() == ShutdownReason::None {
        warn!("No pools have payment processing enabled");
        exit_sender.send_replace(ShutdownReason::Error);
    }

    let mut exit_receiver = exit_sender.subscribe();
    let mut reason = *exit_receiver.borrow_and_update();
    if reason == ShutdownReason::None {
        let _ = exit_receiver.changed().await;
        reason = *exit_receiver.borrow();
    }

    info!("Shutting down, waiting for running cycles to finish...");
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Task failed during shutdown: {e}");
        }
    }
    trace!("Waiting signal handlers");
    if let Err(e) = sig_handle.await {
        error!("Signal handler failed: {e}");
    }

    reason.exit_code()
}
