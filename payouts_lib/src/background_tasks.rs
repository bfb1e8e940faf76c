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

use crate::daemon::CoinDaemon;
use crate::store::{LedgerBatch, LedgerCommand, LedgerKeys, LedgerQuery, LedgerStore, StoreError};
use coindrpc::CoinRpcError;
use payouts_accounting::Round;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundTaskError {
    Store(StoreError),
    Daemon(CoinRpcError),
}

impl Error for BackgroundTaskError {}

impl fmt::Display for BackgroundTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundTaskError::Store(e) => write!(f, "{e}"),
            BackgroundTaskError::Daemon(e) => write!(f, "{e}"),
        }
    }
}

impl From<StoreError> for BackgroundTaskError {
    fn from(error: StoreError) -> Self {
        BackgroundTaskError::Store(error)
    }
}

impl From<CoinRpcError> for BackgroundTaskError {
    fn from(error: CoinRpcError) -> Self {
        BackgroundTaskError::Daemon(error)
    }
}

/// Start a tokio task that records the confirmation count of every pending
/// block every `frequency` period.
///
/// Only `blocksPendingConfirms` is written, balances and block sets are
/// left to the payment cycle.
pub fn start_confirmation_tracker<T: Send + Sync + 'static>(
    daemon: Arc<dyn CoinDaemon>,
    ledger: Arc<dyn LedgerStore>,
    keys: LedgerKeys,
    frequency: Duration,
    mut shutdown: watch::Receiver<T>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(frequency);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            match refresh_pending_confirms(daemon.as_ref(), ledger.as_ref(), &keys).await {
                Ok(updated) => debug!(
                    "{}: updated confirmations of {} blocks",
                    keys.coin(),
                    updated
                ),
                Err(e) => error!("{}: error updating confirmations: {}", keys.coin(), e),
            }
        }
        info!("{}: confirmation tracker stopped", keys.coin());
    })
}

/// Start a tokio task that caches network statistics in the coin's stats hash.
pub fn start_network_stats<T: Send + Sync + 'static>(
    daemon: Arc<dyn CoinDaemon>,
    ledger: Arc<dyn LedgerStore>,
    keys: LedgerKeys,
    frequency: Duration,
    legacy_info: bool,
    mut shutdown: watch::Receiver<T>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(frequency);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) =
                refresh_network_stats(daemon.as_ref(), ledger.as_ref(), &keys, legacy_info).await
            {
                error!("{}: error updating network stats: {}", keys.coin(), e);
            }
        }
        info!("{}: network stats stopped", keys.coin());
    })
}

/// Block hashes of both pending sets, skipping members that do not parse.
async fn pending_block_hashes(
    ledger: &dyn LedgerStore,
    keys: &LedgerKeys,
) -> Result<HashSet<String>, BackgroundTaskError> {
    let replies = ledger
        .read_atomic(vec![
            LedgerQuery::SetMembers(keys.blocks_pending(false)),
            LedgerQuery::SetMembers(keys.blocks_pending(true)),
        ])
        .await?;
    let mut hashes = HashSet::new();
    for (reply, is_solo) in replies.into_iter().zip([false, true]) {
        for member in reply.into_set()? {
            match Round::parse(&member, is_solo) {
                Ok(round) => {
                    hashes.insert(round.block_hash);
                }
                Err(e) => debug!("{e}, not tracking confirmations"),
            }
        }
    }
    Ok(hashes)
}

/// Returns the number of blocks whose confirmations were recorded.
///
/// The pending sets are read again after the daemon answers, so a block
/// settled by a payment cycle in the meantime gets no annotation.
async fn refresh_pending_confirms(
    daemon: &dyn CoinDaemon,
    ledger: &dyn LedgerStore,
    keys: &LedgerKeys,
) -> Result<usize, BackgroundTaskError> {
    let hashes: Vec<String> = pending_block_hashes(ledger, keys).await?.into_iter().collect();
    if hashes.is_empty() {
        return Ok(0);
    }

    let blocks = daemon.get_blocks(hashes.clone()).await?;
    let still_pending = pending_block_hashes(ledger, keys).await?;
    let commands: Vec<LedgerCommand> = hashes
        .into_iter()
        .zip(blocks)
        .filter(|(hash, _)| still_pending.contains(hash))
        .filter_map(|(hash, block)| match block {
            Ok(block) => Some(LedgerCommand::HashSet {
                key: keys.blocks_pending_confirms(),
                field: hash,
                value: block.confirmations.to_string(),
            }),
            Err(e) => {
                debug!("No confirmations for {hash}: {e}");
                None
            }
        })
        .collect();
    let updated = commands.len();
    if updated > 0 {
        ledger.apply_atomic(&LedgerBatch::unguarded(commands)).await?;
    }
    Ok(updated)
}

/// Text stored for a JSON value, strings without their quotes.
fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

async fn refresh_network_stats(
    daemon: &dyn CoinDaemon,
    ledger: &dyn LedgerStore,
    keys: &LedgerKeys,
    legacy_info: bool,
) -> Result<(), BackgroundTaskError> {
    let mining = daemon.get_mining_info().await?;
    let network = daemon.get_network_info(legacy_info).await?;

    let fields = [
        ("networkBlocks", mining.blocks.map(|blocks| blocks.to_string())),
        ("networkDiff", mining.network_difficulty().as_ref().map(value_text)),
        ("networkHash", mining.networkhashps.as_ref().map(value_text)),
        ("networkConnections", network.connections.map(|n| n.to_string())),
        ("networkVersion", network.version.map(|n| n.to_string())),
        ("networkProtocolVersion", network.protocolversion.map(|n| n.to_string())),
        ("networkSubVersion", network.subversion),
    ];
    let commands: Vec<LedgerCommand> = fields
        .into_iter()
        .filter_map(|(field, value)| {
            value.map(|value| LedgerCommand::HashSet {
                key: keys.stats(false),
                field: field.to_string(),
                value,
            })
        })
        .collect();
    if !commands.is_empty() {
        ledger.apply_atomic(&LedgerBatch::unguarded(commands)).await?;
    }
    Ok(())
}
