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

//! Moves coinbase rewards between the pool's transparent and shielded
//! addresses on coins that require shielding before coins can be spent.
//!
//! Each wallet interval sends in one direction, alternating between
//! shielding (t to z) and unshielding (z to t). The daemon runs these as
//! asynchronous operations which are polled until they finish.

use crate::config::{ConfigurationError, PoolConfig};
use crate::daemon::CoinDaemon;
use crate::payments::SHIELDING_FEE_SATOSHIS;
use crate::payments::funds::spendable_balance;
use coindrpc::{CoinRpcError, OperationStatus, parse_amount};
use payouts_accounting::CoinUnits;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

/// How often in-flight operations are checked.
pub const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(57);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShieldDirection {
    /// Transparent pool address to the shielded address
    Shield,
    /// Shielded address back to the transparent payout address
    Unshield,
}

impl ShieldDirection {
    fn other(self) -> Self {
        match self {
            ShieldDirection::Shield => ShieldDirection::Unshield,
            ShieldDirection::Unshield => ShieldDirection::Shield,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShieldingOperation {
    pub id: String,
    pub direction: ShieldDirection,
    /// Satoshis sent, fee excluded
    pub amount: i64,
}

/// Operations the daemon is still executing, at most one per direction.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ShieldingState {
    operations: Vec<ShieldingOperation>,
}

impl ShieldingState {
    pub fn in_flight(&self, direction: ShieldDirection) -> bool {
        self.operations
            .iter()
            .any(|operation| operation.direction == direction)
    }

    pub fn track(&mut self, operation: ShieldingOperation) {
        self.operations.push(operation);
    }

    pub fn release(&mut self, id: &str) -> Option<ShieldingOperation> {
        let index = self
            .operations
            .iter()
            .position(|operation| operation.id == id)?;
        Some(self.operations.remove(index))
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShieldingSettings {
    pub coin: String,
    /// Receives coinbase rewards
    pub pool_address: String,
    /// Payouts are sent from here after unshielding
    pub t_address: String,
    pub z_address: String,
    pub min_conf: u32,
    /// Cap on one unshield transfer, in satoshis
    pub max_unshield: i64,
    pub wallet_interval: Duration,
    pub units: CoinUnits,
}

impl ShieldingSettings {
    pub fn from_config(pool: &PoolConfig, units: CoinUnits) -> Result<Self, ConfigurationError> {
        let coin = &pool.coin.name;
        let (Some(t_address), Some(z_address)) = (&pool.t_address, &pool.z_address) else {
            return Err(ConfigurationError(format!(
                "{coin}: shielding needs both t_address and z_address"
            )));
        };
        let processing = &pool.payment_processing;
        Ok(Self {
            coin: coin.clone(),
            pool_address: pool.address.clone(),
            t_address: t_address.clone(),
            z_address: z_address.clone(),
            min_conf: processing.effective_min_conf(),
            max_unshield: units.truncate_to_satoshis(processing.max_unshield_amount),
            wallet_interval: Duration::from_secs(processing.wallet_interval.max(1) * 60),
            units,
        })
    }
}

pub struct ShieldingManager {
    settings: ShieldingSettings,
    daemon: Arc<dyn CoinDaemon>,
    state: ShieldingState,
    next: ShieldDirection,
}

impl ShieldingManager {
    pub fn new(settings: ShieldingSettings, daemon: Arc<dyn CoinDaemon>) -> Self {
        Self {
            settings,
            daemon,
            state: ShieldingState::default(),
            next: ShieldDirection::Shield,
        }
    }

    pub fn state(&self) -> &ShieldingState {
        &self.state
    }

    /// Run the next direction in turn. Returns the operation id if a
    /// transfer was started.
    pub async fn tick(&mut self) -> Result<Option<String>, CoinRpcError> {
        let direction = self.next;
        self.next = direction.other();
        match direction {
            ShieldDirection::Shield => self.shield().await,
            ShieldDirection::Unshield => self.unshield().await,
        }
    }

    async fn shield(&mut self) -> Result<Option<String>, CoinRpcError> {
        if self.state.in_flight(ShieldDirection::Shield) {
            warn!(
                "{}: shielding is waiting, an operation is already in progress",
                self.settings.coin
            );
            return Ok(None);
        }
        let outputs = self
            .daemon
            .list_unspent(self.settings.min_conf, vec![self.settings.pool_address.clone()])
            .await?;
        let balance = spendable_balance(&outputs, None, &self.settings.units);
        let from = self.settings.pool_address.clone();
        let to = self.settings.z_address.clone();
        self.send(ShieldDirection::Shield, &from, &to, balance - SHIELDING_FEE_SATOSHIS)
            .await
    }

    async fn unshield(&mut self) -> Result<Option<String>, CoinRpcError> {
        if self.state.in_flight(ShieldDirection::Unshield) {
            warn!(
                "{}: unshielding is waiting, an operation is already in progress",
                self.settings.coin
            );
            return Ok(None);
        }
        let raw = self
            .daemon
            .z_get_balance(&self.settings.z_address, self.settings.min_conf)
            .await?;
        let balance = parse_amount(&raw)
            .and_then(|coins| self.settings.units.to_satoshis(coins))
            .unwrap_or_default();
        let amount = (balance - SHIELDING_FEE_SATOSHIS).min(self.settings.max_unshield);
        let from = self.settings.z_address.clone();
        let to = self.settings.t_address.clone();
        self.send(ShieldDirection::Unshield, &from, &to, amount).await
    }

    async fn send(
        &mut self,
        direction: ShieldDirection,
        from: &str,
        to: &str,
        amount: i64,
    ) -> Result<Option<String>, CoinRpcError> {
        if amount <= 0 {
            debug!("{}: nothing to move for {:?}", self.settings.coin, direction);
            return Ok(None);
        }
        let units = &self.settings.units;
        let id = self
            .daemon
            .z_send_many(
                from,
                to,
                units.to_coins(amount),
                self.settings.min_conf,
                units.to_coins(SHIELDING_FEE_SATOSHIS),
            )
            .await?;
        info!(
            "{}: {:?} {} started as {}",
            self.settings.coin,
            direction,
            units.to_coins(amount),
            id
        );
        self.state.track(ShieldingOperation {
            id: id.clone(),
            direction,
            amount,
        });
        Ok(Some(id))
    }

    /// Release finished operations and log their results. Returns how many
    /// were released.
    pub async fn poll_operations(&mut self) -> usize {
        let statuses = match self.daemon.z_get_operation_status().await {
            Ok(statuses) if !statuses.is_empty() => statuses,
            Ok(_) => {
                self.forget_tracked("no operation statuses returned");
                return 0;
            }
            Err(e) => {
                error!("{}: error with z_getoperationstatus: {}", self.settings.coin, e);
                self.forget_tracked("operation status unavailable");
                return 0;
            }
        };

        let finished: Vec<String> = statuses
            .iter()
            .filter(|status| status.is_finished())
            .filter_map(|status| self.state.release(&status.id))
            .map(|operation| operation.id)
            .collect();
        if finished.is_empty() {
            return 0;
        }

        match self.daemon.z_get_operation_result(finished.clone()).await {
            Ok(results) => results.iter().for_each(|result| self.log_result(result)),
            Err(e) => error!(
                "{}: error with z_getoperationresult: {}",
                self.settings.coin, e
            ),
        }
        finished.len()
    }

    fn forget_tracked(&mut self, reason: &str) {
        if !self.state.is_empty() {
            warn!(
                "{}: {}, forgetting {} tracked operations",
                self.settings.coin,
                reason,
                self.state.len()
            );
            self.state.clear();
        }
    }

    fn log_result(&self, result: &OperationStatus) {
        let coin = &self.settings.coin;
        match &result.error {
            Some(e) if result.status == "failed" => error!(
                "{}: shielding operation {} failed: {} {}",
                coin, result.id, e.code, e.message
            ),
            _ => info!(
                "{}: shielding operation {} {}, txid {}",
                coin,
                result.id,
                result.status,
                result
                    .result
                    .as_ref()
                    .and_then(|outcome| outcome.txid.as_deref())
                    .unwrap_or("none")
            ),
        }
        if let Some(execution_secs) = result.execution_secs {
            if execution_secs > self.settings.wallet_interval.as_secs_f64() {
                warn!(
                    "{}: wallet_interval is shorter than operation execution time of {} secs",
                    coin, execution_secs
                );
            }
        }
    }
}

/// Start the shielding task. The first transfer happens one wallet interval
/// after start.
pub fn start_shielding<T: Send + Sync + 'static>(
    mut manager: ShieldingManager,
    mut shutdown: watch::Receiver<T>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let wallet_period = manager.settings.wallet_interval;
        let mut wallet = interval_at(Instant::now() + wallet_period, wallet_period);
        let mut poll = interval_at(
            Instant::now() + OPERATION_POLL_INTERVAL,
            OPERATION_POLL_INTERVAL,
        );
        loop {
            tokio::select! {
                _ = wallet.tick() => {
                    if let Err(e) = manager.tick().await {
                        error!("{}: error moving shielded funds: {}", manager.settings.coin, e);
                    }
                }
                _ = poll.tick() => {
                    manager.poll_operations().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("{}: shielding stopped", manager.settings.coin);
    })
}
