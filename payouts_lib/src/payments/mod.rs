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

//! One payment cycle for one coin: collect pending rounds, classify them
//! against the chain, credit rewards, send one transfer and commit the
//! result to the ledger in a single atomic batch.
//!
//! Each stage lives in its own module as an `impl PaymentProcessor` block.
//! A stage either hands its result to the next one or stops the cycle with
//! a [`PaymentError`]. Nothing touches the ledger between the transfer and
//! the commit.

mod calculator;
mod classifier;
mod collector;
mod committer;
mod disburser;
pub mod error;
pub(crate) mod funds;
pub mod recovery;
mod setup;

#[cfg(test)]
mod tests;

pub use disburser::{PayoutPlan, plan_payouts};
pub use error::PaymentError;

use crate::config::PoolConfig;
use crate::daemon::CoinDaemon;
use crate::store::{BatchOutcome, LedgerKeys, LedgerStore};
use crate::utils::time_provider::TimeProvider;
use payouts_accounting::{CoinUnits, PaymentMode, Round, RoundCategory, WorkerLedger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shielding fee for one transfer, in satoshis.
pub const SHIELDING_FEE_SATOSHIS: i64 = 1000;

/// Settings of one pool, resolved once at setup time.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSettings {
    pub coin: String,
    pub pool_address: String,
    pub require_shielding: bool,
    pub min_conf: u32,
    pub max_blocks_per_payment: usize,
    pub payment_mode: PaymentMode,
    pub pplnt_qualify_fraction: f64,
    pub solo_fee_percent: f64,
    /// Smallest aggregate per address that is paid out, in satoshis
    pub minimum_payment: i64,
    /// Transaction fee reserve taken off pplnt immature estimates, in satoshis
    pub fee_reserve: i64,
    pub recovery_dir: PathBuf,
    pub units: CoinUnits,
}

impl PaymentSettings {
    pub fn from_config(pool: &PoolConfig, units: CoinUnits) -> Self {
        let processing = &pool.payment_processing;
        Self {
            coin: pool.coin.name.clone(),
            pool_address: pool.address.clone(),
            require_shielding: pool.coin.require_shielding,
            min_conf: processing.effective_min_conf(),
            max_blocks_per_payment: processing.effective_max_blocks_per_payment(),
            payment_mode: processing.payment_mode,
            pplnt_qualify_fraction: processing.pplnt,
            solo_fee_percent: processing.solo_fee,
            minimum_payment: units.truncate_to_satoshis(processing.minimum_payment),
            fee_reserve: units.truncate_to_satoshis(pool.coin.txfee),
            recovery_dir: PathBuf::from(&processing.recovery_dir),
            units,
        }
    }
}

/// Time spent waiting on each collaborator during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleTimings {
    pub ledger: Duration,
    pub daemon: Duration,
}

/// Working state handed from stage to stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedRounds {
    pub workers: WorkerLedger,
    pub solo_workers: WorkerLedger,
    /// Height ordered, at most one round per height
    pub rounds: Vec<Round>,
}

impl CollectedRounds {
    fn is_idle(&self) -> bool {
        self.rounds.is_empty() && self.workers.is_empty() && self.solo_workers.is_empty()
    }

    pub(crate) fn generate_rounds(&self) -> impl Iterator<Item = &Round> {
        self.rounds
            .iter()
            .filter(|round| round.category == RoundCategory::Generate)
    }
}

/// What a completed cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub rounds: usize,
    pub paid_rounds: usize,
    /// Satoshis sent in the transfer
    pub total_sent: i64,
    pub txid: Option<String>,
    pub withheld_permille: u32,
    pub commit: Option<BatchOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// Nothing was paid and the ledger is unchanged, try again next cycle
    Aborted(PaymentError),
    /// Funds may have moved without a ledger record, stop for this coin
    Halted(PaymentError),
}

/// Settles rounds for one coin against one daemon and one ledger.
pub struct PaymentProcessor {
    settings: PaymentSettings,
    keys: LedgerKeys,
    daemon: Arc<dyn CoinDaemon>,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn TimeProvider>,
}

impl PaymentProcessor {
    pub fn new(
        settings: PaymentSettings,
        daemon: Arc<dyn CoinDaemon>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let keys = LedgerKeys::new(&settings.coin);
        Self {
            settings,
            keys,
            daemon,
            ledger,
            clock,
        }
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    pub fn keys(&self) -> &LedgerKeys {
        &self.keys
    }

    /// Run one full cycle. Never panics and never leaves a half applied ledger.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();
        let mut timings = CycleTimings::default();
        let outcome = match self.process_payments(&mut timings).await {
            Ok(summary) => CycleOutcome::Completed(summary),
            Err(e) if e.is_fatal() => {
                error!(
                    "{}: {}. Payment processing disabled to prevent double payouts, manual audit required",
                    self.settings.coin, e
                );
                CycleOutcome::Halted(e)
            }
            Err(e) => {
                warn!("{}: payment cycle aborted: {}", self.settings.coin, e);
                CycleOutcome::Aborted(e)
            }
        };
        debug!(
            "{}: finished interval, {}ms total, {}ms ledger, {}ms daemon",
            self.settings.coin,
            started.elapsed().as_millis(),
            timings.ledger.as_millis(),
            timings.daemon.as_millis()
        );
        outcome
    }

    async fn process_payments(
        &self,
        timings: &mut CycleTimings,
    ) -> Result<CycleSummary, PaymentError> {
        let mut collected = self.collect_rounds(timings).await?;
        if collected.is_idle() {
            debug!("{}: nothing pending", self.settings.coin);
            return Ok(CycleSummary::default());
        }

        self.classify_rounds(&mut collected.rounds, timings).await?;
        self.check_wallet_funds(&mut collected, timings).await?;
        self.calculate_rewards(&mut collected, timings).await?;
        let disbursement = self.disburse(&mut collected, timings).await?;
        let commit = self.commit(&collected, &disbursement, timings).await?;

        let summary = CycleSummary {
            rounds: collected.rounds.len(),
            paid_rounds: collected.generate_rounds().count(),
            total_sent: disbursement.total_sent,
            txid: disbursement.txid,
            withheld_permille: disbursement.withheld_permille,
            commit,
        };
        info!(
            "{}: cycle complete, {} rounds, {} paid, {} sent",
            self.settings.coin,
            summary.rounds,
            summary.paid_rounds,
            self.settings.units.to_coins(summary.total_sent)
        );
        Ok(summary)
    }
}
