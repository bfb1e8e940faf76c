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

use super::error::PaymentError;
use super::{CycleTimings, PaymentProcessor};
use coindrpc::{CoinRpcError, WalletTransaction};
use payouts_accounting::{Round, RoundCategory};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Settle one round from its generation transaction lookup.
pub(crate) fn classify_round(
    round: &mut Round,
    lookup: Result<WalletTransaction, CoinRpcError>,
    pool_address: &str,
) {
    let tx = match lookup {
        Ok(tx) => tx,
        Err(e) if e.is_not_found() => {
            warn!("Daemon reports invalid transaction: {}", round.tx_hash);
            round.kick();
            return;
        }
        Err(e) => {
            error!(
                "Odd error with gettransaction {} at height {}: {}",
                round.tx_hash, round.height, e
            );
            round.category = RoundCategory::Pending;
            return;
        }
    };
    if tx.details.is_empty() {
        warn!("Daemon reports no details for transaction: {}", round.tx_hash);
        round.kick();
        return;
    }
    round.confirmations = tx.confirmations;

    let generation = tx
        .details
        .iter()
        .find(|detail| detail.address.as_deref() == Some(pool_address))
        .or_else(|| (tx.details.len() == 1).then(|| &tx.details[0]));
    let Some(generation) = generation else {
        error!(
            "Missing output details to pool address for transaction {}",
            round.tx_hash
        );
        round.kick();
        return;
    };

    let Some(category) = RoundCategory::from_wallet_category(&generation.category) else {
        debug!(
            "Block {} has wallet category {:?}, leaving it pending",
            round.height, generation.category
        );
        round.category = RoundCategory::Pending;
        return;
    };
    round.category = category;
    if category.is_rewarded() {
        match generation.reward() {
            Some(reward) if reward > rust_decimal::Decimal::ZERO => {
                debug!("Block {} raw reward: {}", round.height, reward);
                round.reward = Some(reward);
            }
            _ => {
                error!(
                    "Invalid reward amount for block {}: {:?}",
                    round.height,
                    generation.amount.as_ref().or(generation.value.as_ref())
                );
                round.kick();
            }
        }
    }
}

/// A lost round may delete its share records only when no other live round
/// at the same height still needs them.
pub(crate) fn mark_deletable_shares(rounds: &mut [Round]) {
    let blockers: Vec<(u64, String)> = rounds
        .iter()
        .filter(|round| !round.category.is_lost())
        .map(|round| (round.height, round.serialized.clone()))
        .collect();
    for round in rounds.iter_mut().filter(|round| round.category.is_lost()) {
        round.can_delete_shares = !blockers
            .iter()
            .any(|(height, serialized)| *height == round.height && *serialized != round.serialized);
    }
}

/// Keep at most `max_blocks` generate rounds, later ones wait as immature.
pub(crate) fn cap_paying_rounds(rounds: &mut [Round], max_blocks: usize) {
    let mut paying = 0;
    for round in rounds
        .iter_mut()
        .filter(|round| round.category == RoundCategory::Generate)
    {
        paying += 1;
        if paying > max_blocks {
            round.category = RoundCategory::Immature;
        }
    }
}

impl PaymentProcessor {
    pub(crate) async fn classify_rounds(
        &self,
        rounds: &mut Vec<Round>,
        timings: &mut CycleTimings,
    ) -> Result<(), PaymentError> {
        if rounds.is_empty() {
            return Ok(());
        }
        let coin = self.keys.coin();
        debug!("{}: getting transaction details for {} blocks", coin, rounds.len());

        let txids = rounds.iter().map(|round| round.tx_hash.clone()).collect();
        let started = Instant::now();
        let lookups = self.daemon.get_transactions(txids).await.map_err(|e| {
            error!(
                "{}: daemon rpc error with batch gettransaction: {}",
                coin, e
            );
            PaymentError::TransientDaemon(e)
        })?;
        timings.daemon += started.elapsed();
        if lookups.len() != rounds.len() {
            return Err(PaymentError::TransientDaemon(CoinRpcError::Other(format!(
                "batch gettransaction answered {} of {} calls",
                lookups.len(),
                rounds.len()
            ))));
        }

        for (round, lookup) in rounds.iter_mut().zip(lookups) {
            classify_round(round, lookup, &self.settings.pool_address);
        }
        mark_deletable_shares(rounds);
        rounds.retain(|round| round.category != RoundCategory::Pending);
        cap_paying_rounds(rounds, self.settings.max_blocks_per_payment);
        Ok(())
    }
}
