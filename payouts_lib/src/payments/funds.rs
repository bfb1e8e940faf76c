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
use super::{CollectedRounds, CycleTimings, PaymentProcessor};
use coindrpc::{UnspentOutput, parse_amount};
use payouts_accounting::{CoinUnits, RoundCategory};
use rust_decimal::Decimal;
use std::time::Instant;
use tracing::{debug, error};

/// Sum of spendable outputs in satoshis, skipping outputs on `excluded`.
pub(crate) fn spendable_balance(
    outputs: &[UnspentOutput],
    excluded: Option<&str>,
    units: &CoinUnits,
) -> i64 {
    let total: Decimal = outputs
        .iter()
        .filter(|output| match (&output.address, excluded) {
            (Some(address), Some(excluded)) => address != excluded,
            (Some(_), None) => true,
            (None, _) => false,
        })
        .filter_map(|output| parse_amount(&output.amount))
        .sum();
    units.to_satoshis(total).unwrap_or_default()
}

impl PaymentProcessor {
    /// Demote every payable round to immature when the wallet cannot cover
    /// what the pool owes, so the cycle credits estimates instead of paying.
    pub(crate) async fn check_wallet_funds(
        &self,
        collected: &mut CollectedRounds,
        timings: &mut CycleTimings,
    ) -> Result<(), PaymentError> {
        let units = &self.settings.units;
        let reward_owed = |solo: bool| -> i64 {
            collected
                .generate_rounds()
                .filter(|round| round.is_solo == solo)
                .filter_map(|round| round.reward)
                .filter_map(|reward| units.to_satoshis(reward))
                .sum()
        };
        let pool_owed = reward_owed(false)
            + collected
                .workers
                .values()
                .map(|worker| worker.balance)
                .sum::<i64>();
        let solo_owed = reward_owed(true)
            + collected
                .solo_workers
                .values()
                .map(|worker| worker.balance)
                .sum::<i64>();
        let total_owed = pool_owed + solo_owed;

        let mut can_pay = false;
        if total_owed > 0 {
            let excluded = self
                .settings
                .require_shielding
                .then_some(self.settings.pool_address.as_str());
            let started = Instant::now();
            let outputs = self
                .daemon
                .list_unspent(self.settings.min_conf, Vec::new())
                .await
                .map_err(|e| {
                    error!(
                        "{}: error checking pool balance before processing payments: {}",
                        self.keys.coin(),
                        e
                    );
                    PaymentError::TransientDaemon(e)
                })?;
            timings.daemon += started.elapsed();

            let balance = spendable_balance(&outputs, excluded, units);
            if balance < total_owed {
                error!(
                    "{}: insufficient funds ({}) to process payments. Pool owed: {}, solo owed: {}, total: {}",
                    self.keys.coin(),
                    units.to_coins(balance),
                    units.to_coins(pool_owed),
                    units.to_coins(solo_owed),
                    units.to_coins(total_owed)
                );
            } else {
                can_pay = true;
            }
        }

        if !can_pay {
            for round in collected
                .rounds
                .iter_mut()
                .filter(|round| round.category == RoundCategory::Generate)
            {
                debug!(
                    "{}: holding block {} as immature until funds are available",
                    self.keys.coin(),
                    round.height
                );
                round.category = RoundCategory::Immature;
            }
        }
        Ok(())
    }
}
