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
use crate::store::{LedgerQuery, StoreError};
use payouts_accounting::calc::parse_weight;
use payouts_accounting::{
    PaymentMode, PplntScheme, PropScheme, Round, RoundCategory, RoundSnapshot, RewardScheme,
    SoloScheme,
};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{error, warn};

fn parse_weights(height: u64, raw: BTreeMap<String, String>) -> BTreeMap<String, f64> {
    raw.into_iter()
        .filter_map(|(worker, value)| match parse_weight(&value) {
            Some(weight) => Some((worker, weight)),
            None => {
                warn!("Round {height}: ignoring unreadable entry {worker}={value:?}");
                None
            }
        })
        .collect()
}

impl PaymentProcessor {
    fn scheme_for(&self, round: &Round) -> Box<dyn RewardScheme + Send + Sync> {
        if round.is_solo {
            return Box::new(SoloScheme::new(self.settings.solo_fee_percent));
        }
        match self.settings.payment_mode {
            PaymentMode::Prop => Box::new(PropScheme),
            PaymentMode::Pplnt => Box::new(PplntScheme::new(
                self.settings.pplnt_qualify_fraction,
                self.settings.fee_reserve,
            )),
        }
    }

    async fn load_snapshots(
        &self,
        rounds: &[Round],
        timings: &mut CycleTimings,
    ) -> Result<Vec<RoundSnapshot>, PaymentError> {
        let queries = rounds
            .iter()
            .flat_map(|round| {
                [
                    LedgerQuery::HashAll(self.keys.shares_times(round.height)),
                    LedgerQuery::HashAll(self.keys.shares_round(round.height, round.is_solo)),
                ]
            })
            .collect();
        let started = Instant::now();
        let replies = self
            .ledger
            .read_atomic(queries)
            .await
            .map_err(PaymentError::LedgerRead)?;
        timings.ledger += started.elapsed();
        if replies.len() != rounds.len() * 2 {
            return Err(PaymentError::LedgerRead(StoreError::Corrupt(format!(
                "expected {} share records, got {}",
                rounds.len() * 2,
                replies.len()
            ))));
        }

        let mut replies = replies.into_iter();
        let mut snapshots = Vec::with_capacity(rounds.len());
        for round in rounds {
            let (Some(times), Some(shares)) = (replies.next(), replies.next()) else {
                break;
            };
            let times = times.into_hash().map_err(PaymentError::LedgerRead)?;
            let shares = shares.into_hash().map_err(PaymentError::LedgerRead)?;
            snapshots.push(RoundSnapshot {
                shares: parse_weights(round.height, shares),
                times: parse_weights(round.height, times),
            });
        }
        Ok(snapshots)
    }

    /// Credit every rewarded round into the worker ledgers.
    ///
    /// A round whose credit cannot be computed is left pending for the next
    /// cycle without touching any worker. Lost pool rounds keep their shares
    /// so the committer can return them to the current round.
    pub(crate) async fn calculate_rewards(
        &self,
        collected: &mut CollectedRounds,
        timings: &mut CycleTimings,
    ) -> Result<(), PaymentError> {
        if collected.rounds.is_empty() {
            return Ok(());
        }
        let snapshots = self.load_snapshots(&collected.rounds, timings).await?;
        let coin = self.keys.coin();
        let units = &self.settings.units;

        for (round, mut snapshot) in collected.rounds.iter_mut().zip(snapshots) {
            if round.category.is_lost() {
                if !round.is_solo {
                    round.reclaimed_shares = snapshot.shares;
                }
                continue;
            }
            if !round.category.is_rewarded() {
                continue;
            }

            if snapshot.shares.is_empty() {
                if round.is_solo {
                    warn!(
                        "{}: no shares found for solo block {}, using block finder {}",
                        coin, round.height, round.mined_by
                    );
                    snapshot.shares.insert(round.mined_by.clone(), 1.0);
                } else {
                    warn!(
                        "{}: no worker shares found for round {} blockHash {}, kicking it",
                        coin, round.height, round.block_hash
                    );
                    round.kick();
                    round.can_delete_shares = false;
                    continue;
                }
            }

            let reward = round
                .reward
                .and_then(|reward| units.to_satoshis(reward))
                .unwrap_or_default();
            let credited = self
                .scheme_for(round)
                .credit_round(round, reward, &snapshot);
            match credited {
                Ok(credit) => {
                    let workers = if round.is_solo {
                        &mut collected.solo_workers
                    } else {
                        &mut collected.workers
                    };
                    credit.apply_to(workers, round.is_solo);
                }
                Err(e) => {
                    error!(
                        "{}: {} blockHash {}, round left for the next cycle",
                        coin, e, round.block_hash
                    );
                    round.category = RoundCategory::Pending;
                }
            }
        }
        collected
            .rounds
            .retain(|round| round.category != RoundCategory::Pending);
        Ok(())
    }
}
