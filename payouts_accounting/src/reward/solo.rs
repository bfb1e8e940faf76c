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

use super::{RewardError, RewardScheme, RoundCredit, RoundSnapshot, WorkerCredit};
use crate::round::{Round, RoundCategory};
use std::collections::BTreeMap;
use tracing::info;

/// Part of the solo fee already taken when the coinbase was built.
pub const COINBASE_SOLO_FEE_PERCENT: f64 = 1.0;

/// The whole reward, less the solo fee, goes to the worker who found the block.
#[derive(Debug, Clone, Copy)]
pub struct SoloScheme {
    fee_percent: f64,
}

impl SoloScheme {
    pub fn new(fee_percent: f64) -> Self {
        Self { fee_percent }
    }

    /// Fee still to take off `reward` after the coinbase share.
    pub fn fee(&self, reward: i64) -> i64 {
        let additional = (self.fee_percent - COINBASE_SOLO_FEE_PERCENT).max(0.0);
        (reward as f64 * additional / 100.0).round() as i64
    }
}

impl RewardScheme for SoloScheme {
    fn credit_round(
        &self,
        round: &Round,
        reward: i64,
        snapshot: &RoundSnapshot,
    ) -> Result<RoundCredit, RewardError> {
        if reward <= 0 {
            return Err(RewardError::MissingReward {
                height: round.height,
            });
        }
        let fee = self.fee(reward);
        let payout = reward - fee;
        let shares = snapshot
            .shares
            .get(&round.mined_by)
            .copied()
            .unwrap_or(1.0);

        let credit = match round.category {
            RoundCategory::Generate => {
                info!(
                    "Solo block {} found by {}. Reward: {} Fee: {} Payout: {}",
                    round.height, round.mined_by, reward, fee, payout
                );
                WorkerCredit {
                    reward: payout,
                    immature: 0,
                    shares,
                }
            }
            _ => WorkerCredit {
                reward: 0,
                immature: payout,
                shares,
            },
        };

        let mut credits = BTreeMap::new();
        credits.insert(round.mined_by.clone(), credit);
        Ok(RoundCredit {
            height: round.height,
            category: round.category,
            credits,
        })
    }
}
