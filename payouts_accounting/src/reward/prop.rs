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

use super::{RewardError, RewardScheme, RoundCredit, RoundSnapshot, distribute};
use crate::round::Round;
use std::collections::BTreeMap;

/// Reward proportional to each worker's shares in the round.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropScheme;

impl RewardScheme for PropScheme {
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
        let weights: BTreeMap<String, f64> = snapshot
            .shares
            .iter()
            .map(|(worker, shares)| (worker.clone(), shares.max(0.0)))
            .collect();
        if snapshot.total_shares() <= 0.0 {
            return Err(RewardError::NoShares {
                height: round.height,
            });
        }
        let amounts = distribute(reward, &weights);
        Ok(RoundCredit::from_amounts(round, amounts, &weights))
    }
}
