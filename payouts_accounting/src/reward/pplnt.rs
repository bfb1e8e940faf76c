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
use crate::calc::round_to;
use crate::round::{Round, RoundCategory};
use crate::worker::payout_address;
use std::collections::BTreeMap;
use tracing::debug;

/// Pay per last N time: proportional, with shares of workers who were
/// active for less than `qualify_fraction` of the longest time scaled by
/// their time fraction.
#[derive(Debug, Clone, Copy)]
pub struct PplntScheme {
    qualify_fraction: f64,
    /// Reserve held back from immature estimates for the transfer fee, in satoshis
    fee_reserve: i64,
}

impl PplntScheme {
    pub fn new(qualify_fraction: f64, fee_reserve: i64) -> Self {
        Self {
            qualify_fraction,
            fee_reserve,
        }
    }

    /// Time weighted shares for every worker in the snapshot.
    pub fn weights(
        &self,
        round: &Round,
        snapshot: &RoundSnapshot,
    ) -> Result<BTreeMap<String, f64>, RewardError> {
        let max_time = snapshot
            .times
            .values()
            .copied()
            .filter(|time| *time > 0.0)
            .fold(0.0_f64, f64::max);

        let mut weights = BTreeMap::new();
        for (worker, shares) in &snapshot.shares {
            let mut shares = shares.max(0.0);
            if max_time > 0.0 {
                let address = payout_address(worker);
                if let Some(time) = snapshot.times.get(address).filter(|time| **time > 0.0) {
                    let fraction = round_to(time / max_time, 2);
                    if fraction > 1.0 {
                        return Err(RewardError::TimeFractionOverflow {
                            height: round.height,
                            worker: worker.clone(),
                            fraction,
                        });
                    }
                    if fraction > 0.0 && fraction < self.qualify_fraction {
                        debug!(
                            "Round {}: {} active for {:.2} of the round, reducing {} shares",
                            round.height, worker, fraction, shares
                        );
                        shares *= fraction;
                    }
                }
            }
            weights.insert(worker.clone(), shares);
        }
        Ok(weights)
    }
}

impl RewardScheme for PplntScheme {
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
        let weights = self.weights(round, snapshot)?;
        let total: f64 = weights.values().sum();
        if total <= 0.0 {
            return Err(RewardError::NoShares {
                height: round.height,
            });
        }
        for (worker, weight) in &weights {
            let percent = weight / total;
            if percent > 1.0 {
                return Err(RewardError::SharePercentOverflow {
                    height: round.height,
                    worker: worker.clone(),
                    percent,
                });
            }
        }

        let distributable = match round.category {
            RoundCategory::Immature => (reward - self.fee_reserve).max(0),
            _ => reward,
        };
        let amounts = distribute(distributable, &weights);
        Ok(RoundCredit::from_amounts(round, amounts, &weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::PropScheme;

    fn round(category: RoundCategory) -> Round {
        let mut round = Round::parse("b:t:200:t1a:1", false).unwrap();
        round.category = category;
        round
    }

    fn snapshot(shares: &[(&str, f64)], times: &[(&str, f64)]) -> RoundSnapshot {
        RoundSnapshot {
            shares: shares
                .iter()
                .map(|(worker, value)| (worker.to_string(), *value))
                .collect(),
            times: times
                .iter()
                .map(|(address, value)| (address.to_string(), *value))
                .collect(),
        }
    }

    #[test]
    fn test_part_time_worker_shares_are_scaled() {
        let scheme = PplntScheme::new(0.51, 0);
        let snapshot = snapshot(
            &[("A.rig", 100.0), ("B.rig", 100.0)],
            &[("A", 1000.0), ("B", 400.0)],
        );
        let weights = scheme
            .weights(&round(RoundCategory::Generate), &snapshot)
            .unwrap();
        assert_eq!(weights["A.rig"], 100.0);
        assert_eq!(weights["B.rig"], 40.0);

        let credit = scheme
            .credit_round(&round(RoundCategory::Generate), 1_400, &snapshot)
            .unwrap();
        assert_eq!(credit.credits["A.rig"].reward, 1_000);
        assert_eq!(credit.credits["B.rig"].reward, 400);
    }

    #[test]
    fn test_qualified_workers_match_prop() {
        let scheme = PplntScheme::new(0.51, 0);
        let snapshot = snapshot(
            &[("A", 60.0), ("B", 40.0)],
            &[("A", 1000.0), ("B", 600.0)],
        );
        let pplnt = scheme
            .credit_round(&round(RoundCategory::Generate), 1_000_000, &snapshot)
            .unwrap();
        let prop = PropScheme
            .credit_round(&round(RoundCategory::Generate), 1_000_000, &snapshot)
            .unwrap();
        assert_eq!(pplnt.credits, prop.credits);
    }

    #[test]
    fn test_missing_times_leave_shares_unchanged() {
        let scheme = PplntScheme::new(0.51, 0);
        let snapshot = snapshot(&[("A", 10.0), ("B", 30.0)], &[]);
        let weights = scheme
            .weights(&round(RoundCategory::Generate), &snapshot)
            .unwrap();
        assert_eq!(weights["A"], 10.0);
        assert_eq!(weights["B"], 30.0);
    }

    #[test]
    fn test_immature_estimate_subtracts_fee_reserve() {
        let scheme = PplntScheme::new(0.51, 40_000);
        let snapshot = snapshot(&[("A", 1.0)], &[("A", 10.0)]);

        let immature = scheme
            .credit_round(&round(RoundCategory::Immature), 1_000_000, &snapshot)
            .unwrap();
        assert_eq!(immature.credits["A"].immature, 960_000);

        let generate = scheme
            .credit_round(&round(RoundCategory::Generate), 1_000_000, &snapshot)
            .unwrap();
        assert_eq!(generate.credits["A"].reward, 1_000_000);
    }

    #[test]
    fn test_rounding_of_time_fraction_decides_qualification() {
        let scheme = PplntScheme::new(0.51, 0);
        // 0.506 rounds to 0.51 which qualifies for full shares
        let snapshot = snapshot(&[("A", 10.0), ("B", 10.0)], &[("A", 1000.0), ("B", 506.0)]);
        let weights = scheme
            .weights(&round(RoundCategory::Generate), &snapshot)
            .unwrap();
        assert_eq!(weights["B"], 10.0);
    }
}
