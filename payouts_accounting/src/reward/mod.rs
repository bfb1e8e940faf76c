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

//! Reward schemes turning one round's shares into per worker credits.
//!
//! A scheme never touches the worker ledger directly. It returns a
//! [`RoundCredit`] that the caller merges only when the whole round
//! succeeded, so a failing round leaves no partial credits behind.

mod distribute;
mod pplnt;
mod prop;
mod solo;

pub use distribute::distribute;
pub use pplnt::PplntScheme;
pub use prop::PropScheme;
pub use solo::{COINBASE_SOLO_FEE_PERCENT, SoloScheme};

use crate::round::{Round, RoundCategory};
use crate::worker::{WorkerLedger, WorkerLedgerEntry};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// How pool (non solo) rounds are shared out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    /// Proportional to shares in the round
    #[default]
    Prop,
    /// Proportional, with shares scaled down for workers present only part of the round
    Pplnt,
}

/// Share and time records of one round as read from the ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundSnapshot {
    /// Worker label to shares
    pub shares: BTreeMap<String, f64>,
    /// Payout address to seconds active in the round
    pub times: BTreeMap<String, f64>,
}

impl RoundSnapshot {
    pub fn total_shares(&self) -> f64 {
        self.shares.values().filter(|shares| **shares > 0.0).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerCredit {
    pub reward: i64,
    pub immature: i64,
    pub shares: f64,
}

/// Everything one round adds to the worker ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundCredit {
    pub height: u64,
    pub category: RoundCategory,
    pub credits: BTreeMap<String, WorkerCredit>,
}

impl RoundCredit {
    /// Build from satoshi amounts, as reward for matured rounds or as immature estimate.
    pub fn from_amounts(
        round: &Round,
        amounts: BTreeMap<String, i64>,
        weights: &BTreeMap<String, f64>,
    ) -> Self {
        let credits = amounts
            .into_iter()
            .map(|(worker, amount)| {
                let shares = weights.get(&worker).copied().unwrap_or_default();
                let credit = match round.category {
                    RoundCategory::Generate => WorkerCredit {
                        reward: amount,
                        immature: 0,
                        shares,
                    },
                    _ => WorkerCredit {
                        reward: 0,
                        immature: amount,
                        shares,
                    },
                };
                (worker, credit)
            })
            .collect();
        Self {
            height: round.height,
            category: round.category,
            credits,
        }
    }

    pub fn total_reward(&self) -> i64 {
        self.credits.values().map(|credit| credit.reward).sum()
    }

    pub fn total_immature(&self) -> i64 {
        self.credits.values().map(|credit| credit.immature).sum()
    }

    pub fn apply_to(&self, ledger: &mut WorkerLedger, is_solo: bool) {
        for (worker, credit) in &self.credits {
            let entry = ledger
                .entry(worker.clone())
                .or_insert_with(|| WorkerLedgerEntry::new(worker, is_solo));
            entry.reward += credit.reward;
            entry.immature += credit.immature;
            entry.round_shares = credit.shares;
            if self.category == RoundCategory::Generate {
                entry.total_shares += credit.shares;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewardError {
    MissingReward {
        height: u64,
    },
    NoShares {
        height: u64,
    },
    TimeFractionOverflow {
        height: u64,
        worker: String,
        fraction: f64,
    },
    SharePercentOverflow {
        height: u64,
        worker: String,
        percent: f64,
    },
}

impl Error for RewardError {}

impl fmt::Display for RewardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardError::MissingReward { height } => {
                write!(f, "Round {height} has no reward value")
            }
            RewardError::NoShares { height } => write!(f, "Round {height} has no shares"),
            RewardError::TimeFractionOverflow {
                height,
                worker,
                fraction,
            } => write!(
                f,
                "Round {height}: time fraction {fraction} for {worker} is above 1"
            ),
            RewardError::SharePercentOverflow {
                height,
                worker,
                percent,
            } => write!(
                f,
                "Round {height}: share percent {percent} for {worker} is above 1"
            ),
        }
    }
}

/// Splits the reward of a generate or immature round.
pub trait RewardScheme {
    /// `reward` is the round's coinbase output in satoshis.
    fn credit_round(
        &self,
        round: &Round,
        reward: i64,
        snapshot: &RoundSnapshot,
    ) -> Result<RoundCredit, RewardError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_credit_accumulates_and_tracks_paid_shares() {
        let mut round = Round::parse("b:t:10:t1a:1", false).unwrap();
        round.category = RoundCategory::Generate;
        let mut weights = BTreeMap::new();
        weights.insert("t1a.rig".to_string(), 3.0);
        let mut amounts = BTreeMap::new();
        amounts.insert("t1a.rig".to_string(), 500);

        let credit = RoundCredit::from_amounts(&round, amounts, &weights);
        let mut ledger = WorkerLedger::new();
        ledger.insert(
            "t1a.rig".to_string(),
            WorkerLedgerEntry::new("t1a.rig", false).with_balance(100),
        );
        credit.apply_to(&mut ledger, false);
        credit.apply_to(&mut ledger, false);

        let entry = &ledger["t1a.rig"];
        assert_eq!(entry.balance, 100);
        assert_eq!(entry.reward, 1000);
        assert_eq!(entry.total_shares, 6.0);
        assert_eq!(entry.round_shares, 3.0);
    }

    #[test]
    fn test_immature_credit_does_not_count_paid_shares() {
        let mut round = Round::parse("b:t:10:t1a:1", false).unwrap();
        round.category = RoundCategory::Immature;
        let mut weights = BTreeMap::new();
        weights.insert("t1a".to_string(), 2.0);
        let mut amounts = BTreeMap::new();
        amounts.insert("t1a".to_string(), 70);

        let credit = RoundCredit::from_amounts(&round, amounts, &weights);
        let mut ledger = WorkerLedger::new();
        credit.apply_to(&mut ledger, false);

        assert_eq!(ledger["t1a"].immature, 70);
        assert_eq!(ledger["t1a"].reward, 0);
        assert_eq!(ledger["t1a"].total_shares, 0.0);
        assert_eq!(credit.total_immature(), 70);
    }
}
