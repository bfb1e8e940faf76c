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

use std::collections::BTreeMap;

/// Per worker settlement state for one cycle. All amounts in satoshis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerLedgerEntry {
    /// Full worker label as it appears in the ledger, e.g. `t1abc.rig1`
    pub worker: String,
    /// Payout address, the label up to the first '.'
    pub address: String,
    pub is_solo: bool,
    /// Carried balance from earlier cycles
    pub balance: i64,
    /// Reward credited this cycle from matured rounds
    pub reward: i64,
    /// Estimate credited from immature rounds
    pub immature: i64,
    /// Amount included in this cycle's transfer
    pub sent: i64,
    /// Change to write to the carried balance
    pub balance_change: i64,
    /// Shares across paid rounds this cycle
    pub total_shares: f64,
    /// Shares in the round currently being credited
    pub round_shares: f64,
}

impl WorkerLedgerEntry {
    pub fn new(worker: &str, is_solo: bool) -> Self {
        Self {
            worker: worker.to_string(),
            address: payout_address(worker).to_string(),
            is_solo,
            ..Default::default()
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }

    /// Balance plus this cycle's matured reward.
    pub fn owed(&self) -> i64 {
        self.balance + self.reward
    }
}

/// Workers keyed by label, ordered so every pass over them is deterministic.
pub type WorkerLedger = BTreeMap<String, WorkerLedgerEntry>;

/// The address part of a worker label.
pub fn payout_address(worker: &str) -> &str {
    worker.split('.').next().unwrap_or(worker).trim()
}
