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

/// Key names shared with the share writer and the stats service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerKeys {
    coin: String,
}

impl LedgerKeys {
    pub fn new(coin: &str) -> Self {
        Self {
            coin: coin.to_string(),
        }
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.coin, name)
    }

    fn scoped(&self, name: &str, solo: bool) -> String {
        if solo {
            format!("{}:{}:solo", self.coin, name)
        } else {
            self.key(name)
        }
    }

    pub fn balances(&self, solo: bool) -> String {
        self.scoped("balances", solo)
    }

    pub fn payouts(&self, solo: bool) -> String {
        self.scoped("payouts", solo)
    }

    pub fn immature(&self, solo: bool) -> String {
        self.scoped("immature", solo)
    }

    pub fn blocks_pending(&self, solo: bool) -> String {
        self.scoped("blocksPending", solo)
    }

    pub fn blocks_confirmed(&self, solo: bool) -> String {
        self.scoped("blocksConfirmed", solo)
    }

    pub fn blocks_kicked(&self, solo: bool) -> String {
        self.scoped("blocksKicked", solo)
    }

    pub fn blocks_duplicate(&self, solo: bool) -> String {
        self.scoped("blocksDuplicate", solo)
    }

    pub fn blocks_pending_confirms(&self) -> String {
        self.key("blocksPendingConfirms")
    }

    pub fn shares_round(&self, height: u64, solo: bool) -> String {
        self.scoped(&format!("shares:round{height}"), solo)
    }

    pub fn shares_times(&self, height: u64) -> String {
        self.key(&format!("shares:times{height}"))
    }

    pub fn shares_round_current(&self) -> String {
        self.key("shares:roundCurrent")
    }

    pub fn payments(&self) -> String {
        self.key("payments")
    }

    pub fn stats(&self, solo: bool) -> String {
        self.scoped("stats", solo)
    }

    /// Ids of committed settlement batches.
    pub fn committed_batches(&self) -> String {
        self.key("ledgerBatches")
    }
}
