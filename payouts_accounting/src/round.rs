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

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// Where a round stands for the current settlement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundCategory {
    /// Not classified yet, or left out of this cycle.
    Pending,
    /// Matured coinbase, payable now.
    Generate,
    /// Coinbase still maturing, credited as an estimate.
    Immature,
    /// Block left the main chain.
    Orphan,
    /// The daemon does not know the transaction, or it does not pay the pool.
    Kicked,
}

impl RoundCategory {
    /// Map a wallet transaction category. Categories we do not settle on give None.
    pub fn from_wallet_category(category: &str) -> Option<Self> {
        match category {
            "generate" => Some(RoundCategory::Generate),
            "immature" => Some(RoundCategory::Immature),
            "orphan" => Some(RoundCategory::Orphan),
            _ => None,
        }
    }

    /// Orphaned and kicked rounds are closed without a reward.
    pub fn is_lost(&self) -> bool {
        matches!(self, RoundCategory::Orphan | RoundCategory::Kicked)
    }

    pub fn is_rewarded(&self) -> bool {
        matches!(self, RoundCategory::Generate | RoundCategory::Immature)
    }
}

impl fmt::Display for RoundCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundCategory::Pending => "pending",
            RoundCategory::Generate => "generate",
            RoundCategory::Immature => "immature",
            RoundCategory::Orphan => "orphan",
            RoundCategory::Kicked => "kicked",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundParseError {
    pub serialized: String,
    pub reason: String,
}

impl Error for RoundParseError {}

impl fmt::Display for RoundParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed round {:?}: {}", self.serialized, self.reason)
    }
}

/// A found block awaiting settlement, as recorded by the share writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub block_hash: String,
    pub tx_hash: String,
    pub height: u64,
    /// Worker that found the block
    pub mined_by: String,
    pub found_at_ms: u64,
    pub is_solo: bool,
    /// Another pending round shares this height
    pub is_duplicate: bool,
    pub category: RoundCategory,
    pub confirmations: i64,
    /// Coinbase output paying the pool, in coins
    pub reward: Option<Decimal>,
    /// The exact member string in the pending set
    pub serialized: String,
    /// No other live round at this height still needs the share records
    pub can_delete_shares: bool,
    /// Shares of a lost pool round, returned to the current round on commit
    pub reclaimed_shares: BTreeMap<String, f64>,
}

impl Round {
    /// Parse `blockHash:txHash:height:minedBy:foundAtMs`.
    ///
    /// Worker names may themselves contain ':', so the first three and
    /// the last field are positional and everything between is the worker.
    pub fn parse(serialized: &str, is_solo: bool) -> Result<Self, RoundParseError> {
        let malformed = |reason: &str| RoundParseError {
            serialized: serialized.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = serialized.split(':').collect();
        if parts.len() < 5 {
            return Err(malformed("expected 5 fields"));
        }
        let block_hash = parts[0];
        let tx_hash = parts[1];
        if block_hash.is_empty() || tx_hash.is_empty() {
            return Err(malformed("empty block or transaction hash"));
        }
        let height = parts[2]
            .parse::<u64>()
            .map_err(|_| malformed("height is not a number"))?;
        let found_at_ms = parts[parts.len() - 1]
            .parse::<u64>()
            .map_err(|_| malformed("found time is not a number"))?;
        let mined_by = parts[3..parts.len() - 1].join(":");

        Ok(Self {
            block_hash: block_hash.to_string(),
            tx_hash: tx_hash.to_string(),
            height,
            mined_by,
            found_at_ms,
            is_solo,
            is_duplicate: false,
            category: RoundCategory::Pending,
            confirmations: 0,
            reward: None,
            serialized: serialized.to_string(),
            can_delete_shares: false,
            reclaimed_shares: BTreeMap::new(),
        })
    }

    /// Mark as kicked. Share records are kept unless a later step clears the flag.
    pub fn kick(&mut self) {
        self.category = RoundCategory::Kicked;
        self.reward = None;
    }
}
