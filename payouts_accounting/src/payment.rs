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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// History entry for one transfer, stored in the payments sorted set.
///
/// Field names are part of the ledger format read by the stats service.
/// Coin values are whole coins, for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Milliseconds since the epoch
    pub time: u64,
    pub txid: String,
    /// Shares across the rounds paid by this transfer
    pub shares: f64,
    /// Total coins sent
    pub paid: f64,
    /// Number of addresses paid
    pub miners: usize,
    /// Heights of the rounds this transfer settles
    pub blocks: Vec<u64>,
    /// Address to coins sent
    pub amounts: BTreeMap<String, f64>,
    /// Address to coins carried over unpaid
    pub balances: BTreeMap<String, f64>,
    /// Address to shares in paid rounds
    pub work: BTreeMap<String, f64>,
    #[serde(rename = "isSolo")]
    pub is_solo: bool,
}

impl PaymentRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_record_json_field_names() {
        let mut amounts = BTreeMap::new();
        amounts.insert("t1a".to_string(), 1.5);
        let record = PaymentRecord {
            time: 1_700_000_000_000,
            txid: "abc".to_string(),
            shares: 10.0,
            paid: 1.5,
            miners: 1,
            blocks: vec![100, 101],
            amounts,
            balances: BTreeMap::new(),
            work: BTreeMap::new(),
            is_solo: false,
        };
        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["isSolo"], false);
        assert_eq!(value["amounts"]["t1a"], 1.5);
        assert_eq!(value["blocks"], serde_json::json!([100, 101]));
        assert_eq!(value["time"], 1_700_000_000_000u64);
    }
}
