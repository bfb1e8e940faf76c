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

//! Typed views of the daemon responses the payment processor consumes.
//!
//! Amounts are kept as raw JSON values and converted with [`parse_amount`]
//! so no precision is lost going through binary floats.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AddressValidation {
    #[serde(default)]
    pub isvalid: bool,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ismine: Option<bool>,
}

/// Most `getaddressinfo` versions omit isvalid, an answer without an error means the address parsed.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AddressInfo {
    pub address: String,
    #[serde(default)]
    pub isvalid: Option<bool>,
    #[serde(default)]
    pub ismine: Option<bool>,
}

impl AddressInfo {
    pub fn is_valid(&self) -> bool {
        self.isvalid != Some(false)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BlockInfo {
    pub hash: String,
    #[serde(default)]
    pub height: Option<u64>,
    /// -1 for blocks that are not on the main chain
    pub confirmations: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TransactionDetail {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    /// Some daemons report the coinbase output under `value`
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl TransactionDetail {
    /// Output amount in coins, from `amount` or else `value`.
    pub fn reward(&self) -> Option<Decimal> {
        self.amount
            .as_ref()
            .and_then(parse_amount)
            .or_else(|| self.value.as_ref().and_then(parse_amount))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WalletTransaction {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(default)]
    pub details: Vec<TransactionDetail>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UnspentOutput {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub amount: serde_json::Value,
    #[serde(default)]
    pub confirmations: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OperationError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OperationResult {
    #[serde(default)]
    pub txid: Option<String>,
}

/// One entry of `z_getoperationstatus` / `z_getoperationresult`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OperationStatus {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<OperationError>,
    #[serde(default)]
    pub result: Option<OperationResult>,
    #[serde(default)]
    pub execution_secs: Option<f64>,
}

impl OperationStatus {
    pub fn is_finished(&self) -> bool {
        self.status == "success" || self.status == "failed"
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MiningInfo {
    #[serde(default)]
    pub blocks: Option<u64>,
    /// A number, or an object keyed by algorithm on multi-algo chains
    #[serde(default)]
    pub difficulty: Option<serde_json::Value>,
    #[serde(default)]
    pub networkhashps: Option<serde_json::Value>,
}

impl MiningInfo {
    pub fn network_difficulty(&self) -> Option<serde_json::Value> {
        match &self.difficulty {
            Some(serde_json::Value::Object(map)) => map.get("proof-of-work").cloned(),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkInfo {
    #[serde(default)]
    pub connections: Option<u64>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub protocolversion: Option<u64>,
    #[serde(default)]
    pub subversion: Option<String>,
}

/// Parse a coin amount from a JSON number or numeric string.
///
/// Numbers go through their shortest decimal text, so `0.1` stays `0.1`.
pub fn parse_amount(value: &serde_json::Value) -> Option<Decimal> {
    let text = match value {
        serde_json::Value::Number(number) => number.to_string(),
        serde_json::Value::String(text) => text.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
