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

//! Conversions between whole coins and the integer base unit (satoshis).
//!
//! All settlement arithmetic is done in satoshis. Coins only appear at the
//! edges: amounts read from the daemon, increments written to the ledger and
//! the outputs of a transfer.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

/// Largest supported number of decimal places for a coin.
pub const MAX_PRECISION: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinUnits {
    precision: u32,
}

impl CoinUnits {
    /// Returns None when `precision` exceeds [`MAX_PRECISION`].
    pub fn new(precision: u32) -> Option<Self> {
        (precision <= MAX_PRECISION).then_some(Self { precision })
    }

    /// Derive precision from the way the daemon formats a balance, e.g. `"0.00000000"` gives 8.
    ///
    /// A balance without decimal digits, such as `"0"`, says nothing about
    /// precision and gives None.
    pub fn detect(raw_balance: &str) -> Option<Self> {
        let text = raw_balance.trim().trim_matches('"');
        Decimal::from_str(text).ok()?;
        let (_, decimals) = text.split_once('.')?;
        if decimals.is_empty() {
            return None;
        }
        Self::new(decimals.len() as u32)
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Satoshis per whole coin.
    pub fn magnitude(&self) -> i64 {
        10i64.pow(self.precision)
    }

    /// Coins to satoshis, rounded half away from zero. None on overflow.
    pub fn to_satoshis(&self, coins: Decimal) -> Option<i64> {
        (coins * Decimal::from(self.magnitude())).round().to_i64()
    }

    pub fn to_coins(&self, satoshis: i64) -> Decimal {
        Decimal::new(satoshis, self.precision)
    }

    /// Parse a ledger amount written in coins, e.g. by HINCRBYFLOAT.
    pub fn parse_coins(&self, raw: &str) -> Option<i64> {
        let text = raw.trim();
        let coins = Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .ok()?;
        self.to_satoshis(coins)
    }

    /// Truncating conversion for configured coin values such as the minimum payment.
    pub fn truncate_to_satoshis(&self, coins: f64) -> i64 {
        (coins * self.magnitude() as f64) as i64
    }

    pub fn coins_f64(&self, satoshis: i64) -> f64 {
        self.to_coins(satoshis).to_f64().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_precision_from_raw_balance() {
        assert_eq!(CoinUnits::detect("0.00000000").unwrap().precision(), 8);
        assert_eq!(CoinUnits::detect("12.5000").unwrap().precision(), 4);
        assert!(CoinUnits::detect("7").is_none());
        assert!(CoinUnits::detect("0").is_none());
        assert!(CoinUnits::detect("not a number").is_none());
        assert!(CoinUnits::detect("0.0000000000000000001").is_none());
    }

    #[test]
    fn test_satoshi_conversions() {
        let units = CoinUnits::new(8).unwrap();
        assert_eq!(units.magnitude(), 100_000_000);
        assert_eq!(units.to_satoshis(Decimal::new(625, 2)), Some(625_000_000));
        assert_eq!(units.to_coins(150_000_000), Decimal::new(15, 1));
        assert_eq!(units.parse_coins("0.1"), Some(10_000_000));
        assert_eq!(units.parse_coins("1e-8"), Some(1));
        assert_eq!(units.parse_coins("-0.5"), Some(-50_000_000));
        assert_eq!(units.parse_coins("abc"), None);
    }

    #[test]
    fn test_truncate_minimum_payment() {
        let units = CoinUnits::new(8).unwrap();
        assert_eq!(units.truncate_to_satoshis(0.01), 1_000_000);
        assert_eq!(units.truncate_to_satoshis(0.0), 0);
    }
}
