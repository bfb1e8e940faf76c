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

//! Small numeric helpers shared by the reward schemes.

/// Round to `digits` decimal places, halves away from zero.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Apply a per-mille withholding to a satoshi amount and round to whole satoshis.
pub fn withhold(amount: i64, withhold_permille: u32) -> i64 {
    if withhold_permille == 0 {
        return amount;
    }
    let kept = 1.0 - f64::from(withhold_permille) / 1000.0;
    (amount as f64 * kept).round() as i64
}

/// Parse a numeric ledger field, treating junk as absent.
pub fn parse_weight(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}
