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

/// Split `reward` satoshis by weight without ever paying out more than `reward`.
///
/// Amounts are rounded half up. If the rounded total exceeds the reward,
/// the excess is taken back one satoshi at a time from the workers that
/// were rounded up the most. Workers with no positive weight get nothing.
pub fn distribute(reward: i64, weights: &BTreeMap<String, f64>) -> BTreeMap<String, i64> {
    let total: f64 = weights.values().filter(|weight| **weight > 0.0).sum();
    if reward <= 0 || total <= 0.0 {
        return BTreeMap::new();
    }

    let mut amounts = BTreeMap::new();
    let mut rounded_up: Vec<(f64, &String)> = Vec::new();
    for (worker, weight) in weights.iter().filter(|(_, weight)| **weight > 0.0) {
        let exact = reward as f64 * (weight / total);
        let amount = exact.round() as i64;
        if amount as f64 > exact {
            rounded_up.push((amount as f64 - exact, worker));
        }
        amounts.insert(worker.clone(), amount);
    }

    let mut excess = amounts.values().sum::<i64>() - reward;
    if excess > 0 {
        rounded_up.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        for (_, worker) in rounded_up {
            if excess == 0 {
                break;
            }
            if let Some(amount) = amounts.get_mut(worker) {
                *amount -= 1;
                excess -= 1;
            }
        }
    }
    // float error can leave a remainder when nothing was rounded up
    while excess > 0 {
        let Some(largest) = amounts.values_mut().max() else {
            break;
        };
        *largest -= 1;
        excess -= 1;
    }
    amounts
}
