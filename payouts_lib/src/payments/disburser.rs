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

//! Turns credited rewards into one batched transfer.

use super::error::PaymentError;
use super::{CollectedRounds, CycleTimings, PaymentProcessor};
use coindrpc::{CoinRpcError, DaemonErrorKind};
use payouts_accounting::calc::withhold;
use payouts_accounting::{CoinUnits, PaymentRecord, WorkerLedger};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{error, info, warn};

/// Retries after the first attempt, each withholding another 0.1%.
pub const MAX_WITHHOLD_RETRIES: u32 = 5;

/// Per address totals of one transfer attempt. Amounts in satoshis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutPlan {
    /// Address to amount sent
    pub amounts: BTreeMap<String, i64>,
    /// Address to amount carried into the balance of a pool worker
    pub balances: BTreeMap<String, i64>,
    /// Address to shares in paid rounds
    pub work: BTreeMap<String, f64>,
    pub total_sent: i64,
    pub total_shares: f64,
}

/// Decide who is paid and by how much, writing `sent` and `balance_change`
/// on every worker entry.
///
/// Pool workers are paid when the total of their address, pool and solo
/// together, reaches `minimum_payment`. Solo workers are paid whenever they
/// have anything to send. The plan is recomputed from scratch for every
/// withholding level.
pub fn plan_payouts(
    workers: &mut WorkerLedger,
    solo_workers: &mut WorkerLedger,
    withhold_permille: u32,
    minimum_payment: i64,
) -> PayoutPlan {
    let mut plan = PayoutPlan::default();

    let mut address_totals: BTreeMap<String, i64> = BTreeMap::new();
    for worker in workers.values().chain(solo_workers.values()) {
        *address_totals.entry(worker.address.clone()).or_default() +=
            withhold(worker.owed(), withhold_permille);
    }

    for worker in workers.values_mut() {
        plan.total_shares += worker.total_shares;
        let to_send = withhold(worker.owed(), withhold_permille);
        let total = address_totals
            .get(&worker.address)
            .copied()
            .unwrap_or_default();

        if total > 0 && total >= minimum_payment {
            worker.sent = to_send.max(0);
            worker.balance_change = -worker.balance.min(to_send);
            if worker.sent > 0 {
                plan.total_sent += worker.sent;
                *plan.amounts.entry(worker.address.clone()).or_default() += worker.sent;
            }
        } else {
            worker.sent = 0;
            // Nothing is transferred, so nothing is withheld from the accrual.
            worker.balance_change = worker.reward.max(0);
            if worker.balance_change > 0 {
                *plan.balances.entry(worker.address.clone()).or_default() +=
                    worker.balance_change;
            }
        }
        if worker.total_shares > 0.0 {
            *plan.work.entry(worker.address.clone()).or_default() += worker.total_shares;
        }
    }

    for worker in solo_workers.values_mut() {
        let to_send = withhold(worker.owed(), withhold_permille);
        if to_send > 0 {
            worker.sent = to_send;
            worker.balance_change = -worker.balance.min(to_send);
            plan.total_sent += to_send;
            *plan.amounts.entry(worker.address.clone()).or_default() += to_send;
        } else {
            worker.sent = 0;
            worker.balance_change = worker.reward.max(0);
        }
    }
    plan
}

/// Result of the disbursement stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Disbursement {
    pub txid: Option<String>,
    pub record: Option<PaymentRecord>,
    pub total_sent: i64,
    pub withheld_permille: u32,
}

enum SendFailure {
    Retry,
    Stop(PaymentError),
}

fn classify_send_error(error: CoinRpcError) -> SendFailure {
    match error.kind() {
        DaemonErrorKind::InsufficientFunds => SendFailure::Retry,
        DaemonErrorKind::Timeout => SendFailure::Stop(PaymentError::FatalPayoutAmbiguity {
            txid: None,
            reason: format!("sendmany timed out, the transfer may have been broadcast: {error}"),
            recovery_file: None,
        }),
        _ => match error {
            CoinRpcError::ParseError { .. } => {
                SendFailure::Stop(PaymentError::FatalPayoutAmbiguity {
                    txid: None,
                    reason: format!("sendmany answer could not be read: {error}"),
                    recovery_file: None,
                })
            }
            other => SendFailure::Stop(PaymentError::PayoutRejected(other)),
        },
    }
}

fn to_coins_map(units: &CoinUnits, amounts: &BTreeMap<String, i64>) -> BTreeMap<String, f64> {
    amounts
        .iter()
        .map(|(address, satoshis)| (address.clone(), units.coins_f64(*satoshis)))
        .collect()
}

impl PaymentProcessor {
    /// Send what is owed in one `sendmany`, retrying with more withholding
    /// while the wallet reports insufficient funds.
    ///
    /// Any failure here leaves the ledger untouched.
    pub(crate) async fn disburse(
        &self,
        collected: &mut CollectedRounds,
        timings: &mut CycleTimings,
    ) -> Result<Disbursement, PaymentError> {
        let coin = self.keys.coin();
        let units = &self.settings.units;

        for withheld_permille in 0..=MAX_WITHHOLD_RETRIES {
            let plan = plan_payouts(
                &mut collected.workers,
                &mut collected.solo_workers,
                withheld_permille,
                self.settings.minimum_payment,
            );
            if plan.amounts.is_empty() {
                return Ok(Disbursement::default());
            }

            let outputs: BTreeMap<String, Decimal> = plan
                .amounts
                .iter()
                .map(|(address, satoshis)| (address.clone(), units.to_coins(*satoshis)))
                .collect();
            let started = Instant::now();
            let sent = self
                .daemon
                .send_many(outputs.clone(), self.settings.min_conf)
                .await;
            timings.daemon += started.elapsed();

            match sent {
                Ok(Some(txid)) if !txid.is_empty() => {
                    info!(
                        "{}: sent {} to {} miners; txid: {}",
                        coin,
                        units.to_coins(plan.total_sent),
                        plan.amounts.len(),
                        txid
                    );
                    if withheld_permille > 0 {
                        warn!(
                            "{}: had to withhold {}% of rewards to cover transaction fees. Fund the pool wallet to prevent this",
                            coin,
                            f64::from(withheld_permille) / 10.0
                        );
                    }
                    let record = self.payment_record(collected, &plan, &txid);
                    return Ok(Disbursement {
                        txid: Some(txid),
                        record: Some(record),
                        total_sent: plan.total_sent,
                        withheld_permille,
                    });
                }
                Ok(_) => {
                    error!(
                        "{}: sendmany {:?} did not return a txid",
                        coin, outputs
                    );
                    return Err(PaymentError::FatalPayoutAmbiguity {
                        txid: None,
                        reason: "sendmany did not return a txid".to_string(),
                        recovery_file: None,
                    });
                }
                Err(e) => match classify_send_error(e) {
                    SendFailure::Retry if withheld_permille < MAX_WITHHOLD_RETRIES => {
                        warn!(
                            "{}: insufficient funds for payments ({}), withholding {}% and retrying",
                            coin,
                            units.to_coins(plan.total_sent),
                            f64::from(withheld_permille + 1) / 10.0
                        );
                    }
                    SendFailure::Retry => {
                        error!(
                            "{}: error sending payments {:?}, withheld too much already",
                            coin, outputs
                        );
                    }
                    SendFailure::Stop(failure) => {
                        error!("{}: error sending payments {:?}: {}", coin, outputs, failure);
                        return Err(failure);
                    }
                },
            }
        }

        Err(PaymentError::InsufficientFunds {
            attempts: MAX_WITHHOLD_RETRIES + 1,
            withheld_permille: MAX_WITHHOLD_RETRIES,
        })
    }

    fn payment_record(
        &self,
        collected: &CollectedRounds,
        plan: &PayoutPlan,
        txid: &str,
    ) -> PaymentRecord {
        let units = &self.settings.units;
        PaymentRecord {
            time: self.clock.millis_since_epoch(),
            txid: txid.to_string(),
            shares: plan.total_shares,
            paid: units.coins_f64(plan.total_sent),
            miners: plan.amounts.len(),
            blocks: collected.generate_rounds().map(|round| round.height).collect(),
            amounts: to_coins_map(units, &plan.amounts),
            balances: to_coins_map(units, &plan.balances),
            work: plan.work.clone(),
            is_solo: collected.generate_rounds().any(|round| round.is_solo),
        }
    }
}
