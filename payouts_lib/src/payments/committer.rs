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

use super::disburser::Disbursement;
use super::error::PaymentError;
use super::{CollectedRounds, CycleTimings, PaymentProcessor, recovery};
use crate::store::{BatchGuard, BatchOutcome, LedgerBatch, LedgerCommand};
use crate::utils::time_provider::format_timestamp_millis;
use payouts_accounting::{Round, RoundCategory, WorkerLedger};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::time::Instant;
use tracing::{error, info, warn};

impl PaymentProcessor {
    fn share_keys(&self, round: &Round) -> [String; 2] {
        [
            self.keys.shares_round(round.height, round.is_solo),
            self.keys.shares_times(round.height),
        ]
    }

    fn worker_commands(
        &self,
        workers: &WorkerLedger,
        is_solo: bool,
        immature: &mut Vec<LedgerCommand>,
        balances: &mut Vec<LedgerCommand>,
        payouts: &mut Vec<LedgerCommand>,
    ) {
        let units = &self.settings.units;
        for (label, worker) in workers {
            immature.push(LedgerCommand::HashSet {
                key: self.keys.immature(is_solo),
                field: label.clone(),
                value: worker.immature.max(0).to_string(),
            });
            if worker.balance_change != 0 {
                balances.push(LedgerCommand::HashIncrByFloat {
                    key: self.keys.balances(is_solo),
                    field: label.clone(),
                    increment: units.to_coins(worker.balance_change),
                });
            }
            if worker.sent > 0 {
                payouts.push(LedgerCommand::HashIncrByFloat {
                    key: self.keys.payouts(is_solo),
                    field: label.clone(),
                    increment: units.to_coins(worker.sent),
                });
            }
        }
    }

    /// Every ledger change of the cycle, in the order it is applied.
    pub(crate) fn build_commit_batch(
        &self,
        collected: &CollectedRounds,
        disbursement: &Disbursement,
    ) -> LedgerBatch {
        let keys = &self.keys;
        let mut moves = Vec::new();
        let mut merges = Vec::new();
        let mut deletes: Vec<String> = Vec::new();
        let mut confirms = Vec::new();
        let mut confirms_done = Vec::new();

        for round in &collected.rounds {
            match round.category {
                RoundCategory::Generate => {
                    moves.push(LedgerCommand::SetMove {
                        source: keys.blocks_pending(round.is_solo),
                        destination: keys.blocks_confirmed(round.is_solo),
                        member: round.serialized.clone(),
                    });
                    deletes.extend(self.share_keys(round));
                    confirms_done.push(round.block_hash.clone());
                }
                RoundCategory::Orphan | RoundCategory::Kicked => {
                    moves.push(LedgerCommand::SetMove {
                        source: keys.blocks_pending(round.is_solo),
                        destination: keys.blocks_kicked(round.is_solo),
                        member: round.serialized.clone(),
                    });
                    if round.can_delete_shares {
                        if !round.reclaimed_shares.is_empty() {
                            warn!(
                                "{}: moving shares from orphaned block {} to current round",
                                keys.coin(),
                                round.height
                            );
                        }
                        for (worker, shares) in &round.reclaimed_shares {
                            if let Some(increment) = Decimal::from_f64(*shares) {
                                merges.push(LedgerCommand::HashIncrByFloat {
                                    key: keys.shares_round_current(),
                                    field: worker.clone(),
                                    increment,
                                });
                            }
                        }
                        deletes.extend(self.share_keys(round));
                    }
                    confirms_done.push(round.block_hash.clone());
                }
                RoundCategory::Immature => confirms.push(LedgerCommand::HashSet {
                    key: keys.blocks_pending_confirms(),
                    field: round.block_hash.clone(),
                    value: round.confirmations.to_string(),
                }),
                RoundCategory::Pending => {}
            }
        }

        let mut immature = Vec::new();
        let mut balances = Vec::new();
        let mut payouts = Vec::new();
        self.worker_commands(
            &collected.workers,
            false,
            &mut immature,
            &mut balances,
            &mut payouts,
        );
        self.worker_commands(
            &collected.solo_workers,
            true,
            &mut immature,
            &mut balances,
            &mut payouts,
        );

        let mut commands = moves;
        commands.extend(merges);
        commands.extend(immature);
        commands.extend(balances);
        commands.extend(payouts);
        if !deletes.is_empty() {
            deletes.sort();
            deletes.dedup();
            commands.push(LedgerCommand::Delete { keys: deletes });
        }
        commands.extend(confirms);
        commands.extend(confirms_done.into_iter().map(|block_hash| LedgerCommand::HashDel {
            key: keys.blocks_pending_confirms(),
            field: block_hash,
        }));

        if let Some(record) = &disbursement.record {
            match record.to_json() {
                Ok(member) => commands.push(LedgerCommand::SortedSetAdd {
                    key: keys.payments(),
                    score: record.time as f64,
                    member,
                }),
                Err(e) => error!("{}: could not encode payment record: {}", keys.coin(), e),
            }
        }

        let units = &self.settings.units;
        let total_paid: i64 = collected
            .workers
            .values()
            .chain(collected.solo_workers.values())
            .map(|worker| worker.sent)
            .sum();
        if total_paid != 0 {
            commands.push(LedgerCommand::HashIncrByFloat {
                key: keys.stats(false),
                field: "totalPaid".to_string(),
                increment: units.to_coins(total_paid),
            });
        }
        let solo_paid: i64 = collected.solo_workers.values().map(|worker| worker.sent).sum();
        if solo_paid > 0 {
            commands.push(LedgerCommand::HashIncrByFloat {
                key: keys.stats(true),
                field: "totalPaid".to_string(),
                increment: units.to_coins(solo_paid),
            });
        }

        let accumulates = commands.iter().any(|command| {
            matches!(
                command,
                LedgerCommand::HashIncrByFloat { .. } | LedgerCommand::SortedSetAdd { .. }
            )
        });
        if !accumulates {
            return LedgerBatch::unguarded(commands);
        }
        let id = disbursement
            .txid
            .clone()
            .unwrap_or_else(|| format!("cycle-{}", self.clock.millis_since_epoch()));
        LedgerBatch::guarded(
            BatchGuard {
                key: keys.committed_batches(),
                id,
            },
            commands,
        )
    }

    /// Apply the cycle's batch. Once a transfer went out, a failed commit
    /// halts the coin and leaves the batch in a recovery file.
    pub(crate) async fn commit(
        &self,
        collected: &CollectedRounds,
        disbursement: &Disbursement,
        timings: &mut CycleTimings,
    ) -> Result<Option<BatchOutcome>, PaymentError> {
        let batch = self.build_commit_batch(collected, disbursement);
        if batch.is_empty() {
            return Ok(None);
        }
        let coin = self.keys.coin();

        let started = Instant::now();
        let applied = self.ledger.apply_atomic(&batch).await;
        timings.ledger += started.elapsed();

        match applied {
            Ok(BatchOutcome::Applied) => Ok(Some(BatchOutcome::Applied)),
            Ok(BatchOutcome::AlreadyApplied) => {
                warn!(
                    "{}: ledger batch {:?} was already applied, nothing changed",
                    coin,
                    batch.guard.as_ref().map(|guard| &guard.id)
                );
                Ok(Some(BatchOutcome::AlreadyApplied))
            }
            Err(e) => match &disbursement.txid {
                None => {
                    error!("{}: could not commit cycle, nothing was sent: {}", coin, e);
                    Err(PaymentError::LedgerWrite(e))
                }
                Some(txid) => {
                    let millis = self.clock.millis_since_epoch();
                    let recovery_file = match recovery::persist(
                        &self.settings.recovery_dir,
                        coin,
                        &batch,
                        millis,
                    ) {
                        Ok(path) => {
                            error!(
                                "{}: payments sent but the ledger was not updated: {}. The batch in {} must be replayed manually",
                                coin,
                                e,
                                path.display()
                            );
                            Some(path)
                        }
                        Err(write_error) => {
                            error!(
                                "{}: payments sent, ledger not updated ({}) and the recovery file could not be written ({}). Batch: {}",
                                coin,
                                e,
                                write_error,
                                serde_json::to_string(&batch).unwrap_or_default()
                            );
                            None
                        }
                    };
                    info!(
                        "{}: unrecorded transfer {} sent at {}",
                        coin,
                        txid,
                        format_timestamp_millis(millis)
                    );
                    Err(PaymentError::FatalPayoutAmbiguity {
                        txid: Some(txid.clone()),
                        reason: format!("ledger commit failed after transfer: {e}"),
                        recovery_file,
                    })
                }
            },
        }
    }
}
