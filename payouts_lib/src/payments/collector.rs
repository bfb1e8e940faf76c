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

//! Reads the pending rounds and carried balances in one atomic snapshot and
//! settles duplicate block heights before anything else happens.

use super::error::PaymentError;
use super::{CollectedRounds, CycleTimings, PaymentProcessor};
use crate::store::{LedgerBatch, LedgerCommand, LedgerQuery};
use payouts_accounting::{CoinUnits, Round, WorkerLedger, WorkerLedgerEntry};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Build worker entries from a balances hash, adding workers that only have an immature estimate.
fn load_workers(
    units: &CoinUnits,
    balances: BTreeMap<String, String>,
    immature: BTreeMap<String, String>,
    is_solo: bool,
) -> Result<WorkerLedger, PaymentError> {
    let mut workers = WorkerLedger::new();
    for (worker, raw) in balances {
        let balance = units.parse_coins(&raw).ok_or_else(|| {
            PaymentError::LedgerRead(crate::store::StoreError::Corrupt(format!(
                "balance of {worker} is not a number: {raw:?}"
            )))
        })?;
        workers.insert(
            worker.clone(),
            WorkerLedgerEntry::new(&worker, is_solo).with_balance(balance),
        );
    }
    for worker in immature.into_keys() {
        workers
            .entry(worker.clone())
            .or_insert_with(|| WorkerLedgerEntry::new(&worker, is_solo));
    }
    Ok(workers)
}

fn parse_rounds(members: Vec<String>, is_solo: bool) -> Vec<Round> {
    members
        .into_iter()
        .filter_map(|member| match Round::parse(&member, is_solo) {
            Ok(round) => Some(round),
            Err(e) => {
                error!("{e}, leaving it pending");
                None
            }
        })
        .collect()
}

/// Flag every round whose height appears more than once.
pub(crate) fn mark_duplicates(rounds: &mut [Round]) -> bool {
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for round in rounds.iter() {
        *counts.entry(round.height).or_default() += 1;
    }
    let mut found = false;
    for round in rounds.iter_mut() {
        round.is_duplicate = counts.get(&round.height).copied().unwrap_or_default() > 1;
        found |= round.is_duplicate;
    }
    found
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Block on the main chain
    Valid,
    /// Unknown to the daemon or with no confirmations
    Invalid,
    /// The daemon could not answer for this block
    Unknown,
}

/// Decide, per height, which duplicates to archive and which to hold.
///
/// Invalid blocks are always archived. When every block at a height got an
/// answer, the earliest valid one survives and the later valid ones are
/// archived as non-unique. A height with an unanswered block keeps its valid
/// candidates on hold, since the canonical one cannot be picked.
pub(crate) fn adjudicate(
    rounds: &[Round],
    verdicts: &BTreeMap<usize, Verdict>,
    coin: &str,
) -> (HashSet<usize>, HashSet<usize>) {
    let mut by_height: BTreeMap<u64, Vec<(usize, Verdict)>> = BTreeMap::new();
    for (index, verdict) in verdicts {
        by_height
            .entry(rounds[*index].height)
            .or_default()
            .push((*index, *verdict));
    }

    let mut archived = HashSet::new();
    let mut held = HashSet::new();
    for (height, group) in by_height {
        let undecided = group.iter().any(|(_, verdict)| *verdict == Verdict::Unknown);
        let mut survivor: Option<usize> = None;
        for (index, verdict) in group {
            match verdict {
                Verdict::Invalid => {
                    archived.insert(index);
                }
                _ if undecided => {
                    held.insert(index);
                }
                _ if survivor.is_none() => survivor = Some(index),
                _ => {
                    warn!(
                        "{}: removing non-unique duplicate block {} > {}",
                        coin, height, rounds[index].block_hash
                    );
                    archived.insert(index);
                }
            }
        }
        if undecided {
            error!(
                "{}: unable to pick between duplicate blocks at height {}, payments on hold",
                coin, height
            );
        }
    }
    (archived, held)
}

impl PaymentProcessor {
    pub(crate) async fn collect_rounds(
        &self,
        timings: &mut CycleTimings,
    ) -> Result<CollectedRounds, PaymentError> {
        let keys = &self.keys;
        let started = Instant::now();
        let replies = self
            .ledger
            .read_atomic(vec![
                LedgerQuery::HashAll(keys.balances(false)),
                LedgerQuery::HashAll(keys.balances(true)),
                LedgerQuery::SetMembers(keys.blocks_pending(false)),
                LedgerQuery::SetMembers(keys.blocks_pending(true)),
                LedgerQuery::HashAll(keys.immature(false)),
                LedgerQuery::HashAll(keys.immature(true)),
            ])
            .await
            .map_err(PaymentError::LedgerRead)?;
        timings.ledger += started.elapsed();

        let mut replies = replies.into_iter();
        let mut next = || {
            replies.next().ok_or_else(|| {
                PaymentError::LedgerRead(crate::store::StoreError::Corrupt(
                    "short snapshot reply".to_string(),
                ))
            })
        };
        let balances = next()?.into_hash().map_err(PaymentError::LedgerRead)?;
        let solo_balances = next()?.into_hash().map_err(PaymentError::LedgerRead)?;
        let pending = next()?.into_set().map_err(PaymentError::LedgerRead)?;
        let solo_pending = next()?.into_set().map_err(PaymentError::LedgerRead)?;
        let immature = next()?.into_hash().map_err(PaymentError::LedgerRead)?;
        let solo_immature = next()?.into_hash().map_err(PaymentError::LedgerRead)?;

        let units = &self.settings.units;
        let workers = load_workers(units, balances, immature, false)?;
        let solo_workers = load_workers(units, solo_balances, solo_immature, true)?;

        let mut rounds = parse_rounds(pending, false);
        let solo_rounds = parse_rounds(solo_pending, true);
        debug!(
            "{}: {} pool and {} solo blocks pending",
            keys.coin(),
            rounds.len(),
            solo_rounds.len()
        );
        rounds.extend(solo_rounds);
        rounds.sort_by(|a, b| {
            a.height
                .cmp(&b.height)
                .then(a.found_at_ms.cmp(&b.found_at_ms))
                .then(a.serialized.cmp(&b.serialized))
        });

        let mut collected = CollectedRounds {
            workers,
            solo_workers,
            rounds,
        };
        if mark_duplicates(&mut collected.rounds) {
            self.resolve_duplicates(&mut collected.rounds, timings).await?;
        }
        Ok(collected)
    }

    /// Archive invalid and non-unique duplicates so at most one round per
    /// height stays in the working list.
    ///
    /// Nothing is archived unless the daemon answered the whole batch, and
    /// the archive moves are committed before the cycle continues.
    pub(crate) async fn resolve_duplicates(
        &self,
        rounds: &mut Vec<Round>,
        timings: &mut CycleTimings,
    ) -> Result<(), PaymentError> {
        let coin = self.keys.coin();
        let duplicates: Vec<usize> = rounds
            .iter()
            .enumerate()
            .filter(|(_, round)| round.is_duplicate)
            .map(|(index, _)| index)
            .collect();
        warn!(
            "{}: duplicate pending blocks at heights {:?}",
            coin,
            duplicates
                .iter()
                .map(|index| rounds[*index].height)
                .collect::<BTreeSet<_>>()
        );

        let hashes = duplicates
            .iter()
            .map(|index| rounds[*index].block_hash.clone())
            .collect();
        let started = Instant::now();
        let blocks = self.daemon.get_blocks(hashes).await.map_err(|e| {
            error!(
                "{}: duplicate block check failed, manual intervention may be required: {}",
                coin, e
            );
            PaymentError::TransientDaemon(e)
        })?;
        timings.daemon += started.elapsed();
        if blocks.len() != duplicates.len() {
            return Err(PaymentError::InvalidChainState(format!(
                "asked for {} duplicate blocks, daemon answered {}",
                duplicates.len(),
                blocks.len()
            )));
        }

        let mut verdicts: BTreeMap<usize, Verdict> = BTreeMap::new();
        for (index, block) in duplicates.iter().copied().zip(blocks) {
            let round = &rounds[index];
            let verdict = match block {
                Ok(block) if block.confirmations <= 0 => {
                    warn!(
                        "{}: removing invalid duplicate block {} > {}",
                        coin, round.height, round.block_hash
                    );
                    Verdict::Invalid
                }
                Ok(_) => Verdict::Valid,
                Err(e) if e.is_not_found() => {
                    warn!(
                        "{}: removing unknown duplicate block {} > {}",
                        coin, round.height, round.block_hash
                    );
                    Verdict::Invalid
                }
                Err(e) => {
                    error!(
                        "{}: cannot check duplicate block {} > {}: {}",
                        coin, round.height, round.block_hash, e
                    );
                    Verdict::Unknown
                }
            };
            verdicts.insert(index, verdict);
        }
        let (archived, held) = adjudicate(rounds, &verdicts, coin);

        if !archived.is_empty() {
            let moves: Vec<LedgerCommand> = archived
                .iter()
                .map(|index| {
                    let round = &rounds[*index];
                    LedgerCommand::SetMove {
                        source: self.keys.blocks_pending(round.is_solo),
                        destination: self.keys.blocks_duplicate(round.is_solo),
                        member: round.serialized.clone(),
                    }
                })
                .collect();
            let started = Instant::now();
            self.ledger
                .apply_atomic(&LedgerBatch::unguarded(moves))
                .await
                .map_err(|e| {
                    error!("{}: could not archive duplicate blocks: {}", coin, e);
                    PaymentError::LedgerWrite(e)
                })?;
            timings.ledger += started.elapsed();
        }

        let mut index = 0;
        rounds.retain(|_| {
            let current = index;
            index += 1;
            !archived.contains(&current) && !held.contains(&current)
        });
        info!(
            "{}: archived {} duplicate blocks, {} rounds left",
            coin,
            archived.len(),
            rounds.len()
        );
        Ok(())
    }
}
