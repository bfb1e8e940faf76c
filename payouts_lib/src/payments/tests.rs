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

use super::*;
use crate::config::{
    CoinConfig, ConfigurationError, LedgerConfig, PaymentProcessingConfig, RocksdbConfig,
};
use crate::daemon::MockCoinDaemon;
use crate::store::{
    BatchGuard, LedgerBatch, LedgerCommand, LedgerQuery, RocksLedger, StoreError,
};
use crate::utils::time_provider::TestTimeProvider;
use async_trait::async_trait;
use coindrpc::{BlockInfo, CoinRpcConfig, CoinRpcError, UnspentOutput, WalletTransaction};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::{TempDir, tempdir};

const NOW: u64 = 1_700_000_100_000;

struct Harness {
    dir: TempDir,
    ledger: Arc<RocksLedger>,
    clock: Arc<TestTimeProvider>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let ledger = RocksLedger::new(dir.path().join("ledger").to_str().unwrap()).unwrap();
        Self {
            dir,
            ledger: Arc::new(ledger),
            clock: Arc::new(TestTimeProvider::new(NOW)),
        }
    }

    fn settings(&self, mode: PaymentMode) -> PaymentSettings {
        PaymentSettings {
            coin: "zcash".to_string(),
            pool_address: "t1pool".to_string(),
            require_shielding: false,
            min_conf: 10,
            max_blocks_per_payment: 3,
            payment_mode: mode,
            pplnt_qualify_fraction: 0.51,
            solo_fee_percent: 2.0,
            minimum_payment: 1_000_000,
            fee_reserve: 40_000,
            recovery_dir: self.dir.path().join("recovery"),
            units: CoinUnits::new(8).unwrap(),
        }
    }

    fn processor(&self, daemon: MockCoinDaemon) -> PaymentProcessor {
        self.processor_with(daemon, PaymentMode::Prop, self.ledger.clone())
    }

    fn processor_with(
        &self,
        daemon: MockCoinDaemon,
        mode: PaymentMode,
        ledger: Arc<dyn LedgerStore>,
    ) -> PaymentProcessor {
        PaymentProcessor::new(self.settings(mode), Arc::new(daemon), ledger, self.clock.clone())
    }

    async fn seed(&self, commands: Vec<LedgerCommand>) {
        self.ledger
            .apply_atomic(&LedgerBatch::unguarded(commands))
            .await
            .unwrap();
    }

    async fn hash(&self, key: &str) -> BTreeMap<String, String> {
        let replies = self
            .ledger
            .read_atomic(vec![LedgerQuery::HashAll(key.to_string())])
            .await
            .unwrap();
        replies.into_iter().next().unwrap().into_hash().unwrap()
    }

    async fn members(&self, key: &str) -> Vec<String> {
        let replies = self
            .ledger
            .read_atomic(vec![LedgerQuery::SetMembers(key.to_string())])
            .await
            .unwrap();
        replies.into_iter().next().unwrap().into_set().unwrap()
    }
}

fn pending(member: &str, solo: bool) -> LedgerCommand {
    LedgerCommand::SetAdd {
        key: if solo {
            "zcash:blocksPending:solo".to_string()
        } else {
            "zcash:blocksPending".to_string()
        },
        member: member.to_string(),
    }
}

fn hset(key: &str, field: &str, value: &str) -> LedgerCommand {
    LedgerCommand::HashSet {
        key: key.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn wallet_tx(category: &str, amount: f64, confirmations: i64) -> WalletTransaction {
    serde_json::from_value(json!({
        "confirmations": confirmations,
        "details": [{"address": "t1pool", "category": category, "amount": amount}]
    }))
    .unwrap()
}

fn unspent(amount: f64) -> Vec<UnspentOutput> {
    serde_json::from_value(json!([{"address": "t1pool", "amount": amount}])).unwrap()
}

fn insufficient_funds() -> CoinRpcError {
    CoinRpcError::RpcError {
        code: -6,
        message: "Insufficient funds".to_string(),
    }
}

fn coins(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

const ROUND_1000: &str = "bh1000:tx1000:1000:t1a.rig:1700000000000";

/// Prop round at height 1000 paying 10 coins, shares 70/30.
async fn seed_prop_round(harness: &Harness) {
    harness
        .seed(vec![
            pending(ROUND_1000, false),
            hset("zcash:shares:round1000", "t1a.rig", "70"),
            hset("zcash:shares:round1000", "t1b", "30"),
            hset("zcash:shares:times1000", "t1a", "600"),
        ])
        .await;
}

fn expect_generate_round(daemon: &mut MockCoinDaemon) {
    daemon
        .expect_get_transactions()
        .withf(|txids| txids == &vec!["tx1000".to_string()])
        .times(1)
        .returning(|_| Ok(vec![Ok(wallet_tx("generate", 10.0, 120))]));
    daemon
        .expect_list_unspent()
        .returning(|_, _| Ok(unspent(50.0)));
}

#[tokio::test]
async fn test_prop_round_paid_and_committed() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    expect_generate_round(&mut daemon);
    daemon
        .expect_send_many()
        .withf(|amounts, min_conf| {
            *min_conf == 10
                && amounts.len() == 2
                && amounts["t1a"] == coins("7")
                && amounts["t1b"] == coins("3")
        })
        .times(1)
        .returning(|_, _| Ok(Some("txid1".to_string())));

    let outcome = harness.processor(daemon).run_cycle().await;
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("cycle did not complete: {outcome:?}");
    };
    assert_eq!(summary.txid.as_deref(), Some("txid1"));
    assert_eq!(summary.total_sent, 1_000_000_000);
    assert_eq!(summary.paid_rounds, 1);
    assert_eq!(summary.commit, Some(BatchOutcome::Applied));

    assert!(harness.members("zcash:blocksPending").await.is_empty());
    assert_eq!(
        harness.members("zcash:blocksConfirmed").await,
        vec![ROUND_1000.to_string()]
    );
    let payouts = harness.hash("zcash:payouts").await;
    assert_eq!(coins(&payouts["t1a.rig"]), coins("7"));
    assert_eq!(coins(&payouts["t1b"]), coins("3"));
    assert!(harness.hash("zcash:balances").await.is_empty());
    assert!(harness.hash("zcash:shares:round1000").await.is_empty());
    assert!(harness.hash("zcash:shares:times1000").await.is_empty());
    assert_eq!(coins(&harness.hash("zcash:stats").await["totalPaid"]), coins("10"));
    assert_eq!(
        harness.members("zcash:ledgerBatches").await,
        vec!["txid1".to_string()]
    );

    let payments = harness.ledger.sorted_set_members("zcash:payments").await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].1, NOW as f64);
    let record: serde_json::Value = serde_json::from_str(&payments[0].0).unwrap();
    assert_eq!(record["txid"], "txid1");
    assert_eq!(record["blocks"], json!([1000]));
    assert_eq!(record["miners"], 2);
    assert_eq!(record["isSolo"], false);
}

#[tokio::test]
async fn test_solo_round_pays_finder_less_fee() {
    let harness = Harness::new();
    let member = "bh2000:tx2000:2000:t1s.rig:1700000000000";
    harness.seed(vec![pending(member, true)]).await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_transactions()
        .returning(|_| Ok(vec![Ok(wallet_tx("generate", 5.0, 120))]));
    daemon
        .expect_list_unspent()
        .returning(|_, _| Ok(unspent(50.0)));
    daemon
        .expect_send_many()
        .withf(|amounts, _| amounts.len() == 1 && amounts["t1s"] == coins("4.95"))
        .times(1)
        .returning(|_, _| Ok(Some("solotx".to_string())));

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");

    assert_eq!(
        harness.members("zcash:blocksConfirmed:solo").await,
        vec![member.to_string()]
    );
    assert_eq!(
        coins(&harness.hash("zcash:payouts:solo").await["t1s.rig"]),
        coins("4.95")
    );
    assert_eq!(
        coins(&harness.hash("zcash:stats:solo").await["totalPaid"]),
        coins("4.95")
    );
    let payments = harness.ledger.sorted_set_members("zcash:payments").await.unwrap();
    let record: serde_json::Value = serde_json::from_str(&payments[0].0).unwrap();
    assert_eq!(record["isSolo"], true);
}

#[tokio::test]
async fn test_insufficient_funds_retries_with_withholding() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    expect_generate_round(&mut daemon);
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    daemon.expect_send_many().returning(move |amounts, _| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(insufficient_funds())
        } else {
            assert_eq!(amounts["t1a"], coins("6.986"));
            assert_eq!(amounts["t1b"], coins("2.994"));
            Ok(Some("txid2".to_string()))
        }
    });

    let outcome = harness.processor(daemon).run_cycle().await;
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("cycle did not complete: {outcome:?}");
    };
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(summary.withheld_permille, 2);
    assert_eq!(summary.total_sent, 998_000_000);
    let payouts = harness.hash("zcash:payouts").await;
    assert_eq!(coins(&payouts["t1a.rig"]), coins("6.986"));
}

#[tokio::test]
async fn test_exhausted_withholding_aborts_without_ledger_changes() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    expect_generate_round(&mut daemon);
    daemon
        .expect_send_many()
        .times(6)
        .returning(|_, _| Err(insufficient_funds()));

    let outcome = harness.processor(daemon).run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Aborted(PaymentError::InsufficientFunds {
            attempts: 6,
            withheld_permille: 5
        })
    );
    assert_eq!(
        harness.members("zcash:blocksPending").await,
        vec![ROUND_1000.to_string()]
    );
    assert_eq!(harness.hash("zcash:shares:round1000").await.len(), 2);
    assert!(harness.hash("zcash:payouts").await.is_empty());
    assert!(harness.members("zcash:ledgerBatches").await.is_empty());
}

#[tokio::test]
async fn test_missing_txid_halts() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    expect_generate_round(&mut daemon);
    daemon.expect_send_many().times(1).returning(|_, _| Ok(None));

    let outcome = harness.processor(daemon).run_cycle().await;
    let CycleOutcome::Halted(error) = outcome else {
        panic!("expected a halt: {outcome:?}");
    };
    assert!(error.is_fatal());
    assert_eq!(
        harness.members("zcash:blocksPending").await,
        vec![ROUND_1000.to_string()]
    );
    assert!(harness.hash("zcash:payouts").await.is_empty());
}

#[tokio::test]
async fn test_rejected_payout_aborts() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    expect_generate_round(&mut daemon);
    daemon.expect_send_many().times(1).returning(|_, _| {
        Err(CoinRpcError::RpcError {
            code: -5,
            message: "Invalid address".to_string(),
        })
    });

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Aborted(PaymentError::PayoutRejected(_))
    ));
    assert!(harness.hash("zcash:payouts").await.is_empty());
}

#[tokio::test]
async fn test_duplicate_height_keeps_chain_valid_block() {
    let harness = Harness::new();
    let orphaned = "a500:ta500:500:t1a:1";
    let valid = "b500:tb500:500:t1a:2";
    harness
        .seed(vec![
            pending(orphaned, false),
            pending(valid, false),
            hset("zcash:shares:round500", "t1a", "10"),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_blocks()
        .withf(|hashes| hashes == &vec!["a500".to_string(), "b500".to_string()])
        .times(1)
        .returning(|_| {
            Ok(vec![
                Ok(BlockInfo {
                    hash: "a500".to_string(),
                    height: Some(500),
                    confirmations: -1,
                }),
                Ok(BlockInfo {
                    hash: "b500".to_string(),
                    height: Some(500),
                    confirmations: 40,
                }),
            ])
        });
    daemon
        .expect_get_transactions()
        .withf(|txids| txids == &vec!["tb500".to_string()])
        .returning(|_| Ok(vec![Ok(wallet_tx("immature", 2.0, 40))]));

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(
        harness.members("zcash:blocksDuplicate").await,
        vec![orphaned.to_string()]
    );
    assert_eq!(
        harness.members("zcash:blocksPending").await,
        vec![valid.to_string()]
    );
    assert_eq!(harness.hash("zcash:immature").await["t1a"], "200000000");
    assert_eq!(harness.hash("zcash:blocksPendingConfirms").await["b500"], "40");
}

#[tokio::test]
async fn test_duplicate_check_failure_aborts_without_moves() {
    let harness = Harness::new();
    harness
        .seed(vec![
            pending("a500:ta500:500:t1a:1", false),
            pending("b500:tb500:500:t1a:2", false),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_blocks()
        .returning(|_| Err(CoinRpcError::Other("connection refused".to_string())));
    daemon.expect_get_transactions().never();

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Aborted(PaymentError::TransientDaemon(_))
    ));
    assert_eq!(harness.members("zcash:blocksPending").await.len(), 2);
    assert!(harness.members("zcash:blocksDuplicate").await.is_empty());
}

fn valid_block(hash: &str, height: u64) -> Result<BlockInfo, CoinRpcError> {
    Ok(BlockInfo {
        hash: hash.to_string(),
        height: Some(height),
        confirmations: 40,
    })
}

#[tokio::test]
async fn test_two_valid_duplicates_keep_earliest() {
    let harness = Harness::new();
    let earliest = "a500:ta500:500:t1a:1";
    let later = "c500:tc500:500:t1s:2";
    harness
        .seed(vec![
            pending(earliest, false),
            pending(later, true),
            hset("zcash:shares:round500", "t1a", "10"),
            hset("zcash:shares:round500:solo", "t1s", "1"),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_blocks()
        .withf(|hashes| hashes == &vec!["a500".to_string(), "c500".to_string()])
        .times(1)
        .returning(|_| Ok(vec![valid_block("a500", 500), valid_block("c500", 500)]));
    daemon
        .expect_get_transactions()
        .withf(|txids| txids == &vec!["ta500".to_string()])
        .times(1)
        .returning(|_| Ok(vec![Ok(wallet_tx("immature", 2.0, 40))]));
    daemon.expect_send_many().never();

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(
        harness.members("zcash:blocksPending").await,
        vec![earliest.to_string()]
    );
    assert!(harness.members("zcash:blocksPending:solo").await.is_empty());
    assert_eq!(
        harness.members("zcash:blocksDuplicate:solo").await,
        vec![later.to_string()]
    );
    assert!(harness.members("zcash:blocksDuplicate").await.is_empty());
    assert_eq!(harness.hash("zcash:immature").await["t1a"], "200000000");
    assert!(harness.hash("zcash:immature:solo").await.is_empty());
}

#[tokio::test]
async fn test_unanswered_duplicate_holds_whole_height() {
    let harness = Harness::new();
    let first = "a500:ta500:500:t1a:1";
    let second = "b500:tb500:500:t1a:2";
    seed_prop_round(&harness).await;
    harness
        .seed(vec![
            pending(first, false),
            pending(second, false),
            hset("zcash:shares:round500", "t1a", "10"),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon.expect_get_blocks().times(1).returning(|_| {
        Ok(vec![
            valid_block("a500", 500),
            Err(CoinRpcError::RpcError {
                code: -1,
                message: "database busy".to_string(),
            }),
        ])
    });
    daemon
        .expect_get_transactions()
        .withf(|txids| txids == &vec!["tx1000".to_string()])
        .times(1)
        .returning(|_| Ok(vec![Ok(wallet_tx("generate", 10.0, 120))]));
    daemon
        .expect_list_unspent()
        .returning(|_, _| Ok(unspent(50.0)));
    daemon
        .expect_send_many()
        .withf(|amounts, _| amounts.len() == 2 && amounts["t1a"] == coins("7"))
        .times(1)
        .returning(|_, _| Ok(Some("txid1".to_string())));

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    let mut still_pending = harness.members("zcash:blocksPending").await;
    still_pending.sort();
    assert_eq!(still_pending, vec![first.to_string(), second.to_string()]);
    assert!(harness.members("zcash:blocksDuplicate").await.is_empty());
    assert_eq!(
        harness.members("zcash:blocksConfirmed").await,
        vec![ROUND_1000.to_string()]
    );
    assert_eq!(harness.hash("zcash:shares:round500").await["t1a"], "10");
}

#[tokio::test]
async fn test_failed_round_does_not_block_others() {
    let harness = Harness::new();
    let unreadable = "bh1100:tx1100:1100:t1c:1700000001000";
    let unanswered = "bh1200:tx1200:1200:t1c:1700000002000";
    seed_prop_round(&harness).await;
    harness
        .seed(vec![
            pending(unreadable, false),
            pending(unanswered, false),
            hset("zcash:shares:round1100", "t1c", "0"),
            hset("zcash:shares:round1200", "t1c", "40"),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon.expect_get_transactions().times(1).returning(|_| {
        Ok(vec![
            Ok(wallet_tx("generate", 10.0, 120)),
            Ok(wallet_tx("generate", 5.0, 110)),
            Err(CoinRpcError::RpcError {
                code: -1,
                message: "wallet locked".to_string(),
            }),
        ])
    });
    daemon
        .expect_list_unspent()
        .returning(|_, _| Ok(unspent(50.0)));
    daemon
        .expect_send_many()
        .withf(|amounts, _| {
            amounts.len() == 2 && amounts["t1a"] == coins("7") && amounts["t1b"] == coins("3")
        })
        .times(1)
        .returning(|_, _| Ok(Some("txid1".to_string())));

    let outcome = harness.processor(daemon).run_cycle().await;
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("cycle did not complete: {outcome:?}");
    };
    assert_eq!(summary.paid_rounds, 1);
    assert_eq!(
        harness.members("zcash:blocksConfirmed").await,
        vec![ROUND_1000.to_string()]
    );
    let mut still_pending = harness.members("zcash:blocksPending").await;
    still_pending.sort();
    assert_eq!(
        still_pending,
        vec![unreadable.to_string(), unanswered.to_string()]
    );
    assert!(harness.members("zcash:blocksKicked").await.is_empty());
    assert_eq!(harness.hash("zcash:shares:round1100").await["t1c"], "0");
    assert_eq!(harness.hash("zcash:shares:round1200").await["t1c"], "40");
    assert!(!harness.hash("zcash:payouts").await.contains_key("t1c"));
}

#[tokio::test]
async fn test_orphaned_round_returns_shares_to_current_round() {
    let harness = Harness::new();
    let member = "bh600:tx600:600:t1a:1";
    harness
        .seed(vec![
            pending(member, false),
            hset("zcash:shares:round600", "t1a", "5"),
            hset("zcash:shares:times600", "t1a", "100"),
            hset("zcash:shares:roundCurrent", "t1a", "2"),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_transactions()
        .returning(|_| Ok(vec![Ok(wallet_tx("orphan", 3.0, -1))]));
    daemon.expect_list_unspent().never();
    daemon.expect_send_many().never();

    let outcome = harness.processor(daemon).run_cycle().await;
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("cycle did not complete: {outcome:?}");
    };
    assert_eq!(summary.txid, None);
    assert_eq!(
        harness.members("zcash:blocksKicked").await,
        vec![member.to_string()]
    );
    assert_eq!(
        coins(&harness.hash("zcash:shares:roundCurrent").await["t1a"]),
        coins("7")
    );
    assert!(harness.hash("zcash:shares:round600").await.is_empty());
    assert!(harness.hash("zcash:shares:times600").await.is_empty());
    assert_eq!(
        harness.members("zcash:ledgerBatches").await,
        vec![format!("cycle-{NOW}")]
    );
}

#[tokio::test]
async fn test_unknown_transaction_is_kicked_keeping_nothing_paid() {
    let harness = Harness::new();
    let member = "bh700:tx700:700:t1a:1";
    harness.seed(vec![pending(member, false)]).await;

    let mut daemon = MockCoinDaemon::new();
    daemon.expect_get_transactions().returning(|_| {
        Ok(vec![Err(CoinRpcError::RpcError {
            code: -5,
            message: "Invalid or non-wallet transaction id".to_string(),
        })])
    });
    daemon.expect_send_many().never();

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(
        harness.members("zcash:blocksKicked").await,
        vec![member.to_string()]
    );
    assert!(harness.members("zcash:blocksPending").await.is_empty());
}

#[tokio::test]
async fn test_pool_round_without_shares_is_kicked() {
    let harness = Harness::new();
    harness.seed(vec![pending(ROUND_1000, false)]).await;

    let mut daemon = MockCoinDaemon::new();
    expect_generate_round(&mut daemon);
    daemon.expect_send_many().never();

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(
        harness.members("zcash:blocksKicked").await,
        vec![ROUND_1000.to_string()]
    );
    assert!(harness.hash("zcash:payouts").await.is_empty());
}

#[tokio::test]
async fn test_below_minimum_is_carried_in_balance() {
    let harness = Harness::new();
    harness
        .seed(vec![
            pending(ROUND_1000, false),
            hset("zcash:shares:round1000", "t1a.rig", "1"),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_transactions()
        .returning(|_| Ok(vec![Ok(wallet_tx("generate", 0.005, 120))]));
    daemon
        .expect_list_unspent()
        .returning(|_, _| Ok(unspent(1.0)));
    daemon.expect_send_many().never();

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(
        coins(&harness.hash("zcash:balances").await["t1a.rig"]),
        coins("0.005")
    );
    assert!(harness.hash("zcash:payouts").await.is_empty());
    assert_eq!(
        harness.members("zcash:blocksConfirmed").await,
        vec![ROUND_1000.to_string()]
    );
}

#[tokio::test]
async fn test_carried_balance_paid_once_above_minimum() {
    let harness = Harness::new();
    harness
        .seed(vec![hset("zcash:balances", "t1a.rig", "0.5")])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_list_unspent()
        .returning(|_, _| Ok(unspent(1.0)));
    daemon
        .expect_send_many()
        .withf(|amounts, _| amounts["t1a"] == coins("0.5"))
        .times(1)
        .returning(|_, _| Ok(Some("txid3".to_string())));

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(coins(&harness.hash("zcash:balances").await["t1a.rig"]), Decimal::ZERO);
    assert_eq!(
        coins(&harness.hash("zcash:payouts").await["t1a.rig"]),
        coins("0.5")
    );
}

#[tokio::test]
async fn test_short_wallet_holds_rounds_as_immature() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_transactions()
        .returning(|_| Ok(vec![Ok(wallet_tx("generate", 10.0, 120))]));
    daemon
        .expect_list_unspent()
        .returning(|_, _| Ok(unspent(1.0)));
    daemon.expect_send_many().never();

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(
        harness.members("zcash:blocksPending").await,
        vec![ROUND_1000.to_string()]
    );
    let immature = harness.hash("zcash:immature").await;
    assert_eq!(immature["t1a.rig"], "700000000");
    assert_eq!(immature["t1b"], "300000000");
    assert_eq!(harness.hash("zcash:shares:round1000").await.len(), 2);
}

#[tokio::test]
async fn test_pplnt_immature_estimate_holds_back_fee_reserve() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_transactions()
        .returning(|_| Ok(vec![Ok(wallet_tx("immature", 10.0, 20))]));
    daemon.expect_list_unspent().never();

    let processor = harness.processor_with(daemon, PaymentMode::Pplnt, harness.ledger.clone());
    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");

    let immature = harness.hash("zcash:immature").await;
    let total: i64 = immature.values().map(|v| v.parse::<i64>().unwrap()).sum();
    assert!(total <= 999_960_000);
    assert_eq!(harness.hash("zcash:blocksPendingConfirms").await["bh1000"], "20");
    assert!(harness.members("zcash:ledgerBatches").await.is_empty());
}

#[tokio::test]
async fn test_daemon_outage_aborts_cycle() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_transactions()
        .returning(|_| Err(CoinRpcError::Timeout("no answer".to_string())));

    let outcome = harness.processor(daemon).run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Aborted(PaymentError::TransientDaemon(_))
    ));
}

#[tokio::test]
async fn test_idle_ledger_makes_no_daemon_calls() {
    let harness = Harness::new();
    let daemon = MockCoinDaemon::new();
    let outcome = harness.processor(daemon).run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Completed(CycleSummary::default()));
}

/// Reads from the real ledger, refuses every write.
struct ReadOnlyLedger(Arc<RocksLedger>);

#[async_trait]
impl LedgerStore for ReadOnlyLedger {
    async fn read_atomic(
        &self,
        queries: Vec<LedgerQuery>,
    ) -> Result<Vec<crate::store::LedgerReply>, StoreError> {
        self.0.read_atomic(queries).await
    }

    async fn apply_atomic(&self, _batch: &LedgerBatch) -> Result<BatchOutcome, StoreError> {
        Err(StoreError::Connection("connection reset".to_string()))
    }

    async fn sorted_set_members(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        self.0.sorted_set_members(key).await
    }
}

#[tokio::test]
async fn test_commit_failure_after_transfer_writes_recovery_file() {
    let harness = Harness::new();
    seed_prop_round(&harness).await;

    let mut daemon = MockCoinDaemon::new();
    expect_generate_round(&mut daemon);
    daemon
        .expect_send_many()
        .times(1)
        .returning(|_, _| Ok(Some("txid4".to_string())));

    let processor = harness.processor_with(
        daemon,
        PaymentMode::Prop,
        Arc::new(ReadOnlyLedger(harness.ledger.clone())),
    );
    let outcome = processor.run_cycle().await;
    let CycleOutcome::Halted(PaymentError::FatalPayoutAmbiguity {
        txid,
        recovery_file: Some(path),
        ..
    }) = outcome
    else {
        panic!("expected a halt with a recovery file: {outcome:?}");
    };
    assert_eq!(txid.as_deref(), Some("txid4"));
    assert!(path.ends_with(format!("zcash_ledger_recovery_{NOW}.json")));
    assert!(harness.hash("zcash:payouts").await.is_empty());

    let batch = recovery::load(&path).unwrap();
    assert_eq!(
        batch.guard,
        Some(BatchGuard {
            key: "zcash:ledgerBatches".to_string(),
            id: "txid4".to_string(),
        })
    );
    assert_eq!(
        recovery::replay(harness.ledger.as_ref(), &path).await.unwrap(),
        BatchOutcome::Applied
    );
    assert_eq!(
        recovery::replay(harness.ledger.as_ref(), &path).await.unwrap(),
        BatchOutcome::AlreadyApplied
    );
    let payouts = harness.hash("zcash:payouts").await;
    assert_eq!(coins(&payouts["t1a.rig"]), coins("7"));
    assert_eq!(
        harness.members("zcash:blocksConfirmed").await,
        vec![ROUND_1000.to_string()]
    );
}

#[tokio::test]
async fn test_commit_failure_without_transfer_aborts() {
    let harness = Harness::new();
    harness
        .seed(vec![
            pending("bh600:tx600:600:t1a:1", false),
            hset("zcash:shares:round600", "t1a", "5"),
        ])
        .await;

    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_get_transactions()
        .returning(|_| Ok(vec![Ok(wallet_tx("orphan", 3.0, -1))]));

    let processor = harness.processor_with(
        daemon,
        PaymentMode::Prop,
        Arc::new(ReadOnlyLedger(harness.ledger.clone())),
    );
    let outcome = processor.run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Aborted(PaymentError::LedgerWrite(_))
    ));
    assert!(!harness.dir.path().join("recovery").exists());
}

fn pool_config(harness: &Harness) -> PoolConfig {
    PoolConfig {
        address: "t1pool".to_string(),
        t_address: None,
        z_address: None,
        btc_over_17: false,
        coin: CoinConfig {
            name: "zcash".to_string(),
            symbol: "ZEC".to_string(),
            algorithm: None,
            block_time: None,
            txfee: 0.0004,
            require_shielding: false,
            get_info: false,
        },
        daemon: CoinRpcConfig {
            url: "http://127.0.0.1:8232".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            timeout_secs: 30,
        },
        ledger: LedgerConfig::Rocksdb(RocksdbConfig {
            path: harness.dir.path().join("ledger").display().to_string(),
        }),
        payment_processing: serde_json::from_value::<PaymentProcessingConfig>(json!({
            "minimum_payment": 0.01
        }))
        .unwrap(),
    }
}

#[tokio::test]
async fn test_setup_detects_precision() {
    let harness = Harness::new();
    let mut daemon = MockCoinDaemon::new();
    daemon
        .expect_validate_address()
        .withf(|address| address == "t1pool")
        .returning(|_| Ok(true));
    daemon
        .expect_get_balance_raw()
        .returning(|| Ok("12.34000000".to_string()));

    let processor = PaymentProcessor::setup(
        &pool_config(&harness),
        Arc::new(daemon),
        harness.ledger.clone(),
        harness.clock.clone(),
    )
    .await
    .unwrap();
    assert_eq!(processor.settings().units.precision(), 8);
    assert_eq!(processor.settings().minimum_payment, 1_000_000);
    assert_eq!(processor.settings().fee_reserve, 40_000);
    assert_eq!(processor.settings().min_conf, 10);
}

#[tokio::test]
async fn test_setup_rejects_balance_without_decimals() {
    let harness = Harness::new();
    let mut daemon = MockCoinDaemon::new();
    daemon.expect_validate_address().returning(|_| Ok(true));
    daemon
        .expect_get_balance_raw()
        .times(1)
        .returning(|| Ok("0".to_string()));

    let result = PaymentProcessor::setup(
        &pool_config(&harness),
        Arc::new(daemon),
        harness.ledger.clone(),
        harness.clock.clone(),
    )
    .await;
    assert!(matches!(result, Err(PaymentError::Configuration(_))));
}

#[tokio::test]
async fn test_setup_rejects_invalid_pool_address() {
    let harness = Harness::new();
    let mut daemon = MockCoinDaemon::new();
    daemon.expect_validate_address().returning(|_| Ok(false));
    daemon.expect_get_balance_raw().never();

    let result = PaymentProcessor::setup(
        &pool_config(&harness),
        Arc::new(daemon),
        harness.ledger.clone(),
        harness.clock.clone(),
    )
    .await;
    assert!(matches!(result, Err(PaymentError::Configuration(_))));
}

#[tokio::test]
async fn test_setup_checks_shielding_addresses() {
    let harness = Harness::new();
    let mut pool = pool_config(&harness);
    pool.coin.require_shielding = true;
    pool.t_address = Some("t1shield".to_string());
    pool.z_address = Some("zs1shield".to_string());

    let mut daemon = MockCoinDaemon::new();
    daemon.expect_validate_address().returning(|_| Ok(true));
    daemon
        .expect_z_validate_address()
        .withf(|address| address == "zs1shield")
        .returning(|_| {
            Err(CoinRpcError::RpcError {
                code: -5,
                message: "Invalid address".to_string(),
            })
        });

    let result = PaymentProcessor::setup(
        &pool,
        Arc::new(daemon),
        harness.ledger.clone(),
        harness.clock.clone(),
    )
    .await;
    let Err(PaymentError::Configuration(ConfigurationError(message))) = result else {
        panic!("expected a configuration error");
    };
    assert!(message.contains("zs1shield"));
}
