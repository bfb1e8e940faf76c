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

//! The ledger store: balances, block sets and share records shared with the
//! share writer and the stats service.
//!
//! Reads of several keys happen in one atomic snapshot and writes are
//! applied as one all-or-nothing batch. Two backends implement
//! [`LedgerStore`]: Redis for deployments that share the ledger with other
//! services, and RocksDB for an embedded single process ledger.

use crate::config::LedgerConfig;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

pub mod column_families;
pub mod keys;
pub mod redis_ledger;
pub mod rocks_ledger;

pub use keys::LedgerKeys;
pub use redis_ledger::RedisLedger;
pub use rocks_ledger::RocksLedger;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Connection(String),
    Database(String),
    /// Stored data could not be interpreted
    Corrupt(String),
    /// A concurrent writer kept invalidating the batch
    Conflict(String),
}

impl Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "Ledger connection error: {msg}"),
            StoreError::Database(msg) => write!(f, "Ledger database error: {msg}"),
            StoreError::Corrupt(msg) => write!(f, "Ledger data corrupt: {msg}"),
            StoreError::Conflict(msg) => write!(f, "Ledger write conflict: {msg}"),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_connection_dropped() || error.is_connection_refusal() || error.is_timeout() {
            StoreError::Connection(error.to_string())
        } else {
            StoreError::Database(error.to_string())
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(error: rocksdb::Error) -> Self {
        StoreError::Database(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerQuery {
    HashAll(String),
    SetMembers(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerReply {
    Hash(BTreeMap<String, String>),
    Set(Vec<String>),
}

impl LedgerReply {
    pub fn into_hash(self) -> Result<BTreeMap<String, String>, StoreError> {
        match self {
            LedgerReply::Hash(hash) => Ok(hash),
            LedgerReply::Set(_) => Err(StoreError::Corrupt("expected a hash reply".to_string())),
        }
    }

    pub fn into_set(self) -> Result<Vec<String>, StoreError> {
        match self {
            LedgerReply::Set(members) => Ok(members),
            LedgerReply::Hash(_) => Err(StoreError::Corrupt("expected a set reply".to_string())),
        }
    }
}

/// One ledger mutation. Serialized as-is into recovery files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerCommand {
    HashIncrByFloat {
        key: String,
        field: String,
        #[serde(with = "rust_decimal::serde::str")]
        increment: Decimal,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    HashDel {
        key: String,
        field: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetMove {
        source: String,
        destination: String,
        member: String,
    },
    SortedSetAdd {
        key: String,
        score: f64,
        member: String,
    },
    Delete {
        keys: Vec<String>,
    },
}

/// Marks a batch as applied so that applying it again changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGuard {
    /// Set holding the ids of applied batches
    pub key: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBatch {
    #[serde(default)]
    pub guard: Option<BatchGuard>,
    pub commands: Vec<LedgerCommand>,
}

impl LedgerBatch {
    pub fn unguarded(commands: Vec<LedgerCommand>) -> Self {
        Self {
            guard: None,
            commands,
        }
    }

    pub fn guarded(guard: BatchGuard, commands: Vec<LedgerCommand>) -> Self {
        Self {
            guard: Some(guard),
            commands,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied,
    /// The guard id was already recorded, nothing was changed
    AlreadyApplied,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Run all queries against one consistent view of the ledger.
    async fn read_atomic(&self, queries: Vec<LedgerQuery>) -> Result<Vec<LedgerReply>, StoreError>;

    /// Apply every command or none of them.
    async fn apply_atomic(&self, batch: &LedgerBatch) -> Result<BatchOutcome, StoreError>;

    /// Members with scores, lowest score first.
    async fn sorted_set_members(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError>;
}

/// Opens ledgers once per backend location so pools configured with the
/// same store share one handle.
#[derive(Default)]
pub struct LedgerRegistry {
    opened: HashMap<String, Arc<dyn LedgerStore>>,
}

impl LedgerRegistry {
    pub async fn open(
        &mut self,
        config: &LedgerConfig,
    ) -> Result<Arc<dyn LedgerStore>, StoreError> {
        let location = config.location();
        if let Some(ledger) = self.opened.get(&location) {
            return Ok(ledger.clone());
        }
        let ledger: Arc<dyn LedgerStore> = match config {
            LedgerConfig::Redis(redis_config) => {
                Arc::new(RedisLedger::connect(redis_config).await?)
            }
            LedgerConfig::Rocksdb(rocks_config) => {
                Arc::new(RocksLedger::new(&rocks_config.path)?)
            }
        };
        self.opened.insert(location, ledger.clone());
        Ok(ledger)
    }
}
