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

use super::column_families::ColumnFamily;
use super::{
    BatchOutcome, LedgerBatch, LedgerCommand, LedgerQuery, LedgerReply, LedgerStore, StoreError,
};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options as RocksDbOptions, WriteBatch,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

const SEPARATOR: u8 = 0;

/// An embedded ledger on RocksDB.
///
/// Hashes, sets and sorted sets live in their own column families keyed by
/// `key\0field`. Reads use a snapshot, so a multi key read sees one point in
/// time. Writes are serialized by `write_lock` and land in a single
/// `WriteBatch`, which makes a ledger batch all-or-nothing.
pub struct RocksLedger {
    path: String,
    db: DB,
    write_lock: Mutex<()>,
}

fn composite_key(key: &str, field: &str) -> Vec<u8> {
    let mut composite = Vec::with_capacity(key.len() + field.len() + 1);
    composite.extend_from_slice(key.as_bytes());
    composite.push(SEPARATOR);
    composite.extend_from_slice(field.as_bytes());
    composite
}

fn key_prefix(key: &str) -> Vec<u8> {
    let mut prefix = key.as_bytes().to_vec();
    prefix.push(SEPARATOR);
    prefix
}

fn field_of(composite: &[u8], prefix_len: usize) -> Result<String, StoreError> {
    String::from_utf8(composite[prefix_len..].to_vec())
        .map_err(|e| StoreError::Corrupt(format!("Non utf8 field: {e}")))
}

type Overlay = HashMap<(ColumnFamily, Vec<u8>), Option<Vec<u8>>>;

impl RocksLedger {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let cfs: Vec<ColumnFamilyDescriptor> = ColumnFamily::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(*cf, RocksDbOptions::default()))
            .collect();

        let mut db_options = RocksDbOptions::default();
        db_options.create_if_missing(true);
        db_options.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&db_options, path, cfs)?;
        debug!("Opened ledger database at {}", path);
        Ok(Self {
            path: path.to_string(),
            db,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn cf(&self, cf: ColumnFamily) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(cf.as_str())
            .ok_or_else(|| StoreError::Database(format!("Missing column family {}", cf.as_str())))
    }

    /// Composite keys and values under `key` in one column family.
    fn scan(
        &self,
        snapshot: Option<&rocksdb::Snapshot<'_>>,
        cf: ColumnFamily,
        key: &str,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let handle = self.cf(cf)?;
        let prefix = key_prefix(key);
        let mode = IteratorMode::From(&prefix, Direction::Forward);
        let iter = match snapshot {
            Some(snapshot) => snapshot.iterator_cf(handle, mode),
            None => self.db.iterator_cf(handle, mode),
        };
        let mut entries = Vec::new();
        for item in iter {
            let (composite, value) = item?;
            if !composite.starts_with(&prefix) {
                break;
            }
            entries.push((composite.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn read_value(
        &self,
        overlay: &Overlay,
        cf: ColumnFamily,
        composite: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(pending) = overlay.get(&(cf, composite.to_vec())) {
            return Ok(pending.clone());
        }
        Ok(self.db.get_cf(self.cf(cf)?, composite)?)
    }

    fn apply_command(
        &self,
        overlay: &mut Overlay,
        command: &LedgerCommand,
    ) -> Result<(), StoreError> {
        match command {
            LedgerCommand::HashIncrByFloat {
                key,
                field,
                increment,
            } => {
                let composite = composite_key(key, field);
                let current = match self.read_value(overlay, ColumnFamily::Hash, &composite)? {
                    Some(bytes) => {
                        let text = String::from_utf8(bytes)
                            .map_err(|e| StoreError::Corrupt(format!("{key} {field}: {e}")))?;
                        Decimal::from_str(&text).map_err(|e| {
                            StoreError::Corrupt(format!("{key} {field} is not a number: {e}"))
                        })?
                    }
                    None => Decimal::ZERO,
                };
                let updated = (current + increment).normalize();
                overlay.insert(
                    (ColumnFamily::Hash, composite),
                    Some(updated.to_string().into_bytes()),
                );
            }
            LedgerCommand::HashSet { key, field, value } => {
                overlay.insert(
                    (ColumnFamily::Hash, composite_key(key, field)),
                    Some(value.as_bytes().to_vec()),
                );
            }
            LedgerCommand::HashDel { key, field } => {
                overlay.insert((ColumnFamily::Hash, composite_key(key, field)), None);
            }
            LedgerCommand::SetAdd { key, member } => {
                overlay.insert((ColumnFamily::Set, composite_key(key, member)), Some(Vec::new()));
            }
            LedgerCommand::SetMove {
                source,
                destination,
                member,
            } => {
                let from = composite_key(source, member);
                if self.read_value(overlay, ColumnFamily::Set, &from)?.is_some() {
                    overlay.insert((ColumnFamily::Set, from), None);
                    overlay.insert(
                        (ColumnFamily::Set, composite_key(destination, member)),
                        Some(Vec::new()),
                    );
                }
            }
            LedgerCommand::SortedSetAdd { key, score, member } => {
                overlay.insert(
                    (ColumnFamily::SortedSet, composite_key(key, member)),
                    Some(score.to_be_bytes().to_vec()),
                );
            }
            LedgerCommand::Delete { keys } => {
                for key in keys {
                    let prefix = key_prefix(key);
                    for cf in ColumnFamily::ALL {
                        for (composite, _) in self.scan(None, cf, key)? {
                            overlay.insert((cf, composite), None);
                        }
                        let staged: Vec<Vec<u8>> = overlay
                            .keys()
                            .filter(|(staged_cf, composite)| {
                                *staged_cf == cf && composite.starts_with(&prefix)
                            })
                            .map(|(_, composite)| composite.clone())
                            .collect();
                        for composite in staged {
                            overlay.insert((cf, composite), None);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RocksLedger {
    async fn read_atomic(&self, queries: Vec<LedgerQuery>) -> Result<Vec<LedgerReply>, StoreError> {
        let snapshot = self.db.snapshot();
        let mut replies = Vec::with_capacity(queries.len());
        for query in queries {
            match query {
                LedgerQuery::HashAll(key) => {
                    let prefix_len = key_prefix(&key).len();
                    let mut hash = BTreeMap::new();
                    for (composite, value) in
                        self.scan(Some(&snapshot), ColumnFamily::Hash, &key)?
                    {
                        let value = String::from_utf8(value)
                            .map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))?;
                        hash.insert(field_of(&composite, prefix_len)?, value);
                    }
                    replies.push(LedgerReply::Hash(hash));
                }
                LedgerQuery::SetMembers(key) => {
                    let prefix_len = key_prefix(&key).len();
                    let members = self
                        .scan(Some(&snapshot), ColumnFamily::Set, &key)?
                        .iter()
                        .map(|(composite, _)| field_of(composite, prefix_len))
                        .collect::<Result<Vec<_>, _>>()?;
                    replies.push(LedgerReply::Set(members));
                }
            }
        }
        Ok(replies)
    }

    async fn apply_atomic(&self, batch: &LedgerBatch) -> Result<BatchOutcome, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Database("Ledger writer lock poisoned".to_string()))?;

        let mut overlay = Overlay::new();
        if let Some(guard) = &batch.guard {
            let marker = composite_key(&guard.key, &guard.id);
            if self.read_value(&overlay, ColumnFamily::Set, &marker)?.is_some() {
                return Ok(BatchOutcome::AlreadyApplied);
            }
        }
        for command in &batch.commands {
            self.apply_command(&mut overlay, command)?;
        }
        if let Some(guard) = &batch.guard {
            overlay.insert(
                (ColumnFamily::Set, composite_key(&guard.key, &guard.id)),
                Some(Vec::new()),
            );
        }

        let mut write_batch = WriteBatch::default();
        for ((cf, composite), value) in overlay {
            let handle = self.cf(cf)?;
            match value {
                Some(value) => write_batch.put_cf(handle, composite, value),
                None => write_batch.delete_cf(handle, composite),
            }
        }
        self.db.write(write_batch)?;
        Ok(BatchOutcome::Applied)
    }

    async fn sorted_set_members(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let prefix_len = key_prefix(key).len();
        let mut members = Vec::new();
        for (composite, value) in self.scan(None, ColumnFamily::SortedSet, key)? {
            let bytes: [u8; 8] = value
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt(format!("{key}: bad score")))?;
            members.push((field_of(&composite, prefix_len)?, f64::from_be_bytes(bytes)));
        }
        members.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(members)
    }
}
