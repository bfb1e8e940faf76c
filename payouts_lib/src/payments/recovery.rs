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

//! Recovery files for ledger batches that could not be committed after a
//! transfer went out. An operator applies them with `payouts_node replay`.

use crate::store::{BatchOutcome, LedgerBatch, LedgerStore, StoreError};
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum RecoveryError {
    Io(std::io::Error),
    Format(serde_json::Error),
    Store(StoreError),
}

impl Error for RecoveryError {}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryError::Io(e) => write!(f, "Recovery file error: {e}"),
            RecoveryError::Format(e) => write!(f, "Recovery file is not a ledger batch: {e}"),
            RecoveryError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl From<std::io::Error> for RecoveryError {
    fn from(error: std::io::Error) -> Self {
        RecoveryError::Io(error)
    }
}

impl From<serde_json::Error> for RecoveryError {
    fn from(error: serde_json::Error) -> Self {
        RecoveryError::Format(error)
    }
}

impl From<StoreError> for RecoveryError {
    fn from(error: StoreError) -> Self {
        RecoveryError::Store(error)
    }
}

pub fn recovery_file_name(coin: &str, millis: u64) -> String {
    format!("{coin}_ledger_recovery_{millis}.json")
}

/// Write `batch` to `<dir>/<coin>_ledger_recovery_<millis>.json`.
pub fn persist(
    dir: &Path,
    coin: &str,
    batch: &LedgerBatch,
    millis: u64,
) -> Result<PathBuf, RecoveryError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(recovery_file_name(coin, millis));
    fs::write(&path, serde_json::to_vec_pretty(batch)?)?;
    Ok(path)
}

pub fn load(path: &Path) -> Result<LedgerBatch, RecoveryError> {
    let contents = fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}

/// Apply a recovery file through the guarded commit path. Replaying a batch
/// that already made it into the ledger changes nothing.
pub async fn replay(ledger: &dyn LedgerStore, path: &Path) -> Result<BatchOutcome, RecoveryError> {
    let batch = load(path)?;
    Ok(ledger.apply_atomic(&batch).await?)
}
