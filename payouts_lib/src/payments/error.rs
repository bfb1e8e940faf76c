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

use crate::config::ConfigurationError;
use crate::store::StoreError;
use coindrpc::CoinRpcError;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Why a payment cycle stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentError {
    /// The ledger snapshot could not be read or understood
    LedgerRead(StoreError),
    /// A ledger write failed before any funds moved
    LedgerWrite(StoreError),
    /// Daemon unreachable or a batch did not complete
    TransientDaemon(CoinRpcError),
    /// The chain state cannot be settled safely this cycle
    InvalidChainState(String),
    /// The wallet kept refusing the transfer after every withholding retry
    InsufficientFunds { attempts: u32, withheld_permille: u32 },
    /// The daemon rejected the transfer for a reason other than funds
    PayoutRejected(CoinRpcError),
    /// Funds may have moved without the ledger recording it. Stops all
    /// further cycles for the coin until an operator intervenes.
    FatalPayoutAmbiguity {
        txid: Option<String>,
        reason: String,
        recovery_file: Option<PathBuf>,
    },
    Configuration(ConfigurationError),
}

impl PaymentError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PaymentError::FatalPayoutAmbiguity { .. })
    }
}

impl Error for PaymentError {}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentError::LedgerRead(e) => write!(f, "Ledger read failed: {e}"),
            PaymentError::LedgerWrite(e) => write!(f, "Ledger write failed: {e}"),
            PaymentError::TransientDaemon(e) => write!(f, "Daemon unavailable: {e}"),
            PaymentError::InvalidChainState(msg) => write!(f, "Invalid chain state: {msg}"),
            PaymentError::InsufficientFunds {
                attempts,
                withheld_permille,
            } => write!(
                f,
                "Insufficient funds after {attempts} attempts, withholding {}%",
                f64::from(*withheld_permille) / 10.0
            ),
            PaymentError::PayoutRejected(e) => write!(f, "Payout rejected by daemon: {e}"),
            PaymentError::FatalPayoutAmbiguity {
                txid,
                reason,
                recovery_file,
            } => {
                write!(f, "Payout state ambiguous: {reason}")?;
                if let Some(txid) = txid {
                    write!(f, " (txid {txid})")?;
                }
                if let Some(path) = recovery_file {
                    write!(f, ", recovery batch at {}", path.display())?;
                }
                Ok(())
            }
            PaymentError::Configuration(e) => write!(f, "{e}"),
        }
    }
}

impl From<ConfigurationError> for PaymentError {
    fn from(error: ConfigurationError) -> Self {
        PaymentError::Configuration(error)
    }
}
