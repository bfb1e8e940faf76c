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

//! The seam between the payment pipeline and the coin daemon.

use async_trait::async_trait;
use coindrpc::{
    BlockInfo, CoinRpcClient, CoinRpcError, MiningInfo, NetworkInfo, OperationStatus,
    UnspentOutput, WalletTransaction,
};
#[cfg(test)]
use mockall::automock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Result of one call inside a batch.
pub type CallResult<T> = Result<T, CoinRpcError>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoinDaemon: Send + Sync {
    /// `validateaddress`, true when the daemon reports the address valid.
    async fn validate_address(&self, address: &str) -> Result<bool, CoinRpcError>;

    /// `getaddressinfo`, false when the daemon flags the address invalid.
    async fn address_info_valid(&self, address: &str) -> Result<bool, CoinRpcError>;

    async fn z_validate_address(&self, address: &str) -> Result<bool, CoinRpcError>;

    /// Raw text of the wallet balance.
    async fn get_balance_raw(&self) -> Result<String, CoinRpcError>;

    async fn get_blocks(
        &self,
        hashes: Vec<String>,
    ) -> Result<Vec<CallResult<BlockInfo>>, CoinRpcError>;

    async fn get_transactions(
        &self,
        txids: Vec<String>,
    ) -> Result<Vec<CallResult<WalletTransaction>>, CoinRpcError>;

    async fn list_unspent(
        &self,
        min_conf: u32,
        addresses: Vec<String>,
    ) -> Result<Vec<UnspentOutput>, CoinRpcError>;

    async fn z_get_balance(
        &self,
        address: &str,
        min_conf: u32,
    ) -> Result<serde_json::Value, CoinRpcError>;

    async fn send_many(
        &self,
        amounts: BTreeMap<String, Decimal>,
        min_conf: u32,
    ) -> Result<Option<String>, CoinRpcError>;

    async fn z_send_many(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        min_conf: u32,
        fee: Decimal,
    ) -> Result<String, CoinRpcError>;

    async fn z_get_operation_status(&self) -> Result<Vec<OperationStatus>, CoinRpcError>;

    async fn z_get_operation_result(
        &self,
        operation_ids: Vec<String>,
    ) -> Result<Vec<OperationStatus>, CoinRpcError>;

    async fn get_mining_info(&self) -> Result<MiningInfo, CoinRpcError>;

    async fn get_network_info(&self, legacy: bool) -> Result<NetworkInfo, CoinRpcError>;
}

#[async_trait]
impl CoinDaemon for CoinRpcClient {
    async fn validate_address(&self, address: &str) -> Result<bool, CoinRpcError> {
        Ok(CoinRpcClient::validate_address(self, address).await?.isvalid)
    }

    async fn address_info_valid(&self, address: &str) -> Result<bool, CoinRpcError> {
        Ok(self.get_address_info(address).await?.is_valid())
    }

    async fn z_validate_address(&self, address: &str) -> Result<bool, CoinRpcError> {
        Ok(CoinRpcClient::z_validate_address(self, address).await?.isvalid)
    }

    async fn get_balance_raw(&self) -> Result<String, CoinRpcError> {
        CoinRpcClient::get_balance_raw(self).await
    }

    async fn get_blocks(
        &self,
        hashes: Vec<String>,
    ) -> Result<Vec<CallResult<BlockInfo>>, CoinRpcError> {
        CoinRpcClient::get_blocks(self, &hashes).await
    }

    async fn get_transactions(
        &self,
        txids: Vec<String>,
    ) -> Result<Vec<CallResult<WalletTransaction>>, CoinRpcError> {
        CoinRpcClient::get_transactions(self, &txids).await
    }

    async fn list_unspent(
        &self,
        min_conf: u32,
        addresses: Vec<String>,
    ) -> Result<Vec<UnspentOutput>, CoinRpcError> {
        CoinRpcClient::list_unspent(self, min_conf, &addresses).await
    }

    async fn z_get_balance(
        &self,
        address: &str,
        min_conf: u32,
    ) -> Result<serde_json::Value, CoinRpcError> {
        CoinRpcClient::z_get_balance(self, address, min_conf).await
    }

    async fn send_many(
        &self,
        amounts: BTreeMap<String, Decimal>,
        min_conf: u32,
    ) -> Result<Option<String>, CoinRpcError> {
        CoinRpcClient::send_many(self, &amounts, min_conf).await
    }

    async fn z_send_many(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        min_conf: u32,
        fee: Decimal,
    ) -> Result<String, CoinRpcError> {
        CoinRpcClient::z_send_many(self, from, to, amount, min_conf, fee).await
    }

    async fn z_get_operation_status(&self) -> Result<Vec<OperationStatus>, CoinRpcError> {
        CoinRpcClient::z_get_operation_status(self).await
    }

    async fn z_get_operation_result(
        &self,
        operation_ids: Vec<String>,
    ) -> Result<Vec<OperationStatus>, CoinRpcError> {
        CoinRpcClient::z_get_operation_result(self, &operation_ids).await
    }

    async fn get_mining_info(&self) -> Result<MiningInfo, CoinRpcError> {
        CoinRpcClient::get_mining_info(self).await
    }

    async fn get_network_info(&self, legacy: bool) -> Result<NetworkInfo, CoinRpcError> {
        CoinRpcClient::get_network_info(self, legacy).await
    }
}
