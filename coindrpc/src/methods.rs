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

use crate::types::{
    AddressInfo, AddressValidation, BlockInfo, MiningInfo, NetworkInfo, OperationStatus,
    UnspentOutput, WalletTransaction,
};
use crate::{CoinRpcClient, CoinRpcError};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

impl CoinRpcClient {
    pub async fn validate_address(&self, address: &str) -> Result<AddressValidation, CoinRpcError> {
        self.request("validateaddress", vec![json!(address)]).await
    }

    /// Newer daemons moved wallet address checks to getaddressinfo.
    pub async fn get_address_info(&self, address: &str) -> Result<AddressInfo, CoinRpcError> {
        self.request("getaddressinfo", vec![json!(address)]).await
    }

    pub async fn z_validate_address(
        &self,
        address: &str,
    ) -> Result<AddressValidation, CoinRpcError> {
        self.request("z_validateaddress", vec![json!(address)]).await
    }

    /// Wallet balance as the exact text the daemon returned, used to detect coin precision.
    pub async fn get_balance_raw(&self) -> Result<String, CoinRpcError> {
        self.request_raw("getbalance", vec![]).await
    }

    pub async fn get_blocks(
        &self,
        hashes: &[String],
    ) -> Result<Vec<Result<BlockInfo, CoinRpcError>>, CoinRpcError> {
        let params = hashes.iter().map(|hash| vec![json!(hash)]).collect();
        self.batch_request("getblock", params).await
    }

    pub async fn get_transactions(
        &self,
        txids: &[String],
    ) -> Result<Vec<Result<WalletTransaction, CoinRpcError>>, CoinRpcError> {
        let params = txids.iter().map(|txid| vec![json!(txid)]).collect();
        self.batch_request("gettransaction", params).await
    }

    /// Unspent outputs with at least `min_conf` confirmations, optionally limited to `addresses`.
    pub async fn list_unspent(
        &self,
        min_conf: u32,
        addresses: &[String],
    ) -> Result<Vec<UnspentOutput>, CoinRpcError> {
        let mut params = vec![json!(min_conf), json!(99_999_999)];
        if !addresses.is_empty() {
            params.push(json!(addresses));
        }
        self.request("listunspent", params).await
    }

    pub async fn z_get_balance(&self, address: &str, min_conf: u32) -> Result<Value, CoinRpcError> {
        self.request("z_getbalance", vec![json!(address), json!(min_conf)])
            .await
    }

    /// Pay every address in one transaction. Returns the txid, or None
    /// when the daemon answered without one.
    pub async fn send_many(
        &self,
        amounts: &BTreeMap<String, Decimal>,
        min_conf: u32,
    ) -> Result<Option<String>, CoinRpcError> {
        let outputs: serde_json::Map<String, Value> = amounts
            .iter()
            .map(|(address, amount)| (address.clone(), decimal_to_json(amount)))
            .collect();
        debug!("sendmany to {} addresses", outputs.len());
        self.request("sendmany", vec![json!(""), Value::Object(outputs), json!(min_conf)])
            .await
    }

    /// Start an asynchronous shielded transfer. Returns the operation id.
    pub async fn z_send_many(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        min_conf: u32,
        fee: Decimal,
    ) -> Result<String, CoinRpcError> {
        let outputs = json!([{ "address": to, "amount": decimal_to_json(&amount) }]);
        self.request(
            "z_sendmany",
            vec![json!(from), outputs, json!(min_conf), decimal_to_json(&fee)],
        )
        .await
    }

    pub async fn z_get_operation_status(&self) -> Result<Vec<OperationStatus>, CoinRpcError> {
        self.request("z_getoperationstatus", vec![]).await
    }

    /// Fetch and clear finished operations.
    pub async fn z_get_operation_result(
        &self,
        operation_ids: &[String],
    ) -> Result<Vec<OperationStatus>, CoinRpcError> {
        self.request("z_getoperationresult", vec![json!(operation_ids)])
            .await
    }

    pub async fn get_mining_info(&self) -> Result<MiningInfo, CoinRpcError> {
        self.request("getmininginfo", vec![]).await
    }

    /// `getinfo` on legacy daemons, `getnetworkinfo` otherwise.
    pub async fn get_network_info(&self, legacy: bool) -> Result<NetworkInfo, CoinRpcError> {
        let method = if legacy { "getinfo" } else { "getnetworkinfo" };
        self.request(method, vec![]).await
    }
}

/// Daemons expect amounts as JSON numbers.
fn decimal_to_json(amount: &Decimal) -> Value {
    serde_json::from_str(&amount.normalize().to_string()).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_method, mock_method_error, setup_mock_coin_rpc};

    #[tokio::test]
    async fn test_send_many_serializes_amounts_as_numbers() {
        let (mock_server, config) = setup_mock_coin_rpc().await;
        mock_method(
            &mock_server,
            "sendmany",
            json!(["", {"t1alice": 1.5, "t1bob": 0.25}, 10]),
            json!("txid-1"),
        )
        .await;

        let client = CoinRpcClient::from_config(&config).unwrap();
        let mut amounts = BTreeMap::new();
        amounts.insert("t1alice".to_string(), Decimal::new(150_000_000, 8));
        amounts.insert("t1bob".to_string(), Decimal::new(25, 2));

        let txid = client.send_many(&amounts, 10).await.unwrap();
        assert_eq!(txid, Some("txid-1".to_string()));
    }

    #[tokio::test]
    async fn test_send_many_null_result_has_no_txid() {
        let (mock_server, config) = setup_mock_coin_rpc().await;
        mock_method(&mock_server, "sendmany", json!(["", {"t1alice": 1}, 1]), json!(null)).await;

        let client = CoinRpcClient::from_config(&config).unwrap();
        let mut amounts = BTreeMap::new();
        amounts.insert("t1alice".to_string(), Decimal::ONE);

        assert_eq!(client.send_many(&amounts, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_unspent_with_address_filter() {
        let (mock_server, config) = setup_mock_coin_rpc().await;
        mock_method(
            &mock_server,
            "listunspent",
            json!([10, 99_999_999, ["t1pool"]]),
            json!([{"txid": "aa", "address": "t1pool", "amount": 2.5, "confirmations": 12}]),
        )
        .await;

        let client = CoinRpcClient::from_config(&config).unwrap();
        let unspent = client
            .list_unspent(10, &["t1pool".to_string()])
            .await
            .unwrap();

        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].address.as_deref(), Some("t1pool"));
    }

    #[tokio::test]
    async fn test_validate_address_rpc_error() {
        let (mock_server, config) = setup_mock_coin_rpc().await;
        mock_method_error(
            &mock_server,
            "validateaddress",
            json!(["nonsense"]),
            -5,
            "Invalid address",
        )
        .await;

        let client = CoinRpcClient::from_config(&config).unwrap();
        let err = client.validate_address("nonsense").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_network_info_uses_legacy_method() {
        let (mock_server, config) = setup_mock_coin_rpc().await;
        mock_method(
            &mock_server,
            "getinfo",
            json!([]),
            json!({"connections": 8, "version": 4000000, "protocolversion": 170013}),
        )
        .await;

        let client = CoinRpcClient::from_config(&config).unwrap();
        let info = client.get_network_info(true).await.unwrap();
        assert_eq!(info.connections, Some(8));
        assert_eq!(info.subversion, None);
    }

    #[test]
    fn test_decimal_to_json_drops_trailing_zeros() {
        assert_eq!(decimal_to_json(&Decimal::new(150_000_000, 8)), json!(1.5));
        assert_eq!(decimal_to_json(&Decimal::new(1, 8)), json!(0.00000001));
    }
}
