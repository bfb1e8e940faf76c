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

use payouts_lib::config::PoolConfig;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Raw JSON result for a call, or a JSON-RPC error code and message.
pub type Answer = Result<String, (i32, String)>;

type Handler = dyn Fn(&str, &Value) -> Answer + Send + Sync;

/// Coin daemon stand-in that answers single calls and batches, echoing
/// request ids and keeping every call it saw.
#[derive(Clone)]
pub struct StubDaemon {
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl StubDaemon {
    pub async fn start<F>(handler: F) -> (MockServer, Self)
    where
        F: Fn(&str, &Value) -> Answer + Send + Sync + 'static,
    {
        let stub = Self {
            handler: Arc::new(handler),
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let server = MockServer::builder().start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(stub.clone())
            .mount(&server)
            .await;
        (server, stub)
    }

    /// Params of every call made to `rpc_method`, in order.
    pub fn calls_to(&self, rpc_method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == rpc_method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    fn answer(&self, call: &Value) -> String {
        let name = call["method"].as_str().unwrap_or_default().to_string();
        let params = call["params"].clone();
        let id = call["id"].clone();
        let answer = (self.handler)(&name, &params);
        self.calls.lock().unwrap().push((name, params));
        match answer {
            Ok(raw) => format!(r#"{{"result":{raw},"error":null,"id":{id}}}"#),
            Err((code, message)) => format!(
                r#"{{"result":null,"error":{{"code":{code},"message":{}}},"id":{id}}}"#,
                Value::String(message)
            ),
        }
    }
}

impl Respond for StubDaemon {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let text = match &body {
            Value::Array(calls) => format!(
                "[{}]",
                calls
                    .iter()
                    .map(|call| self.answer(call))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            call => self.answer(call),
        };
        ResponseTemplate::new(200).set_body_raw(text, "application/json")
    }
}

/// Build a pool fixture pointed at `daemon_url` with a RocksDB ledger at
/// `ledger_path`.
/// WARNING: This is a test fixture and should not be used anywhere else.
pub fn test_pool_config(daemon_url: &str, ledger_path: &str, recovery_dir: &str) -> PoolConfig {
    let toml = format!(
        r#"
        address = "t1pool"
        [coin]
        name = "zcash"
        symbol = "ZEC"
        [daemon]
        url = "{daemon_url}"
        username = "testuser"
        password = "testpass"
        timeout_secs = 5
        [ledger]
        backend = "rocksdb"
        path = "{ledger_path}"
        [payment_processing]
        payment_mode = "prop"
        minimum_payment = 0.01
        min_conf = 10
        recovery_dir = "{recovery_dir}"
        "#
    );
    config::Config::builder()
        .add_source(config::File::from_str(&toml, config::FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}
