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

use crate::CoinRpcConfig;
use base64::Engine;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_USERNAME: &str = "testuser";
pub const TEST_PASSWORD: &str = "testpass";

pub async fn setup_mock_coin_rpc() -> (MockServer, CoinRpcConfig) {
    let mock_server = MockServer::start().await;

    let config = CoinRpcConfig {
        url: mock_server.uri(),
        username: TEST_USERNAME.to_string(),
        password: TEST_PASSWORD.to_string(),
        timeout_secs: 5,
    };

    (mock_server, config)
}

fn auth_header() -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{TEST_USERNAME}:{TEST_PASSWORD}"))
    )
}

/// Answer `api_method` called with exactly `params`. Request ids are not matched.
pub async fn mock_method(
    mock_server: &MockServer,
    api_method: &str,
    params: serde_json::Value,
    result: serde_json::Value,
) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("Authorization", auth_header()))
        .and(body_partial_json(serde_json::json!({
            "method": api_method,
            "params": params,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": result,
            "error": null,
            "id": 0
        })))
        .mount(mock_server)
        .await;
}

/// Fail `api_method` the way daemons do, HTTP 500 with a JSON-RPC error body.
pub async fn mock_method_error(
    mock_server: &MockServer,
    api_method: &str,
    params: serde_json::Value,
    code: i32,
    message: &str,
) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("Authorization", auth_header()))
        .and(body_partial_json(serde_json::json!({
            "method": api_method,
            "params": params,
        })))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "result": null,
            "error": {"code": code, "message": message},
            "id": 0
        })))
        .mount(mock_server)
        .await;
}
