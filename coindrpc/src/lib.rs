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

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error};

mod methods;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use types::*;

/// Wallet error code returned by sendmany when the wallet cannot cover the outputs.
pub const RPC_WALLET_INSUFFICIENT_FUNDS: i32 = -6;
/// Error code for unknown blocks, transactions and addresses.
pub const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

/// JSON-RPC 1.0 request structure (Bitcoin Core format)
#[derive(Serialize, Debug)]
struct JsonRpcRequest {
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// JSON-RPC 1.0 response structure.
/// Result is null when error is set, and also for void methods.
#[derive(Deserialize, Debug)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: Option<u64>,
}

impl JsonRpcResponse {
    fn into_result<T: DeserializeOwned>(self) -> Result<T, CoinRpcError> {
        if let Some(error) = self.error {
            return Err(CoinRpcError::RpcError {
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(self.result.unwrap_or(serde_json::Value::Null)).map_err(|e| {
            CoinRpcError::ParseError {
                message: format!("Failed to parse result: {e}"),
            }
        })
    }
}

/// Response with the result kept as the exact text the daemon sent.
#[derive(Deserialize, Debug)]
struct RawJsonRpcResponse<'a> {
    #[serde(borrow, default)]
    result: Option<&'a RawValue>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 1.0 error structure
#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i32,
    message: String,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, Clone)]
pub struct CoinRpcConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Per request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Custom Debug to redact passwords
impl fmt::Debug for CoinRpcConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CoinRpcConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Broad classification of a daemon failure, used by callers to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonErrorKind {
    /// The wallet cannot fund the requested outputs.
    InsufficientFunds,
    /// Unknown block, transaction or address.
    NotFound,
    /// The request may or may not have reached the daemon.
    Timeout,
    /// Any other failure, transport or RPC.
    Other,
}

/// Error type for the CoinRpcClient
#[derive(Debug, Clone, PartialEq)]
pub enum CoinRpcError {
    HttpError { status_code: u16, message: String },
    ParseError { message: String },
    RpcError { code: i32, message: String },
    Timeout(String),
    /// The connection failed after the request was written
    Interrupted(String),
    Other(String),
}

impl CoinRpcError {
    pub fn kind(&self) -> DaemonErrorKind {
        match self {
            CoinRpcError::RpcError { code, message }
                if *code == RPC_WALLET_INSUFFICIENT_FUNDS
                    && message.to_lowercase().contains("insufficient funds") =>
            {
                DaemonErrorKind::InsufficientFunds
            }
            CoinRpcError::RpcError { code, .. } if *code == RPC_INVALID_ADDRESS_OR_KEY => {
                DaemonErrorKind::NotFound
            }
            CoinRpcError::Timeout(_) | CoinRpcError::Interrupted(_) => DaemonErrorKind::Timeout,
            _ => DaemonErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == DaemonErrorKind::NotFound
    }
}

impl Error for CoinRpcError {}

impl fmt::Display for CoinRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinRpcError::HttpError {
                status_code,
                message,
            } => {
                write!(f, "HTTP error {status_code}: {message}")
            }
            CoinRpcError::ParseError { message } => {
                write!(f, "Parse error: {message}")
            }
            CoinRpcError::RpcError { code, message } => {
                write!(f, "RPC error {code}: {message}")
            }
            CoinRpcError::Timeout(msg) => write!(f, "Timed out: {msg}"),
            CoinRpcError::Interrupted(msg) => write!(f, "Interrupted: {msg}"),
            CoinRpcError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoinRpcClient {
    client: reqwest::Client,
    url: String,
    request_id: Arc<AtomicU64>,
}

impl CoinRpcClient {
    pub fn new(url: &str, username: &str, password: &str) -> Result<Self, CoinRpcError> {
        Self::with_timeout(
            url,
            username,
            password,
            Duration::from_secs(default_timeout_secs()),
        )
    }

    pub fn from_config(config: &CoinRpcConfig) -> Result<Self, CoinRpcError> {
        Self::with_timeout(
            &config.url,
            &config.username,
            &config.password,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn with_timeout(
        url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, CoinRpcError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!(
                "Basic {}",
                STANDARD.encode(format!("{username}:{password}"))
            )
            .parse()
            .map_err(|e| CoinRpcError::Other(format!("Invalid header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CoinRpcError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
            request_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Post a JSON body and return the response text.
    ///
    /// Daemons answer failed calls with HTTP 500 and a JSON-RPC error
    /// body, so that body is decoded before falling back to an HTTP error.
    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<String, CoinRpcError> {
        let response = match self.client.post(&self.url).json(body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(
                    "HTTP request failed to coin daemon: status={:?}, error={}",
                    e.status().map(|s| s.as_u16()),
                    e
                );
                if e.is_timeout() {
                    return Err(CoinRpcError::Timeout(format!("HTTP request timed out: {e}")));
                }
                // Only a failed connect or an unbuildable request is known not to have been sent.
                if e.is_connect() || e.is_builder() {
                    return Err(CoinRpcError::Other(format!("HTTP request failed: {e}")));
                }
                return Err(CoinRpcError::Interrupted(format!("HTTP request failed: {e}")));
            }
        };

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CoinRpcError::Timeout(format!("Reading response timed out: {e}"))
            } else {
                CoinRpcError::Interrupted(format!("Failed to read response body: {e}"))
            }
        })?;

        if !status.is_success() {
            if let Ok(JsonRpcResponse {
                error: Some(error), ..
            }) = serde_json::from_str::<JsonRpcResponse>(&text)
            {
                return Err(CoinRpcError::RpcError {
                    code: error.code,
                    message: error.message,
                });
            }
            error!(
                "Error reaching coin daemon with status={:?}. Message={:?}",
                status.as_u16(),
                text
            );
            return Err(CoinRpcError::HttpError {
                status_code: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, CoinRpcError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            method: method.to_string(),
            params,
            id,
        };
        let body = self.post(&request).await?;
        let rpc_response: JsonRpcResponse =
            serde_json::from_str(&body).map_err(|e| CoinRpcError::ParseError {
                message: format!("Failed to parse response: {e}"),
            })?;
        rpc_response.into_result()
    }

    /// Call a method and return the result exactly as the daemon formatted it.
    pub async fn request_raw(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<String, CoinRpcError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            method: method.to_string(),
            params,
            id,
        };
        let body = self.post(&request).await?;
        let rpc_response: RawJsonRpcResponse<'_> =
            serde_json::from_str(&body).map_err(|e| CoinRpcError::ParseError {
                message: format!("Failed to parse response: {e}"),
            })?;
        if let Some(error) = rpc_response.error {
            return Err(CoinRpcError::RpcError {
                code: error.code,
                message: error.message,
            });
        }
        rpc_response
            .result
            .map(|raw| raw.get().to_string())
            .ok_or_else(|| CoinRpcError::ParseError {
                message: format!("Empty result for {method}"),
            })
    }

    /// Send one JSON-RPC batch calling `method` once per params entry.
    ///
    /// The outer error means the batch as a whole failed and none of its
    /// results may be used. Inner results carry per call failures, in the
    /// order of `params`.
    pub async fn batch_request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Vec<serde_json::Value>>,
    ) -> Result<Vec<Result<T, CoinRpcError>>, CoinRpcError> {
        if params.is_empty() {
            return Ok(Vec::new());
        }
        let count = params.len() as u64;
        let first_id = self.request_id.fetch_add(count, Ordering::SeqCst);
        let requests: Vec<JsonRpcRequest> = params
            .into_iter()
            .zip(first_id..)
            .map(|(params, id)| JsonRpcRequest {
                method: method.to_string(),
                params,
                id,
            })
            .collect();
        debug!("Sending batch of {} {} calls", requests.len(), method);

        let body = self.post(&requests).await?;
        let responses: Vec<JsonRpcResponse> =
            serde_json::from_str(&body).map_err(|e| CoinRpcError::ParseError {
                message: format!("Failed to parse batch response: {e}"),
            })?;

        let mut slots: Vec<Option<Result<T, CoinRpcError>>> = (0..count).map(|_| None).collect();
        for response in responses {
            let Some(id) = response.id else {
                continue;
            };
            if id < first_id || id >= first_id + count {
                continue;
            }
            slots[(id - first_id) as usize] = Some(response.into_result());
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    CoinRpcError::ParseError {
                        message: format!("Batch response is missing {method} call {index}"),
                    }
                })
            })
            .collect()
    }
}
