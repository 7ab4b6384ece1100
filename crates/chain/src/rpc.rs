// Copyright (C) 2015-2025 The Neo Project.
//
// rpc.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! JSON-RPC client with an endpoint pool.
//!
//! Transport failures rotate to the next configured endpoint; JSON-RPC
//! errors are semantic answers from the node and do not fail over.

use crate::error::ChainError;
use crate::models::{BlockSummary, RpcApplicationLog, RpcInvokeResult};
use crate::ChainClient;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nsl_core::{UInt160, UInt256};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Error code Neo nodes return for unknown transactions and logs.
const RPC_UNKNOWN_ITEM: i64 = -100;

pub struct NeoRpcClient {
    endpoints: Vec<Url>,
    http: reqwest::Client,
    /// Index of the endpoint that last answered; rotation starts here.
    cursor: AtomicUsize,
}

impl NeoRpcClient {
    pub fn new(endpoints: &[String], timeout: Duration) -> Result<Self, ChainError> {
        if endpoints.is_empty() {
            return Err(ChainError::Transport("no rpc endpoints".into()));
        }
        let parsed = endpoints
            .iter()
            .map(|e| Url::parse(e).map_err(|err| ChainError::Transport(format!("{e}: {err}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        Ok(Self {
            endpoints: parsed,
            http,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Sends one JSON-RPC request, rotating endpoints on transport
    /// failure.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let count = self.endpoints.len();
        let start = self.cursor.load(Ordering::Relaxed) % count;
        let mut last = String::new();

        for offset in 0..count {
            let index = (start + offset) % count;
            let endpoint = &self.endpoints[index];
            match self.call_endpoint(endpoint, method, &params).await {
                Ok(result) => {
                    self.cursor.store(index, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(ChainError::Transport(message)) => {
                    warn!(method, endpoint = %endpoint, error = %message, "rpc endpoint failed, rotating");
                    last = message;
                }
                Err(other) => return Err(other),
            }
        }

        Err(ChainError::AllEndpointsFailed { last })
    }

    async fn call_endpoint(
        &self,
        endpoint: &Url,
        method: &str,
        params: &Value,
    ) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!("http status {status}")));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Transport(format!("malformed rpc body: {e}")))?;

        if let Some(error) = envelope.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ChainError::Rpc { code, message });
        }

        debug!(method, "rpc request finished");
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Decode("response without result".into()))
    }
}

#[async_trait]
impl ChainClient for NeoRpcClient {
    async fn block_count(&self) -> Result<u32, ChainError> {
        let result = self.call("getblockcount", json!([])).await?;
        result
            .as_u64()
            .map(|n| n as u32)
            .ok_or_else(|| ChainError::Decode("getblockcount: expected number".into()))
    }

    async fn block_hash(&self, index: u32) -> Result<UInt256, ChainError> {
        let result = self.call("getblockhash", json!([index])).await?;
        let hash = result
            .as_str()
            .ok_or_else(|| ChainError::Decode("getblockhash: expected string".into()))?;
        UInt256::parse(hash).map_err(|e| ChainError::Decode(e.to_string()))
    }

    async fn block_summary(&self, index: u32) -> Result<BlockSummary, ChainError> {
        let result = self.call("getblock", json!([index, true])).await?;
        BlockSummary::from_json(&result)
    }

    async fn application_log(
        &self,
        tx_hash: &UInt256,
    ) -> Result<Option<RpcApplicationLog>, ChainError> {
        let result = self
            .call("getapplicationlog", json!([tx_hash.to_string()]))
            .await;
        match result {
            Ok(value) => Ok(Some(RpcApplicationLog::from_json(&value)?)),
            Err(ChainError::Rpc { code, message })
                if code == RPC_UNKNOWN_ITEM
                    || message.to_ascii_lowercase().contains("unknown transaction") =>
            {
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    async fn invoke_script(
        &self,
        script: &[u8],
        signer: Option<UInt160>,
    ) -> Result<RpcInvokeResult, ChainError> {
        let mut params = vec![json!(BASE64.encode(script))];
        if let Some(account) = signer {
            params.push(json!([{
                "account": account.to_string(),
                "scopes": "CalledByEntry",
            }]));
        }
        let result = self.call("invokescript", Value::Array(params)).await?;
        RpcInvokeResult::from_json(&result)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<UInt256, ChainError> {
        let result = self
            .call("sendrawtransaction", json!([BASE64.encode(raw)]))
            .await?;
        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("sendrawtransaction: expected hash".into()))?;
        UInt256::parse(hash).map_err(|e| ChainError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(urls: Vec<String>) -> NeoRpcClient {
        NeoRpcClient::new(&urls, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn block_count_parses_number() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "getblockcount"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":4242}"#)
            .create_async()
            .await;

        let count = client(vec![server.url()]).block_count().await.unwrap();
        assert_eq!(count, 4242);
    }

    #[tokio::test]
    async fn failover_rotates_to_live_endpoint() {
        let mut dead = mockito::Server::new_async().await;
        let _dead = dead
            .mock("POST", "/")
            .with_status(502)
            .create_async()
            .await;

        let mut live = mockito::Server::new_async().await;
        let _live = live
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":7}"#)
            .expect(2)
            .create_async()
            .await;

        let client = client(vec![dead.url(), live.url()]);
        assert_eq!(client.block_count().await.unwrap(), 7);
        // The cursor sticks to the endpoint that answered.
        assert_eq!(client.block_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn rpc_error_does_not_fail_over() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid params"}}"#)
            .create_async()
            .await;

        let err = client(vec![server.url()]).block_count().await.unwrap_err();
        assert!(matches!(err, ChainError::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn unknown_application_log_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":-100,"message":"Unknown transaction/blockhash"}}"#,
            )
            .create_async()
            .await;

        let log = client(vec![server.url()])
            .application_log(&UInt256::zero())
            .await
            .unwrap();
        assert!(log.is_none());
    }

    #[tokio::test]
    async fn invoke_script_sends_signer_scope() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(json!({
                "method": "invokescript",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"state":"HALT","gasconsumed":"1010","exception":null,"stack":[]}}"#,
            )
            .create_async()
            .await;

        let result = client(vec![server.url()])
            .invoke_script(&[0x21], Some(UInt160::zero()))
            .await
            .unwrap();
        assert_eq!(result.state, crate::models::VmState::Halt);
        assert_eq!(result.gas_consumed, 1010);
    }
}
