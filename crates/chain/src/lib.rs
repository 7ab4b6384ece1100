// Copyright (C) 2015-2025 The Neo Project.
//
// lib.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Neo N3 chain client for the service layer.
//!
//! One [`ChainClient`] instance serves one target network. The concrete
//! [`NeoRpcClient`] speaks JSON-RPC over a pool of endpoints with failover;
//! the trait exists so the engine can run against an in-memory chain in
//! tests. Typed invocations go through [`TransactionSender`], which builds
//! the VM script, test-invokes it, assembles the transaction, and attaches
//! the single-signer witness.

pub mod error;
pub mod models;
pub mod rpc;
pub mod script;
pub mod sender;
pub mod tx;
pub mod watcher;

pub use error::{ChainError, FaultReason};
pub use models::{
    BlockSummary, RpcApplicationLog, RpcExecution, RpcInvokeResult, RpcNotification, StackValue,
    VmState,
};
pub use rpc::NeoRpcClient;
pub use script::{build_contract_call, ContractParameter, ScriptBuilder};
pub use sender::{PendingTx, TransactionSender, WitnessSigner};
pub use tx::{script_hash, single_sig_account, Transaction, TxSigner, Witness};
pub use watcher::{ChainTip, TipWatcher};

use async_trait::async_trait;
use nsl_core::{UInt160, UInt256};
use std::sync::Arc;

/// Read/submit access to one Neo N3 network.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Number of blocks in the chain (tip height + 1).
    async fn block_count(&self) -> Result<u32, ChainError>;

    /// Hash of the block at `index`.
    async fn block_hash(&self, index: u32) -> Result<UInt256, ChainError>;

    /// Header fields plus the block's transaction hashes.
    async fn block_summary(&self, index: u32) -> Result<BlockSummary, ChainError>;

    /// Application log for a transaction, or `None` while unexecuted.
    async fn application_log(
        &self,
        tx_hash: &UInt256,
    ) -> Result<Option<RpcApplicationLog>, ChainError>;

    /// Test-executes a VM script without changing chain state.
    async fn invoke_script(
        &self,
        script: &[u8],
        signer: Option<UInt160>,
    ) -> Result<RpcInvokeResult, ChainError>;

    /// Broadcasts a serialized transaction, returning its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<UInt256, ChainError>;
}

pub type SharedChainClient = Arc<dyn ChainClient>;
