// Copyright (C) 2015-2025 The Neo Project.
//
// sender.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Typed contract invocation: script, test-invoke, fee, witness, send.

use crate::error::ChainError;
use crate::models::{RpcExecution, VmState};
use crate::script::{build_contract_call, ContractParameter};
use crate::tx::{single_sig_account, Transaction, TxSigner, Witness};
use crate::{ChainClient, SharedChainClient};
use async_trait::async_trait;
use nsl_core::{UInt160, UInt256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Blocks a transaction stays valid after assembly.
const TX_LIFETIME_BLOCKS: u32 = 240;
/// Flat margin added over the test-invoke gas consumption.
const SYSTEM_FEE_MARGIN: i64 = 1_000_000;
/// Base network fee covering witness verification.
const NETWORK_FEE_BASE: i64 = 1_200_000;
/// Network fee per serialized byte.
const NETWORK_FEE_PER_BYTE: i64 = 1_000;
/// Approximate witness size used for the fee estimate before signing.
const WITNESS_SIZE_ESTIMATE: usize = 109;

/// Produces transaction witnesses for the worker's master account.
#[async_trait]
pub trait WitnessSigner: Send + Sync {
    /// SEC1 compressed public key of the master account.
    async fn public_key(&self) -> Result<Vec<u8>, ChainError>;

    /// Signs the transaction sign data, returning the raw 64-byte
    /// signature.
    async fn sign_witness(&self, sign_data: &[u8]) -> Result<Vec<u8>, ChainError>;
}

/// A broadcast transaction awaiting execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub tx_hash: UInt256,
    pub gas_consumed: i64,
}

/// Builds and submits witnessed invocations through a [`ChainClient`].
pub struct TransactionSender {
    chain: SharedChainClient,
    witness: Arc<dyn WitnessSigner>,
    network_magic: u32,
}

impl TransactionSender {
    pub fn new(
        chain: SharedChainClient,
        witness: Arc<dyn WitnessSigner>,
        network_magic: u32,
    ) -> Self {
        Self {
            chain,
            witness,
            network_magic,
        }
    }

    pub fn chain(&self) -> &SharedChainClient {
        &self.chain
    }

    /// The master account the witness key controls.
    pub async fn account(&self) -> Result<UInt160, ChainError> {
        let key = self.witness.public_key().await?;
        Ok(single_sig_account(&key))
    }

    /// Read-only invocation; FAULTs surface as [`ChainError::Fault`].
    pub async fn test_invoke(
        &self,
        contract: &UInt160,
        method: &str,
        parameters: &[ContractParameter],
    ) -> Result<crate::models::RpcInvokeResult, ChainError> {
        let script = build_contract_call(contract, method, parameters);
        let account = self.account().await?;
        let result = self.chain.invoke_script(&script, Some(account)).await?;
        if result.state != VmState::Halt {
            return Err(ChainError::Fault(
                result.exception.unwrap_or_else(|| "unspecified fault".into()),
            ));
        }
        Ok(result)
    }

    /// Full invocation flow: build script, test-invoke for fees, assemble
    /// the transaction, attach the single-signer witness, broadcast.
    pub async fn invoke(
        &self,
        contract: &UInt160,
        method: &str,
        parameters: &[ContractParameter],
    ) -> Result<PendingTx, ChainError> {
        let script = build_contract_call(contract, method, parameters);
        let public_key = self.witness.public_key().await?;
        let account = single_sig_account(&public_key);

        let test = self.chain.invoke_script(&script, Some(account)).await?;
        if test.state != VmState::Halt {
            return Err(ChainError::Fault(
                test.exception.unwrap_or_else(|| "unspecified fault".into()),
            ));
        }

        let tip = self.chain.block_count().await?;
        let mut tx = Transaction::new(script);
        tx.system_fee = test.gas_consumed + SYSTEM_FEE_MARGIN;
        tx.valid_until_block = tip + TX_LIFETIME_BLOCKS;
        tx.signers = vec![TxSigner::called_by_entry(account)];
        let estimated_size = tx.serialize_unsigned().len() + WITNESS_SIZE_ESTIMATE;
        tx.network_fee = NETWORK_FEE_BASE + NETWORK_FEE_PER_BYTE * estimated_size as i64;

        let sign_data = tx.sign_data(self.network_magic);
        let signature = self.witness.sign_witness(&sign_data).await?;
        if signature.len() != 64 {
            return Err(ChainError::Witness(format!(
                "signature length {} != 64",
                signature.len()
            )));
        }
        tx.witnesses = vec![Witness::single_sig(&signature, &public_key)];

        let tx_hash = tx.hash();
        let accepted = self.chain.send_raw_transaction(&tx.to_array()).await?;
        if accepted != tx_hash {
            debug!(local = %tx_hash, remote = %accepted, "node reported different hash");
        }

        info!(%tx_hash, contract = %contract, method, "invocation broadcast");
        Ok(PendingTx {
            tx_hash,
            gas_consumed: test.gas_consumed,
        })
    }

    /// Polls the application log until the transaction executes or the
    /// timeout passes. HALT returns the execution; FAULT surfaces the
    /// exception for reason classification.
    pub async fn wait_for_execution(
        &self,
        tx_hash: &UInt256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<RpcExecution, ChainError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(log) = self.chain.application_log(tx_hash).await? {
                let execution = log
                    .application_execution()
                    .cloned()
                    .ok_or_else(|| ChainError::Decode("log without executions".into()))?;
                return match execution.vm_state {
                    VmState::Halt => Ok(execution),
                    _ => Err(ChainError::Fault(
                        execution
                            .exception
                            .unwrap_or_else(|| "unspecified fault".into()),
                    )),
                };
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::ConfirmationTimeout(tx_hash.to_string()));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
