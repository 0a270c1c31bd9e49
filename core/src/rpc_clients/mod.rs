use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes},
    rpc::types::TransactionRequest,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub mod transport;

/// Fee estimate returned by `zks_estimateFee` on zkSync-stack chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkFeeEstimate {
    #[serde(with = "alloy::serde::quantity")]
    pub gas_limit: u64,
    #[serde(with = "alloy::serde::quantity")]
    pub max_fee_per_gas: u128,
    #[serde(with = "alloy::serde::quantity")]
    pub max_priority_fee_per_gas: u128,
    #[serde(with = "alloy::serde::quantity")]
    pub gas_per_pubdata_limit: u64,
}

/// The JSON-RPC surface transaction preparation needs from a node.
#[async_trait]
pub trait EvmRpc: Send + Sync {
    /// `eth_getTransactionCount` at the given block tag
    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockNumberOrTag,
    ) -> Result<u64, EngineError>;

    /// `eth_estimateGas`
    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, EngineError>;

    /// `eth_call` against the latest block
    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, EngineError>;

    /// `eth_gasPrice`
    async fn gas_price(&self) -> Result<u128, EngineError>;

    /// `eth_maxPriorityFeePerGas`
    async fn max_priority_fee_per_gas(&self) -> Result<u128, EngineError>;

    /// Base fee of the latest block, `None` on chains without EIP-1559 headers
    async fn latest_base_fee_per_gas(&self) -> Result<Option<u128>, EngineError>;

    /// `zks_L1ChainId`, only answered by zkSync-stack nodes
    async fn zks_l1_chain_id(&self) -> Result<u64, EngineError>;

    /// `zks_estimateFee`
    async fn zks_estimate_fee(
        &self,
        request: &TransactionRequest,
    ) -> Result<ZkFeeEstimate, EngineError>;
}
