use alloy::primitives::Bytes;
use async_trait::async_trait;
use txprep_core::{chain::Chain, transaction::TransactionDescriptor};

use crate::error::ResolutionError;

#[async_trait]
pub trait CalldataEncoder: Send + Sync {
    async fn encode(
        &self,
        chain: &dyn Chain,
        transaction: &TransactionDescriptor,
    ) -> Result<Bytes, ResolutionError>;
}

/// Runs the descriptor's calldata producer. No data means empty calldata.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorCalldataEncoder;

#[async_trait]
impl CalldataEncoder for DescriptorCalldataEncoder {
    async fn encode(
        &self,
        _chain: &dyn Chain,
        transaction: &TransactionDescriptor,
    ) -> Result<Bytes, ResolutionError> {
        encode_calldata(transaction).await
    }
}

pub async fn encode_calldata(transaction: &TransactionDescriptor) -> Result<Bytes, ResolutionError> {
    match &transaction.data {
        Some(data) => data
            .resolve()
            .await
            .map_err(|e| ResolutionError::EncodingError {
                message: e.to_string(),
            }),
        None => Ok(Bytes::new()),
    }
}
