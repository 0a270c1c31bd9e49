use alloy::primitives::Address;
use async_trait::async_trait;
use txprep_core::{chain::Chain, error::EngineError, transaction::TransactionDescriptor};

use crate::{
    error::ResolutionError,
    fields::{resolve_field, simulation_request},
};

#[async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate_gas(
        &self,
        chain: &dyn Chain,
        from: Option<Address>,
        transaction: &TransactionDescriptor,
    ) -> Result<u64, ResolutionError>;
}

/// `eth_estimateGas`, unless the descriptor already carries a gas limit
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcGasEstimator;

#[async_trait]
impl GasEstimator for RpcGasEstimator {
    #[tracing::instrument(skip_all, fields(chain_id = chain.chain_id(), from = ?from))]
    async fn estimate_gas(
        &self,
        chain: &dyn Chain,
        from: Option<Address>,
        transaction: &TransactionDescriptor,
    ) -> Result<u64, ResolutionError> {
        if let Some(gas) = resolve_field("gas", &transaction.gas).await? {
            tracing::debug!(gas, "Using explicit gas limit");
            return Ok(gas);
        }

        let request = simulation_request(from, transaction).await?;
        chain
            .rpc()
            .estimate_gas(&request)
            .await
            .map_err(simulation_error)
    }
}

/// Classifies a failed estimate, separating contract reverts from node failures.
pub fn simulation_error(error: EngineError) -> ResolutionError {
    let revert = error
        .rpc_error_response()
        .filter(|resp| resp.is_revert())
        .map(|resp| (resp.message.clone(), resp.revert_data()));

    match revert {
        Some((message, revert_data)) => {
            tracing::debug!(message = %message, revert_data = ?revert_data, "Transaction reverted during gas estimation");
            ResolutionError::SimulationError {
                message: format!("Transaction reverted during gas estimation: {message}"),
                reverted: true,
                revert_data,
                inner_error: error,
            }
        }
        None => ResolutionError::SimulationError {
            message: format!("Gas estimation failed: {error}"),
            reverted: false,
            revert_data: None,
            inner_error: error,
        },
    }
}
