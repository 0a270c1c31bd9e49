use alloy::primitives::Address;
use async_trait::async_trait;
use txprep_core::{
    chain::Chain,
    rpc_clients::ZkFeeEstimate,
    transaction::{TransactionDescriptor, VariantGasFees},
};

use crate::{
    constants::MIN_VARIANT_PRIORITY_FEE,
    error::ResolutionError,
    fields::{resolve_field, simulation_request},
};

/// Gas limit and fees for chains whose fee market the standard oracle cannot price
#[async_trait]
pub trait VariantFeeOracle: Send + Sync {
    async fn variant_gas_fees(
        &self,
        chain: &dyn Chain,
        from: Option<Address>,
        transaction: &TransactionDescriptor,
    ) -> Result<VariantGasFees, ResolutionError>;
}

/// Prices transactions on zkSync-stack chains with `zks_estimateFee`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZkSyncFeeOracle;

/// Doubles the node's gas limit and max fee to absorb pubdata price swings.
pub fn derive_variant_fees(estimate: &ZkFeeEstimate) -> VariantGasFees {
    let max_priority_fee_per_gas = match estimate.max_priority_fee_per_gas {
        0 => MIN_VARIANT_PRIORITY_FEE,
        fee => fee,
    };

    VariantGasFees {
        gas: estimate.gas_limit.saturating_mul(2),
        max_fee_per_gas: estimate.max_fee_per_gas.saturating_mul(2),
        max_priority_fee_per_gas,
    }
}

#[async_trait]
impl VariantFeeOracle for ZkSyncFeeOracle {
    #[tracing::instrument(skip_all, fields(chain_id = chain.chain_id(), from = ?from))]
    async fn variant_gas_fees(
        &self,
        chain: &dyn Chain,
        from: Option<Address>,
        transaction: &TransactionDescriptor,
    ) -> Result<VariantGasFees, ResolutionError> {
        let (gas, max_fee_per_gas, max_priority_fee_per_gas) = tokio::try_join!(
            resolve_field("gas", &transaction.gas),
            resolve_field("maxFeePerGas", &transaction.max_fee_per_gas),
            resolve_field("maxPriorityFeePerGas", &transaction.max_priority_fee_per_gas),
        )?;

        if let (Some(gas), Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) =
            (gas, max_fee_per_gas, max_priority_fee_per_gas)
        {
            return Ok(VariantGasFees {
                gas,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            });
        }

        let request = simulation_request(from, transaction).await?;
        let estimate = chain.rpc().zks_estimate_fee(&request).await.map_err(|e| {
            ResolutionError::VariantFeeError {
                message: format!("zks_estimateFee failed: {e}"),
                inner_error: Some(e),
            }
        })?;

        tracing::debug!(
            gas_limit = estimate.gas_limit,
            max_fee_per_gas = estimate.max_fee_per_gas,
            max_priority_fee_per_gas = estimate.max_priority_fee_per_gas,
            gas_per_pubdata_limit = estimate.gas_per_pubdata_limit,
            "zks_estimateFee answered"
        );

        let derived = derive_variant_fees(&estimate);

        Ok(VariantGasFees {
            gas: gas.unwrap_or(derived.gas),
            max_fee_per_gas: max_fee_per_gas.unwrap_or(derived.max_fee_per_gas),
            max_priority_fee_per_gas: max_priority_fee_per_gas
                .unwrap_or(derived.max_priority_fee_per_gas),
        })
    }
}
