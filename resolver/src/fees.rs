use std::collections::HashSet;

use async_trait::async_trait;
use txprep_core::{
    chain::Chain,
    error::EngineError,
    transaction::{FeeOverrides, TransactionDescriptor},
};

use crate::{
    config::ResolverConfig,
    constants::{
        CELO_CHAIN_IDS, DEFAULT_FEE_BUMP_PERCENT, LEGACY_FEE_CHAIN_IDS, NO_EIP1559_CHAIN_IDS,
    },
    error::ResolutionError,
    fields::resolve_field,
};

/// Suggests the fee fields of a transaction on a standard EVM chain
#[async_trait]
pub trait FeeDataOracle: Send + Sync {
    async fn fee_overrides(
        &self,
        chain: &dyn Chain,
        transaction: &TransactionDescriptor,
    ) -> Result<FeeOverrides, ResolutionError>;
}

/// Fee data from the node: `eth_gasPrice` for legacy pricing, the latest base fee and
/// `eth_maxPriorityFeePerGas` for EIP-1559. Suggestions are bumped by `bump_percent`.
#[derive(Debug, Clone)]
pub struct RpcFeeOracle {
    bump_percent: u32,
    legacy_chain_ids: HashSet<u64>,
}

impl Default for RpcFeeOracle {
    fn default() -> Self {
        Self {
            bump_percent: DEFAULT_FEE_BUMP_PERCENT,
            legacy_chain_ids: HashSet::new(),
        }
    }
}

impl RpcFeeOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            bump_percent: config.fee_bump_percent,
            legacy_chain_ids: config.legacy_fee_chain_ids.iter().copied().collect(),
        }
    }

    pub fn with_bump_percent(mut self, bump_percent: u32) -> Self {
        self.bump_percent = bump_percent;
        self
    }

    fn forces_legacy(&self, chain_id: u64) -> bool {
        LEGACY_FEE_CHAIN_IDS.contains(&chain_id) || self.legacy_chain_ids.contains(&chain_id)
    }

    fn bump(&self, value: u128) -> u128 {
        value.saturating_add(value / 100 * u128::from(self.bump_percent))
    }

    /// Fee suggestion for the chain, ignoring anything set on the descriptor
    pub async fn default_overrides(
        &self,
        chain: &dyn Chain,
        legacy: bool,
    ) -> Result<FeeOverrides, ResolutionError> {
        if legacy || self.forces_legacy(chain.chain_id()) {
            return self.legacy_overrides(chain).await;
        }

        match self.dynamic_overrides(chain).await? {
            Some(fees) => Ok(fees),
            None => self.legacy_overrides(chain).await,
        }
    }

    async fn legacy_overrides(&self, chain: &dyn Chain) -> Result<FeeOverrides, ResolutionError> {
        let gas_price = chain
            .rpc()
            .gas_price()
            .await
            .map_err(|e| fee_data_error("eth_gasPrice", e))?;

        Ok(FeeOverrides::legacy(self.bump(gas_price)))
    }

    /// `None` when the chain has no usable EIP-1559 fee market
    async fn dynamic_overrides(
        &self,
        chain: &dyn Chain,
    ) -> Result<Option<FeeOverrides>, ResolutionError> {
        let chain_id = chain.chain_id();
        if NO_EIP1559_CHAIN_IDS.contains(&chain_id) {
            return Ok(None);
        }

        let rpc = chain.rpc();
        let (base_fee, priority_fee) =
            tokio::join!(rpc.latest_base_fee_per_gas(), rpc.max_priority_fee_per_gas());

        let Some(base_fee) = base_fee.map_err(|e| fee_data_error("latest block", e))? else {
            tracing::debug!("Latest block has no base fee, using legacy pricing");
            return Ok(None);
        };

        let priority_fee = match priority_fee {
            Ok(0) => {
                tracing::debug!("Node suggested a zero priority fee, using legacy pricing");
                return Ok(None);
            }
            Ok(priority_fee) => priority_fee,
            Err(e) => {
                tracing::debug!(error = %e, "eth_maxPriorityFeePerGas unavailable, using legacy pricing");
                return Ok(None);
            }
        };

        let max_priority_fee_per_gas = self.bump(priority_fee);
        let max_fee_per_gas = base_fee
            .saturating_mul(2)
            .saturating_add(max_priority_fee_per_gas);

        if CELO_CHAIN_IDS.contains(&chain_id) {
            return Ok(Some(FeeOverrides::eip1559(max_fee_per_gas, max_fee_per_gas)));
        }

        Ok(Some(FeeOverrides::eip1559(
            max_fee_per_gas,
            max_priority_fee_per_gas,
        )))
    }
}

#[async_trait]
impl FeeDataOracle for RpcFeeOracle {
    #[tracing::instrument(skip_all, fields(chain_id = chain.chain_id()))]
    async fn fee_overrides(
        &self,
        chain: &dyn Chain,
        transaction: &TransactionDescriptor,
    ) -> Result<FeeOverrides, ResolutionError> {
        let (max_fee_per_gas, max_priority_fee_per_gas, gas_price, transaction_type) = tokio::try_join!(
            resolve_field("maxFeePerGas", &transaction.max_fee_per_gas),
            resolve_field("maxPriorityFeePerGas", &transaction.max_priority_fee_per_gas),
            resolve_field("gasPrice", &transaction.gas_price),
            resolve_field("type", &transaction.transaction_type),
        )?;

        if let (Some(max_fee), Some(max_priority)) = (max_fee_per_gas, max_priority_fee_per_gas) {
            return Ok(FeeOverrides::eip1559(max_fee, max_priority));
        }
        if let Some(gas_price) = gas_price {
            return Ok(FeeOverrides::legacy(gas_price));
        }

        let legacy = transaction_type.is_some_and(|ty| ty.is_legacy_priced());
        let defaults = self.default_overrides(chain, legacy).await?;

        if defaults.gas_price.is_some() {
            return Ok(defaults);
        }

        Ok(FeeOverrides {
            max_fee_per_gas: max_fee_per_gas.or(defaults.max_fee_per_gas),
            max_priority_fee_per_gas: max_priority_fee_per_gas.or(defaults.max_priority_fee_per_gas),
            gas_price: None,
        })
    }
}

fn fee_data_error(source: &str, error: EngineError) -> ResolutionError {
    ResolutionError::FeeDataError {
        message: format!("Failed to fetch {source}: {error}"),
        inner_error: error,
    }
}
