use std::collections::HashSet;

use async_trait::async_trait;
use txprep_core::chain::Chain;

use crate::{
    constants::{LOCAL_CHAIN_IDS, ZKSYNC_STACK_CHAIN_IDS},
    error::ResolutionError,
};

/// Decides whether a chain needs its gas fees pre-computed by a [`crate::variant::VariantFeeOracle`]
#[async_trait]
pub trait ChainClassifier: Send + Sync {
    async fn is_variant_chain(&self, chain: &dyn Chain) -> Result<bool, ResolutionError>;
}

/// Recognises zkSync-stack chains, first by chain id and then by probing `zks_L1ChainId`.
#[derive(Debug, Clone, Default)]
pub struct ZkStackClassifier {
    extra_chain_ids: HashSet<u64>,
}

impl ZkStackClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain_ids(chain_ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            extra_chain_ids: chain_ids.into_iter().collect(),
        }
    }

    fn is_known(&self, chain_id: u64) -> bool {
        ZKSYNC_STACK_CHAIN_IDS.contains(&chain_id) || self.extra_chain_ids.contains(&chain_id)
    }
}

#[async_trait]
impl ChainClassifier for ZkStackClassifier {
    #[tracing::instrument(skip_all, fields(chain_id = chain.chain_id()))]
    async fn is_variant_chain(&self, chain: &dyn Chain) -> Result<bool, ResolutionError> {
        let chain_id = chain.chain_id();

        if LOCAL_CHAIN_IDS.contains(&chain_id) {
            return Ok(false);
        }
        if self.is_known(chain_id) {
            return Ok(true);
        }

        match chain.rpc().zks_l1_chain_id().await {
            Ok(l1_chain_id) => {
                tracing::debug!(l1_chain_id, "Chain answers zks_L1ChainId, treating as zkSync stack");
                Ok(true)
            }
            Err(e) if e.is_method_not_found() => Ok(false),
            Err(e) => Err(ResolutionError::ClassificationError {
                chain_id,
                message: format!("zks_L1ChainId probe failed: {e}"),
                inner_error: e,
            }),
        }
    }
}
