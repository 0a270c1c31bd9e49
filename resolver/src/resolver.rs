use std::{future::Future, sync::Arc, sync::OnceLock};

use alloy::primitives::Address;
use txprep_core::{
    chain::Chain,
    transaction::{
        FeeOverrides, Sender, SerializedTransaction, TransactionDescriptor, TransactionType,
    },
};

use crate::{
    classifier::{ChainClassifier, ZkStackClassifier},
    config::ResolverConfig,
    encoder::{CalldataEncoder, DescriptorCalldataEncoder},
    error::{ResolutionError, ResolutionStage},
    fees::{FeeDataOracle, RpcFeeOracle},
    fields::{literal, resolve_field},
    gas::{GasEstimator, RpcGasEstimator},
    nonce::{NetworkNonceAllocator, NonceAllocator, SequentialNonceAllocator},
    variant::{VariantFeeOracle, ZkSyncFeeOracle},
};

/// Input of [`TransactionResolver::resolve_with`]
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub transaction: TransactionDescriptor,
    pub from: Option<Sender>,
}

/// Turns transaction descriptors into network-ready transactions for one chain.
///
/// Resolution runs in two phases. Chains classified as variant chains (zkSync stack) get
/// their gas limit and fees from the [`VariantFeeOracle`] first; the descriptor carrying
/// them then goes through the same concurrent fan-out as every other chain: calldata,
/// nonce, gas estimate, fee data and the passthrough fields. The first failing step fails
/// the whole resolution and cancels the rest. A deferred field is produced once per
/// resolution, even when several steps read it.
pub struct TransactionResolver<C: Chain> {
    chain: C,
    config: ResolverConfig,
    classifier: Arc<dyn ChainClassifier>,
    variant_fee_oracle: Arc<dyn VariantFeeOracle>,
    fee_oracle: Arc<dyn FeeDataOracle>,
    gas_estimator: Arc<dyn GasEstimator>,
    calldata_encoder: Arc<dyn CalldataEncoder>,
    nonce_allocator: Arc<dyn NonceAllocator>,
}

pub struct TransactionResolverBuilder<C: Chain> {
    chain: C,
    config: ResolverConfig,
    classifier: Option<Arc<dyn ChainClassifier>>,
    variant_fee_oracle: Option<Arc<dyn VariantFeeOracle>>,
    fee_oracle: Option<Arc<dyn FeeDataOracle>>,
    gas_estimator: Option<Arc<dyn GasEstimator>>,
    calldata_encoder: Option<Arc<dyn CalldataEncoder>>,
    nonce_allocator: Option<Arc<dyn NonceAllocator>>,
    sequential_nonces: bool,
}

impl<C: Chain> TransactionResolverBuilder<C> {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier(mut self, classifier: impl ChainClassifier + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn variant_fee_oracle(mut self, oracle: impl VariantFeeOracle + 'static) -> Self {
        self.variant_fee_oracle = Some(Arc::new(oracle));
        self
    }

    pub fn fee_oracle(mut self, oracle: impl FeeDataOracle + 'static) -> Self {
        self.fee_oracle = Some(Arc::new(oracle));
        self
    }

    pub fn gas_estimator(mut self, estimator: impl GasEstimator + 'static) -> Self {
        self.gas_estimator = Some(Arc::new(estimator));
        self
    }

    pub fn calldata_encoder(mut self, encoder: impl CalldataEncoder + 'static) -> Self {
        self.calldata_encoder = Some(Arc::new(encoder));
        self
    }

    /// Shared allocators keep their bookkeeping across resolvers
    pub fn nonce_allocator(mut self, allocator: Arc<dyn NonceAllocator>) -> Self {
        self.nonce_allocator = Some(allocator);
        self
    }

    /// Defaults to a [`SequentialNonceAllocator`] limited by `max_in_flight` instead of the
    /// stateless network allocator. An allocator passed to
    /// [`nonce_allocator`](Self::nonce_allocator) still wins.
    pub fn sequential_nonces(mut self) -> Self {
        self.sequential_nonces = true;
        self
    }

    pub fn build(self) -> TransactionResolver<C> {
        let config = self.config;
        let sequential_nonces = self.sequential_nonces;

        TransactionResolver {
            classifier: self.classifier.unwrap_or_else(|| {
                Arc::new(ZkStackClassifier::with_chain_ids(
                    config.variant_chain_ids.iter().copied(),
                ))
            }),
            variant_fee_oracle: self
                .variant_fee_oracle
                .unwrap_or_else(|| Arc::new(ZkSyncFeeOracle)),
            fee_oracle: self
                .fee_oracle
                .unwrap_or_else(|| Arc::new(RpcFeeOracle::from_config(&config))),
            gas_estimator: self
                .gas_estimator
                .unwrap_or_else(|| Arc::new(RpcGasEstimator)),
            calldata_encoder: self
                .calldata_encoder
                .unwrap_or_else(|| Arc::new(DescriptorCalldataEncoder)),
            nonce_allocator: self.nonce_allocator.unwrap_or_else(|| -> Arc<dyn NonceAllocator> {
                if sequential_nonces {
                    Arc::new(SequentialNonceAllocator::from_config(&config))
                } else {
                    Arc::new(NetworkNonceAllocator)
                }
            }),
            chain: self.chain,
            config,
        }
    }
}

impl<C: Chain> TransactionResolver<C> {
    pub fn builder(chain: C) -> TransactionResolverBuilder<C> {
        TransactionResolverBuilder {
            chain,
            config: ResolverConfig::default(),
            classifier: None,
            variant_fee_oracle: None,
            fee_oracle: None,
            gas_estimator: None,
            calldata_encoder: None,
            nonce_allocator: None,
            sequential_nonces: false,
        }
    }

    /// Resolver with the JSON-RPC backed collaborators
    pub fn new(chain: C) -> Self {
        Self::builder(chain).build()
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn resolve_with(
        &self,
        options: ResolveOptions,
    ) -> Result<SerializedTransaction, ResolutionError> {
        self.resolve(&options.transaction, options.from.as_ref())
            .await
    }

    #[tracing::instrument(skip_all, fields(chain_id = self.chain.chain_id(), from = ?from.map(Sender::address)))]
    pub async fn resolve(
        &self,
        transaction: &TransactionDescriptor,
        from: Option<&Sender>,
    ) -> Result<SerializedTransaction, ResolutionError> {
        let chain: &dyn Chain = &self.chain;
        let from = from.map(Sender::address);

        let is_variant = self
            .with_timeout(
                ResolutionStage::Classification,
                self.classifier.is_variant_chain(chain),
            )
            .await?;

        // every step below reads the same producer outcomes
        let memoized = transaction.memoized();
        let transaction = &memoized;

        let pinned;
        let transaction = if is_variant {
            let fees = self
                .with_timeout(
                    ResolutionStage::VariantFees,
                    self.variant_fee_oracle
                        .variant_gas_fees(chain, from, transaction),
                )
                .await?;

            tracing::debug!(
                gas = fees.gas,
                max_fee_per_gas = fees.max_fee_per_gas,
                max_priority_fee_per_gas = fees.max_priority_fee_per_gas,
                "Variant chain, gas fees pre-computed"
            );

            pinned = transaction.with_variant_gas_fees(&fees);
            &pinned
        } else {
            transaction
        };

        let reserved = OnceLock::new();
        let result = self.resolve_fields(chain, transaction, from, &reserved).await;

        if let (Some(&nonce), Some(address)) = (reserved.get(), from) {
            let chain_id = chain.chain_id();
            match &result {
                Ok(_) => self.nonce_allocator.commit(chain_id, address, nonce).await,
                Err(e) => {
                    tracing::debug!(nonce, error = %e, "Resolution failed, releasing reserved nonce");
                    self.nonce_allocator.release(chain_id, address, nonce).await
                }
            }
        }

        result
    }

    async fn resolve_fields(
        &self,
        chain: &dyn Chain,
        transaction: &TransactionDescriptor,
        from: Option<Address>,
        reserved: &OnceLock<u64>,
    ) -> Result<SerializedTransaction, ResolutionError> {
        let nonce = async {
            if let Some(nonce) = resolve_field("nonce", &transaction.nonce).await? {
                tracing::debug!(nonce, "Using explicit nonce");
                return Ok(Some(nonce));
            }
            let Some(address) = from else {
                return Ok(None);
            };

            let nonce = self.nonce_allocator.reserve(chain, address).await?;
            let _ = reserved.set(nonce);
            Ok::<_, ResolutionError>(Some(nonce))
        };

        let passthrough = async {
            tokio::try_join!(
                resolve_field("to", &transaction.to),
                resolve_field("accessList", &transaction.access_list),
                resolve_field("value", &transaction.value),
                resolve_field("authorizationList", &transaction.authorization_list),
                resolve_field("type", &transaction.transaction_type),
            )
        };

        let (data, nonce, estimate, oracle_fees, (to, access_list, value, authorization_list, transaction_type)) = tokio::try_join!(
            self.with_timeout(
                ResolutionStage::Calldata,
                self.calldata_encoder.encode(chain, transaction)
            ),
            self.with_timeout(ResolutionStage::Nonce, nonce),
            self.with_timeout(
                ResolutionStage::GasEstimate,
                self.gas_estimator.estimate_gas(chain, from, transaction)
            ),
            self.with_timeout(
                ResolutionStage::FeeData,
                self.fee_oracle.fee_overrides(chain, transaction)
            ),
            self.with_timeout(ResolutionStage::Fields, passthrough),
        )?;

        let extra_gas = self
            .with_timeout(
                ResolutionStage::ExtraGas,
                resolve_field("extraGas", &transaction.extra_gas),
            )
            .await?;
        let gas = match extra_gas {
            Some(extra_gas) => estimate.saturating_add(extra_gas),
            None => estimate,
        };

        let fees = normalize_fees(merge_fees(oracle_fees, transaction), transaction_type);

        tracing::debug!(
            gas,
            estimate,
            max_fee_per_gas = ?fees.max_fee_per_gas,
            max_priority_fee_per_gas = ?fees.max_priority_fee_per_gas,
            gas_price = ?fees.gas_price,
            "Transaction resolved"
        );

        Ok(SerializedTransaction {
            chain_id: chain.chain_id(),
            data,
            nonce,
            gas,
            to,
            access_list,
            value,
            authorization_list,
            transaction_type,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            gas_price: fees.gas_price,
        })
    }

    async fn with_timeout<T>(
        &self,
        stage: ResolutionStage,
        future: impl Future<Output = Result<T, ResolutionError>>,
    ) -> Result<T, ResolutionError> {
        tokio::time::timeout(self.config.rpc_timeout(), future)
            .await
            .map_err(|_| ResolutionError::Timeout {
                stage,
                timeout_ms: self.config.rpc_timeout_ms,
            })?
    }
}

/// Fee fields the descriptor carries as literals (the variant phase pins them this way)
/// take precedence over the oracle's suggestion.
pub fn merge_fees(oracle: FeeOverrides, transaction: &TransactionDescriptor) -> FeeOverrides {
    let max_fee_per_gas = literal(&transaction.max_fee_per_gas);
    let max_priority_fee_per_gas = literal(&transaction.max_priority_fee_per_gas);

    if max_fee_per_gas.is_none() && max_priority_fee_per_gas.is_none() {
        return match literal(&transaction.gas_price) {
            Some(gas_price) => FeeOverrides::legacy(gas_price),
            None => oracle,
        };
    }

    FeeOverrides {
        max_fee_per_gas: max_fee_per_gas.or(oracle.max_fee_per_gas),
        max_priority_fee_per_gas: max_priority_fee_per_gas.or(oracle.max_priority_fee_per_gas),
        gas_price: oracle.gas_price,
    }
}

/// Keeps the fee fields the resolved transaction type is priced with.
pub fn normalize_fees(fees: FeeOverrides, ty: Option<TransactionType>) -> FeeOverrides {
    if ty.is_some_and(|ty| ty.is_legacy_priced()) {
        return FeeOverrides {
            gas_price: fees.gas_price.or(fees.max_fee_per_gas),
            ..Default::default()
        };
    }

    if fees.has_eip1559_pair() {
        return FeeOverrides {
            gas_price: None,
            ..fees
        };
    }

    match fees.gas_price {
        Some(gas_price) => FeeOverrides::legacy(gas_price),
        None => fees,
    }
}

#[cfg(test)]
mod tests {
    use txprep_core::deferred::MaybeDeferred;

    use super::*;

    #[test]
    fn test_literal_fees_override_oracle() {
        let transaction = TransactionDescriptor::new()
            .max_fee_per_gas(500u128)
            .max_priority_fee_per_gas(7u128);

        let fees = merge_fees(FeeOverrides::eip1559(10, 1), &transaction);
        assert_eq!(fees, FeeOverrides::eip1559(500, 7));
    }

    #[test]
    fn test_literal_gas_price_replaces_oracle_pair() {
        let transaction = TransactionDescriptor::new().gas_price(3u128);

        let fees = merge_fees(FeeOverrides::eip1559(10, 1), &transaction);
        assert_eq!(fees, FeeOverrides::legacy(3));
    }

    #[test]
    fn test_deferred_fees_are_left_to_the_oracle() {
        let transaction = TransactionDescriptor::new()
            .max_fee_per_gas(MaybeDeferred::deferred(|| async { Ok(999u128) }));

        let fees = merge_fees(FeeOverrides::eip1559(10, 1), &transaction);
        assert_eq!(fees, FeeOverrides::eip1559(10, 1));
    }

    #[test]
    fn test_partial_literal_fee_fills_from_oracle() {
        let transaction = TransactionDescriptor::new().max_priority_fee_per_gas(2u128);

        let fees = merge_fees(FeeOverrides::eip1559(10, 1), &transaction);
        assert_eq!(fees, FeeOverrides::eip1559(10, 2));
    }

    #[test]
    fn test_normalize_legacy_type_keeps_gas_price_only() {
        let fees = FeeOverrides {
            max_fee_per_gas: Some(10),
            max_priority_fee_per_gas: Some(1),
            gas_price: Some(4),
        };

        assert_eq!(
            normalize_fees(fees, Some(TransactionType::Legacy)),
            FeeOverrides::legacy(4)
        );
        // falls back to the max fee when no gas price was suggested
        assert_eq!(
            normalize_fees(FeeOverrides::eip1559(10, 1), Some(TransactionType::Eip2930)),
            FeeOverrides::legacy(10)
        );
    }

    #[test]
    fn test_normalize_drops_gas_price_next_to_pair() {
        let fees = FeeOverrides {
            max_fee_per_gas: Some(10),
            max_priority_fee_per_gas: Some(1),
            gas_price: Some(4),
        };

        assert_eq!(normalize_fees(fees, None), FeeOverrides::eip1559(10, 1));
        assert_eq!(
            normalize_fees(fees, Some(TransactionType::Eip7702)),
            FeeOverrides::eip1559(10, 1)
        );
    }

    #[test]
    fn test_normalize_without_pair_keeps_gas_price() {
        let fees = FeeOverrides {
            max_fee_per_gas: Some(10),
            max_priority_fee_per_gas: None,
            gas_price: Some(4),
        };

        assert_eq!(normalize_fees(fees, None), FeeOverrides::legacy(4));
    }
}
