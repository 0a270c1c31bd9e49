
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes, TxKind, U256, address, bytes},
};
use async_trait::async_trait;
use fixtures::{TestChain, init_tracing, method_not_found, transport_error};
use mockall::predicate::eq;
use txprep_core::{
    chain::Chain,
    deferred::MaybeDeferred,
    rpc_clients::ZkFeeEstimate,
    transaction::{
        FeeOverrides, Sender, SerializedTransaction, TransactionDescriptor, TransactionType,
        VariantGasFees,
    },
};
use txprep_resolver::{
    ResolutionError, ResolutionStage, ResolveOptions, TransactionResolver,
    classifier::ChainClassifier,
    config::ResolverConfig,
    encoder::CalldataEncoder,
    fees::FeeDataOracle,
    gas::GasEstimator,
    nonce::SequentialNonceAllocator,
    variant::VariantFeeOracle,
};

const CHAIN_ID: u64 = 8453;
const TO: Address = address!("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
const SENDER: Address = address!("0x5E4DE45E4DE45E4DE45E4DE45E4DE45E4DE45E4D");

struct StubClassifier(bool);

#[async_trait]
impl ChainClassifier for StubClassifier {
    async fn is_variant_chain(&self, _chain: &dyn Chain) -> Result<bool, ResolutionError> {
        Ok(self.0)
    }
}

struct StubFeeOracle(FeeOverrides);

#[async_trait]
impl FeeDataOracle for StubFeeOracle {
    async fn fee_overrides(
        &self,
        _chain: &dyn Chain,
        _transaction: &TransactionDescriptor,
    ) -> Result<FeeOverrides, ResolutionError> {
        Ok(self.0)
    }
}

struct StubVariantOracle(VariantGasFees);

#[async_trait]
impl VariantFeeOracle for StubVariantOracle {
    async fn variant_gas_fees(
        &self,
        _chain: &dyn Chain,
        _from: Option<Address>,
        _transaction: &TransactionDescriptor,
    ) -> Result<VariantGasFees, ResolutionError> {
        Ok(self.0)
    }
}

struct FailingEncoder;

#[async_trait]
impl CalldataEncoder for FailingEncoder {
    async fn encode(
        &self,
        _chain: &dyn Chain,
        _transaction: &TransactionDescriptor,
    ) -> Result<Bytes, ResolutionError> {
        Err(ResolutionError::EncodingError {
            message: "malformed arguments".to_string(),
        })
    }
}

/// Takes a minute, then records that it finished
struct SlowGasEstimator {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl GasEstimator for SlowGasEstimator {
    async fn estimate_gas(
        &self,
        _chain: &dyn Chain,
        _from: Option<Address>,
        _transaction: &TransactionDescriptor,
    ) -> Result<u64, ResolutionError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(21_000)
    }
}

struct HangingGasEstimator;

#[async_trait]
impl GasEstimator for HangingGasEstimator {
    async fn estimate_gas(
        &self,
        _chain: &dyn Chain,
        _from: Option<Address>,
        _transaction: &TransactionDescriptor,
    ) -> Result<u64, ResolutionError> {
        std::future::pending().await
    }
}

/// Fails shortly after being polled, once sibling steps had a chance to run
struct RevertingGasEstimator;

#[async_trait]
impl GasEstimator for RevertingGasEstimator {
    async fn estimate_gas(
        &self,
        _chain: &dyn Chain,
        _from: Option<Address>,
        _transaction: &TransactionDescriptor,
    ) -> Result<u64, ResolutionError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err(ResolutionError::SimulationError {
            message: "execution reverted".to_string(),
            reverted: true,
            revert_data: None,
            inner_error: fixtures::error_response(CHAIN_ID, 3, "execution reverted", None),
        })
    }
}

/// Estimates after a short delay, keeping the reserved nonce in flight meanwhile
struct DelayedGasEstimator;

#[async_trait]
impl GasEstimator for DelayedGasEstimator {
    async fn estimate_gas(
        &self,
        _chain: &dyn Chain,
        _from: Option<Address>,
        _transaction: &TransactionDescriptor,
    ) -> Result<u64, ResolutionError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(21_000)
    }
}

/// Transfer whose recipient and calldata are produced, counting producer runs
fn counted_transfer(
    to_calls: Arc<AtomicUsize>,
    data_calls: Arc<AtomicUsize>,
) -> TransactionDescriptor {
    TransactionDescriptor::new()
        .to(MaybeDeferred::deferred(move || {
            let calls = to_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(TO)
            }
        }))
        .data(MaybeDeferred::deferred(move || {
            let calls = data_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(bytes!("abcd"))
            }
        }))
}

fn transfer() -> TransactionDescriptor {
    TransactionDescriptor::new()
        .to(TO)
        .value(U256::from(100))
        .data(bytes!("abcd"))
}

#[tokio::test]
async fn test_resolves_transfer_with_default_collaborators() {
    init_tracing();

    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_zks_l1_chain_id()
        .times(1)
        .returning(|| Err(method_not_found(CHAIN_ID)));
    chain
        .rpc
        .expect_get_transaction_count()
        .with(eq(SENDER), eq(BlockNumberOrTag::Pending))
        .times(1)
        .returning(|_, _| Ok(7));
    chain
        .rpc
        .expect_estimate_gas()
        .withf(|request| {
            request.from == Some(SENDER)
                && request.to == Some(TxKind::Call(TO))
                && request.value == Some(U256::from(100))
                && request.input.input() == Some(&bytes!("abcd"))
        })
        .times(1)
        .returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let resolved = resolver
        .resolve(&transfer(), Some(&Sender::from(SENDER)))
        .await
        .unwrap();

    assert_eq!(
        resolved,
        SerializedTransaction {
            chain_id: CHAIN_ID,
            data: bytes!("abcd"),
            nonce: Some(7),
            gas: 21_000,
            to: Some(TO),
            access_list: None,
            value: Some(U256::from(100)),
            authorization_list: None,
            transaction_type: None,
            max_fee_per_gas: Some(10),
            max_priority_fee_per_gas: Some(1),
            gas_price: None,
        }
    );
}

#[tokio::test]
async fn test_explicit_nonce_skips_network_lookup() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain.rpc.expect_get_transaction_count().never();
    chain.rpc.expect_estimate_gas().returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let resolved = resolver
        .resolve(&transfer().nonce(42u64), Some(&Sender::from(SENDER)))
        .await
        .unwrap();

    assert_eq!(resolved.nonce, Some(42));
}

#[tokio::test]
async fn test_no_sender_and_no_nonce_leaves_nonce_empty() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain.rpc.expect_get_transaction_count().never();
    chain.rpc.expect_estimate_gas().returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let resolved = resolver.resolve(&transfer(), None).await.unwrap();

    assert_eq!(resolved.nonce, None);
    assert_eq!(resolved.gas, 21_000);
}

#[tokio::test]
async fn test_variant_chain_uses_variant_fees() {
    let mut chain = TestChain::new(324);
    // the pinned gas limit short-circuits estimation
    chain.rpc.expect_estimate_gas().never();

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(true))
        .variant_fee_oracle(StubVariantOracle(VariantGasFees {
            gas: 500_000,
            max_fee_per_gas: 250,
            max_priority_fee_per_gas: 3,
        }))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let resolved = resolver.resolve(&transfer(), None).await.unwrap();

    assert_eq!(resolved.gas, 500_000);
    assert_eq!(resolved.max_fee_per_gas, Some(250));
    assert_eq!(resolved.max_priority_fee_per_gas, Some(3));
    assert_eq!(resolved.gas_price, None);
    assert_eq!(resolved.chain_id, 324);
}

#[tokio::test]
async fn test_extra_gas_is_added_to_estimate() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain.rpc.expect_estimate_gas().returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let transaction =
        transfer().extra_gas(MaybeDeferred::deferred(|| async { Ok(5_000u64) }));
    let resolved = resolver.resolve(&transaction, None).await.unwrap();

    assert_eq!(resolved.gas, 26_000);
}

#[tokio::test]
async fn test_legacy_type_is_priced_with_gas_price() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain.rpc.expect_estimate_gas().returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let resolved = resolver
        .resolve(&transfer().transaction_type(TransactionType::Legacy), None)
        .await
        .unwrap();

    assert_eq!(resolved.transaction_type, Some(TransactionType::Legacy));
    assert_eq!(resolved.gas_price, Some(10));
    assert_eq!(resolved.max_fee_per_gas, None);
    assert_eq!(resolved.max_priority_fee_per_gas, None);
}

#[tokio::test(start_paused = true)]
async fn test_failing_step_does_not_wait_for_slow_sibling() {
    let finished = Arc::new(AtomicBool::new(false));
    let resolver = TransactionResolver::builder(TestChain::new(CHAIN_ID))
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .calldata_encoder(FailingEncoder)
        .gas_estimator(SlowGasEstimator {
            finished: finished.clone(),
        })
        .build();

    let started = tokio::time::Instant::now();
    let err = resolver.resolve(&transfer(), None).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(1));
    match err {
        ResolutionError::EncodingError { message } => assert_eq!(message, "malformed arguments"),
        other => panic!("Expected EncodingError, got {other:?}"),
    }

    // the estimate was dropped mid-flight and never completes
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_step_times_out() {
    let resolver = TransactionResolver::builder(TestChain::new(CHAIN_ID))
        .config(ResolverConfig {
            rpc_timeout_ms: 1_000,
            ..Default::default()
        })
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .gas_estimator(HangingGasEstimator)
        .build();

    let err = resolver.resolve(&transfer(), None).await.unwrap_err();

    match err {
        ResolutionError::Timeout { stage, timeout_ms } => {
            assert_eq!(stage, ResolutionStage::GasEstimate);
            assert_eq!(timeout_ms, 1_000);
        }
        other => panic!("Expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failing_field_producer_names_the_field() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain.rpc.expect_estimate_gas().returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let transaction = TransactionDescriptor::new()
        .to(MaybeDeferred::<Address>::deferred(|| async {
            Err("vitalik.eth did not resolve".into())
        }))
        .gas(21_000u64);

    match resolver.resolve(&transaction, None).await.unwrap_err() {
        ResolutionError::FieldResolutionError { field, message } => {
            assert_eq!(field, "to");
            assert_eq!(message, "vitalik.eth did not resolve");
        }
        other => panic!("Expected FieldResolutionError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_classification_failure_is_fatal() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_zks_l1_chain_id()
        .returning(|| Err(transport_error(CHAIN_ID)));
    chain.rpc.expect_estimate_gas().never();

    let resolver = TransactionResolver::new(chain);

    assert!(matches!(
        resolver.resolve(&transfer(), None).await,
        Err(ResolutionError::ClassificationError {
            chain_id: CHAIN_ID,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reserved_nonce_is_released_on_failure() {
    let allocator = Arc::new(SequentialNonceAllocator::new(10));

    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_get_transaction_count()
        .returning(|_, _| Ok(3));
    let failing = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .gas_estimator(RevertingGasEstimator)
        .nonce_allocator(allocator.clone())
        .build();

    let err = failing
        .resolve(&transfer(), Some(&Sender::from(SENDER)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolutionError::SimulationError { reverted: true, .. }
    ));

    let nonces = allocator.snapshot(CHAIN_ID, SENDER).await.unwrap();
    assert!(nonces.in_flight.is_empty());
    assert!(nonces.recycled.contains(&3));

    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_get_transaction_count()
        .returning(|_, _| Ok(3));
    chain.rpc.expect_estimate_gas().returning(|_| Ok(21_000));
    let succeeding = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .nonce_allocator(allocator.clone())
        .build();

    let resolved = succeeding
        .resolve(&transfer(), Some(&Sender::from(SENDER)))
        .await
        .unwrap();
    assert_eq!(resolved.nonce, Some(3));

    let nonces = allocator.snapshot(CHAIN_ID, SENDER).await.unwrap();
    assert!(nonces.in_flight.is_empty());
    assert!(nonces.recycled.is_empty());
    assert_eq!(nonces.optimistic, 4);
}

#[tokio::test]
async fn test_producers_run_once_per_resolution() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_zks_l1_chain_id()
        .returning(|| Err(method_not_found(CHAIN_ID)));
    chain
        .rpc
        .expect_estimate_gas()
        .withf(|request| {
            request.to == Some(TxKind::Call(TO))
                && request.input.input() == Some(&bytes!("abcd"))
        })
        .times(2)
        .returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let to_calls = Arc::new(AtomicUsize::new(0));
    let data_calls = Arc::new(AtomicUsize::new(0));
    let transaction = counted_transfer(to_calls.clone(), data_calls.clone());

    let resolved = resolver.resolve(&transaction, None).await.unwrap();
    assert_eq!(resolved.to, Some(TO));
    assert_eq!(resolved.data, bytes!("abcd"));
    assert_eq!(to_calls.load(Ordering::SeqCst), 1);
    assert_eq!(data_calls.load(Ordering::SeqCst), 1);

    // a new resolution produces the fields again
    resolver.resolve(&transaction, None).await.unwrap();
    assert_eq!(to_calls.load(Ordering::SeqCst), 2);
    assert_eq!(data_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_variant_chain_with_default_collaborators() {
    let mut chain = TestChain::new(324);
    chain.rpc.expect_zks_l1_chain_id().never();
    chain.rpc.expect_estimate_gas().never();
    chain.rpc.expect_latest_base_fee_per_gas().never();
    chain.rpc.expect_gas_price().never();
    chain
        .rpc
        .expect_get_transaction_count()
        .times(1)
        .returning(|_, _| Ok(9));
    chain
        .rpc
        .expect_zks_estimate_fee()
        .withf(|request| {
            request.from == Some(SENDER)
                && request.to == Some(TxKind::Call(TO))
                && request.input.data.as_ref() == Some(&bytes!("abcd"))
        })
        .times(1)
        .returning(|_| {
            Ok(ZkFeeEstimate {
                gas_limit: 150_000,
                max_fee_per_gas: 25_000_000,
                max_priority_fee_per_gas: 0,
                gas_per_pubdata_limit: 50_000,
            })
        });

    let resolver = TransactionResolver::new(chain);

    let to_calls = Arc::new(AtomicUsize::new(0));
    let data_calls = Arc::new(AtomicUsize::new(0));
    let resolved = resolver
        .resolve(
            &counted_transfer(to_calls.clone(), data_calls.clone()),
            Some(&Sender::from(SENDER)),
        )
        .await
        .unwrap();

    assert_eq!(resolved.chain_id, 324);
    assert_eq!(resolved.nonce, Some(9));
    assert_eq!(resolved.gas, 300_000);
    assert_eq!(resolved.max_fee_per_gas, Some(50_000_000));
    assert_eq!(resolved.max_priority_fee_per_gas, Some(1));
    assert_eq!(resolved.gas_price, None);
    assert_eq!(resolved.to, Some(TO));
    // read by the variant phase and the fan-out, produced once
    assert_eq!(to_calls.load(Ordering::SeqCst), 1);
    assert_eq!(data_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_resolutions_get_distinct_nonces() {
    let allocator = Arc::new(SequentialNonceAllocator::new(10));

    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_get_transaction_count()
        .with(eq(SENDER), eq(BlockNumberOrTag::Pending))
        .times(1)
        .returning(|_, _| Ok(3));
    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .gas_estimator(DelayedGasEstimator)
        .nonce_allocator(allocator.clone())
        .build();

    let sender = Sender::from(SENDER);
    let (tx_a, tx_b) = (transfer(), transfer());
    let (first, second) = tokio::join!(
        resolver.resolve(&tx_a, Some(&sender)),
        resolver.resolve(&tx_b, Some(&sender)),
    );

    let mut nonces = vec![first.unwrap().nonce, second.unwrap().nonce];
    nonces.sort();
    assert_eq!(nonces, vec![Some(3), Some(4)]);

    let state = allocator.snapshot(CHAIN_ID, SENDER).await.unwrap();
    assert!(state.in_flight.is_empty());
    assert_eq!(state.optimistic, 5);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_nonces_follow_configured_limit() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_get_transaction_count()
        .times(2)
        .returning(|_, _| Ok(3));
    let resolver = TransactionResolver::builder(chain)
        .config(ResolverConfig {
            max_in_flight: 1,
            ..Default::default()
        })
        .sequential_nonces()
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .gas_estimator(DelayedGasEstimator)
        .build();

    let sender = Sender::from(SENDER);
    let (tx_a, tx_b) = (transfer(), transfer());
    let (first, second) = tokio::join!(
        resolver.resolve(&tx_a, Some(&sender)),
        resolver.resolve(&tx_b, Some(&sender)),
    );

    let (resolved, rejected) = match (first, second) {
        (Ok(resolved), Err(rejected)) | (Err(rejected), Ok(resolved)) => (resolved, rejected),
        other => panic!("Expected one resolution to be rejected, got {other:?}"),
    };
    assert_eq!(resolved.nonce, Some(3));
    match rejected {
        ResolutionError::NonceResolutionError { message, .. } => {
            assert!(message.contains("Too many nonces in flight"))
        }
        other => panic!("Expected NonceResolutionError, got {other:?}"),
    }

    // the first nonce was committed, so the next one follows it
    let resolved = resolver.resolve(&transfer(), Some(&sender)).await.unwrap();
    assert_eq!(resolved.nonce, Some(4));
}

#[tokio::test]
async fn test_resolve_with_options() {
    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_get_transaction_count()
        .returning(|_, _| Ok(11));
    chain.rpc.expect_estimate_gas().returning(|_| Ok(50_000));

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::legacy(8)))
        .build();

    let resolved = resolver
        .resolve_with(ResolveOptions {
            transaction: transfer(),
            from: Some(SENDER.into()),
        })
        .await
        .unwrap();

    assert_eq!(resolved.nonce, Some(11));
    assert_eq!(resolved.gas_price, Some(8));
    assert_eq!(resolved.max_fee_per_gas, None);
}

#[tokio::test]
async fn test_resolved_transaction_signs() {
    use alloy::{consensus::SignableTransaction, signers::local::PrivateKeySigner};
    use txprep_core::signer::{AccountSigner, sign_serialized};

    let account = Arc::new(PrivateKeySigner::random());
    let address = AccountSigner::address(account.as_ref());

    let mut chain = TestChain::new(CHAIN_ID);
    chain
        .rpc
        .expect_get_transaction_count()
        .with(eq(address), eq(BlockNumberOrTag::Pending))
        .returning(|_, _| Ok(0));
    chain.rpc.expect_estimate_gas().returning(|_| Ok(21_000));

    let resolver = TransactionResolver::builder(chain)
        .classifier(StubClassifier(false))
        .fee_oracle(StubFeeOracle(FeeOverrides::eip1559(10, 1)))
        .build();

    let sender = Sender::Account(account.clone());
    let resolved = resolver.resolve(&transfer(), Some(&sender)).await.unwrap();

    let signed = sign_serialized(account.as_ref(), &resolved).await.unwrap();
    let recovered = signed
        .signature()
        .recover_address_from_prehash(&signed.tx().signature_hash())
        .unwrap();
    assert_eq!(recovered, address);
}
