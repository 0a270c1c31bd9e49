use alloy::{
    network::{TransactionBuilder, TransactionBuilder7702},
    primitives::Address,
    rpc::types::{TransactionInput, TransactionRequest},
};
use txprep_core::{
    deferred::{MaybeDeferred, resolve_optional},
    transaction::TransactionDescriptor,
};

use crate::{encoder::encode_calldata, error::ResolutionError};

pub(crate) async fn resolve_field<T: Clone>(
    field: &str,
    value: &Option<MaybeDeferred<T>>,
) -> Result<Option<T>, ResolutionError> {
    resolve_optional(value)
        .await
        .map_err(|e| ResolutionError::field(field, e))
}

/// Literal value of a field, without running producers
pub(crate) fn literal<T: Copy>(value: &Option<MaybeDeferred<T>>) -> Option<T> {
    value.as_ref().and_then(MaybeDeferred::as_literal).copied()
}

/// Request used to simulate the descriptor (`eth_estimateGas`, `zks_estimateFee`)
pub(crate) async fn simulation_request(
    from: Option<Address>,
    transaction: &TransactionDescriptor,
) -> Result<TransactionRequest, ResolutionError> {
    let (data, to, value, access_list, authorization_list) = tokio::try_join!(
        encode_calldata(transaction),
        resolve_field("to", &transaction.to),
        resolve_field("value", &transaction.value),
        resolve_field("accessList", &transaction.access_list),
        resolve_field("authorizationList", &transaction.authorization_list),
    )?;

    let mut request = TransactionRequest::default();
    // some zkSync nodes only read `data`
    request.input = TransactionInput::both(data);

    if let Some(from) = from {
        request = request.with_from(from);
    }
    if let Some(to) = to {
        request = request.with_to(to);
    }
    if let Some(value) = value {
        request = request.with_value(value);
    }
    if let Some(access_list) = access_list {
        request = request.with_access_list(access_list);
    }
    if let Some(authorization_list) = authorization_list {
        request = request.with_authorization_list(authorization_list);
    }

    Ok(request)
}
