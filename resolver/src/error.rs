use std::fmt;

use alloy::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};
use txprep_core::{
    deferred::DeferredError,
    error::{EngineError, RpcErrorKind},
};

/// Step of a resolution that ran into a deadline
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionStage {
    Classification,
    VariantFees,
    Calldata,
    Nonce,
    GasEstimate,
    FeeData,
    Fields,
    ExtraGas,
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ResolutionStage::Classification => "chain classification",
            ResolutionStage::VariantFees => "variant gas fee estimation",
            ResolutionStage::Calldata => "calldata encoding",
            ResolutionStage::Nonce => "nonce resolution",
            ResolutionStage::GasEstimate => "gas estimation",
            ResolutionStage::FeeData => "fee data lookup",
            ResolutionStage::Fields => "field resolution",
            ResolutionStage::ExtraGas => "extra gas resolution",
        };
        f.write_str(stage)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum ResolutionError {
    #[error("Chain classification failed for chainId {chain_id}: {message}")]
    ClassificationError {
        chain_id: u64,
        message: String,
        inner_error: EngineError,
    },

    #[error("Variant gas fee estimation failed: {message}")]
    VariantFeeError {
        message: String,
        inner_error: Option<EngineError>,
    },

    #[error("Calldata encoding failed: {message}")]
    EncodingError { message: String },

    #[error("Nonce resolution failed: {message}")]
    NonceResolutionError {
        message: String,
        inner_error: Option<EngineError>,
    },

    #[error("Transaction simulation failed: {message}")]
    SimulationError {
        message: String,
        reverted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        revert_data: Option<Bytes>,
        inner_error: EngineError,
    },

    #[error("Fee data unavailable: {message}")]
    FeeDataError {
        message: String,
        inner_error: EngineError,
    },

    #[error("Failed to resolve `{field}`: {message}")]
    FieldResolutionError { field: String, message: String },

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout {
        stage: ResolutionStage,
        timeout_ms: u64,
    },
}

impl ResolutionError {
    pub fn field(field: &str, error: DeferredError) -> Self {
        ResolutionError::FieldResolutionError {
            field: field.to_string(),
            message: error.to_string(),
        }
    }

    /// The RPC failure underneath, if the error was caused by one
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            ResolutionError::ClassificationError { inner_error, .. }
            | ResolutionError::SimulationError { inner_error, .. }
            | ResolutionError::FeeDataError { inner_error, .. } => Some(inner_error),
            ResolutionError::VariantFeeError { inner_error, .. }
            | ResolutionError::NonceResolutionError { inner_error, .. } => inner_error.as_ref(),
            _ => None,
        }
    }

    /// Whether running the same resolution again could succeed. The resolver itself never
    /// retries; this is for callers that queue resolutions.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolutionError::Timeout { .. } => true,
            ResolutionError::EncodingError { .. }
            | ResolutionError::FieldResolutionError { .. } => false,
            ResolutionError::SimulationError { reverted: true, .. } => false,
            ResolutionError::NonceResolutionError {
                inner_error: None, ..
            } => true,
            _ => match self.engine_error() {
                Some(EngineError::RpcError { kind, .. }) => is_retryable_rpc_error(kind),
                _ => false,
            },
        }
    }
}

pub fn is_retryable_rpc_error(kind: &RpcErrorKind) -> bool {
    match kind {
        RpcErrorKind::TransportHttpError { status, .. } if *status >= 400 && *status < 500 => {
            *status == 429
        }
        RpcErrorKind::UnsupportedFeature { .. } => false,
        RpcErrorKind::ErrorResp(resp) => {
            let message = resp.message.to_lowercase();
            !(message.contains("invalid chain") || message.contains("invalid opcode"))
        }
        _ => true,
    }
}

/// Failures of the in-process nonce allocator
#[derive(Serialize, Deserialize, Debug, Clone, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum NonceAllocationError {
    #[error("Too many nonces in flight for {address} on chainId {chain_id}: {current} >= {max}")]
    MaxInFlightReached {
        chain_id: u64,
        address: Address,
        current: usize,
        max: usize,
    },

    #[error("Failed to sync nonce for {address} on chainId {chain_id}: {message}")]
    SyncFailed {
        chain_id: u64,
        address: Address,
        message: String,
        inner_error: EngineError,
    },
}

impl From<NonceAllocationError> for ResolutionError {
    fn from(error: NonceAllocationError) -> Self {
        let message = error.to_string();
        let inner_error = match error {
            NonceAllocationError::SyncFailed { inner_error, .. } => Some(inner_error),
            NonceAllocationError::MaxInFlightReached { .. } => None,
        };

        ResolutionError::NonceResolutionError {
            message,
            inner_error,
        }
    }
}
