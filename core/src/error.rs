use alloy::{
    primitives::Bytes,
    transports::{
        RpcError as AlloyRpcError, TransportErrorKind, http::reqwest::header::InvalidHeaderValue,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::Chain;

/// JSON-RPC error code for "method not found"
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

#[derive(Debug, Error, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response: {0}")]
    ErrorResp(RpcErrorResponse),

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    /// Rpc server returned an unsupported feature.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Returned when a local pre-processing step fails.
    #[error("local usage error: {message}")]
    InternalError { message: String },

    /// JSON serialization error.
    #[error("serialization error: {message}")]
    SerError {
        // sourced from serde_json::Error, kept apart from DeserError on purpose
        message: String,
    },

    /// JSON deserialization error.
    #[error("deserialization error: {message}, text: {text}")]
    DeserError {
        message: String,
        /// The text that failed to deserialize.
        text: String,
    },

    #[error("HTTP error {status}")]
    TransportHttpError { status: u16, body: String },

    #[error("Other transport error: {message}")]
    OtherTransportError { message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, utoipa::ToSchema)]
pub struct RpcErrorResponse {
    /// The error code.
    pub code: i64,
    /// The error message (if any).
    pub message: String,
    /// The raw JSON error data (if any).
    pub data: Option<String>,
}

impl std::fmt::Display for RpcErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, ", data: {data}")?;
        }
        Ok(())
    }
}

/// `{"error": {...}}` envelope some providers send along with an HTTP error status
#[derive(Deserialize)]
struct HttpErrorBody {
    error: HttpErrorObject,
}

#[derive(Deserialize)]
struct HttpErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl RpcErrorResponse {
    /// JSON-RPC error carried in the body of an HTTP error reply, if the body is one
    pub fn from_http_body(body: &str) -> Option<Self> {
        let HttpErrorBody { error } = serde_json::from_str(body).ok()?;

        Some(Self {
            code: error.code,
            message: error.message,
            data: error.data.map(|data| data.to_string()),
        })
    }

    /// Revert payload carried in the `data` member, if it is a non-empty hex string.
    pub fn revert_data(&self) -> Option<Bytes> {
        let data = self.data.as_deref()?.trim().trim_matches('"');
        data.parse::<Bytes>().ok().filter(|bytes| !bytes.is_empty())
    }

    /// Some providers drop the revert payload and only mention it in the message.
    pub fn is_revert(&self) -> bool {
        self.revert_data().is_some() || self.message.to_lowercase().contains("revert")
    }

    pub fn is_method_not_found(&self) -> bool {
        if self.code == METHOD_NOT_FOUND_CODE {
            return true;
        }

        let message = self.message.to_lowercase();
        message.contains("method not found")
            || message.contains("does not exist")
            || message.contains("not supported")
            || message.contains("unsupported method")
    }
}

#[derive(Error, Debug, Serialize, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum EngineError {
    #[schema(title = "EVM RPC Error")]
    #[error("RPC error on chain {chain_id} at {rpc_url}: {message}")]
    RpcError {
        chain_id: u64,
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[schema(title = "RPC Configuration Error")]
    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },

    #[schema(title = "Validation Error")]
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[schema(title = "Signing Error")]
    #[error("Signing error: {message}")]
    SigningError { message: String },

    #[schema(title = "Internal Error")]
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl EngineError {
    /// The JSON-RPC error response behind this error, when the node answered with one.
    pub fn rpc_error_response(&self) -> Option<&RpcErrorResponse> {
        match self {
            EngineError::RpcError {
                kind: RpcErrorKind::ErrorResp(resp),
                ..
            } => Some(resp),
            _ => None,
        }
    }

    /// The node does not know the method. Also recognised when the answer is an HTTP 4xx
    /// whose body is a JSON-RPC error.
    pub fn is_method_not_found(&self) -> bool {
        match self {
            EngineError::RpcError {
                kind: RpcErrorKind::ErrorResp(resp),
                ..
            } => resp.is_method_not_found(),
            EngineError::RpcError {
                kind: RpcErrorKind::TransportHttpError { status, body },
                ..
            } if (400..500).contains(status) => RpcErrorResponse::from_http_body(body)
                .is_some_and(|resp| resp.is_method_not_found()),
            _ => false,
        }
    }
}

impl From<InvalidHeaderValue> for EngineError {
    fn from(err: InvalidHeaderValue) -> Self {
        EngineError::RpcConfigError {
            message: format!("Invalid header value: {err}"),
        }
    }
}

pub trait AlloyRpcErrorToEngineError {
    fn to_engine_error(&self, chain: &(impl Chain + ?Sized)) -> EngineError;
}

fn to_engine_rpc_error_kind(err: &AlloyRpcError<TransportErrorKind>) -> RpcErrorKind {
    match err {
        AlloyRpcError::ErrorResp(err) => RpcErrorKind::ErrorResp(RpcErrorResponse {
            code: err.code,
            message: err.message.to_string(),
            data: err.data.as_ref().map(|data| data.to_string()),
        }),
        AlloyRpcError::NullResp => RpcErrorKind::NullResp,
        AlloyRpcError::UnsupportedFeature(feature) => RpcErrorKind::UnsupportedFeature {
            message: feature.to_string(),
        },
        AlloyRpcError::LocalUsageError(err) => RpcErrorKind::InternalError {
            message: err.to_string(),
        },
        AlloyRpcError::SerError(err) => RpcErrorKind::SerError {
            message: err.to_string(),
        },
        AlloyRpcError::DeserError { err, text } => RpcErrorKind::DeserError {
            message: err.to_string(),
            text: text.to_string(),
        },
        AlloyRpcError::Transport(err) => match err {
            TransportErrorKind::HttpError(err) => RpcErrorKind::TransportHttpError {
                status: err.status,
                body: err.body.to_string(),
            },
            _ => RpcErrorKind::OtherTransportError {
                message: err.to_string(),
            },
        },
    }
}

impl AlloyRpcErrorToEngineError for AlloyRpcError<TransportErrorKind> {
    fn to_engine_error(&self, chain: &(impl Chain + ?Sized)) -> EngineError {
        EngineError::RpcError {
            chain_id: chain.chain_id(),
            rpc_url: chain.rpc_url().to_string(),
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }
}
