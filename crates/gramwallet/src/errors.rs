use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A structured error suitable for returning to a page client inside a JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }
}

pub const RPC_INVALID_REQUEST: i64 = -32600;
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
pub const RPC_INVALID_PARAMS: i64 = -32602;
pub const RPC_INTERNAL_ERROR: i64 = -32603;
pub const RPC_UNAUTHORIZED: i64 = 4100;
pub const RPC_WALLET_BUSY: i64 = 4001;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Bad amount or address. Rejected locally without any user-visible notice.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Wrong password or corrupt vault. The two are indistinguishable.
    #[error("authentication failed")]
    Authentication,

    #[error("hardware transport error: {0}")]
    Transport(String),

    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    #[error("unknown transport type: {0}")]
    UnknownTransportType(String),

    #[error("a transfer is already pending")]
    AlreadyPending,

    #[error("{0} timed out")]
    TransportTimeout(&'static str),

    #[error("no active wallet session")]
    NotInitialized,

    #[error("no hardware signer for this wallet")]
    HardwareUnavailable,
}

impl WalletError {
    /// Whether the UI must be told about this failure (closing any modal and alerting).
    pub const fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Broadcast(_) | Self::TransportTimeout(_)
        )
    }
}

impl From<WalletError> for RpcError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Validation(msg) => Self::new(RPC_INVALID_PARAMS, msg),
            WalletError::Authentication => Self::new(RPC_UNAUTHORIZED, "authentication failed"),
            WalletError::AlreadyPending => {
                Self::new(RPC_WALLET_BUSY, "a transfer is already pending")
            }
            WalletError::NotInitialized => Self::new(RPC_UNAUTHORIZED, "wallet not initialized"),
            other @ (WalletError::Transport(_)
            | WalletError::Broadcast(_)
            | WalletError::UnknownTransportType(_)
            | WalletError::TransportTimeout(_)
            | WalletError::HardwareUnavailable) => {
                Self::new(RPC_INTERNAL_ERROR, other.to_string())
            }
        }
    }
}
