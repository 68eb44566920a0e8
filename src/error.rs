use ethers::{
    contract::{ContractError, EthError},
    providers::{JsonRpcError, Middleware, MiddlewareError, ProviderError},
};
use serde_json::{Value, json};
use std::{fmt, io};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug)]
pub struct JsonRpcErrorPayload {
    pub code: i32,
    pub message: String,
    pub data: Value,
}

impl JsonRpcErrorPayload {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: json!({}),
        }
    }
}

impl AppError {
    pub fn to_json_rpc(&self) -> JsonRpcErrorPayload {
        match self {
            AppError::Config(msg) => JsonRpcErrorPayload::new(-32001, msg.clone()),
            AppError::InvalidInput(msg) => JsonRpcErrorPayload::new(-32602, msg.clone()),
            AppError::Wallet(msg) => JsonRpcErrorPayload::new(-32030, msg.clone()),
            AppError::Io(msg) => JsonRpcErrorPayload::new(-32040, msg.clone()),
            AppError::Serialization(msg) => JsonRpcErrorPayload::new(-32700, msg.clone()),
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl fmt::Display for JsonRpcErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Raw failure signal coming back from the wallet or a contract call.
///
/// Carries whatever the remote side reported: an optional EIP-1193 / JSON-RPC
/// code and a free-text message (which for reverts includes the reason string).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Failure {
    pub code: Option<i64>,
    pub message: String,
}

impl Failure {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self::new(Some(code), message)
    }

    /// Pull the JSON-RPC code and revert reason (if any) out of a middleware error.
    pub fn from_middleware<E: MiddlewareError>(err: &E) -> Self {
        match err.as_error_response() {
            Some(response) => Self::from_error_response(response),
            None => Self::message(err.to_string()),
        }
    }

    pub fn from_contract<M: Middleware>(err: &ContractError<M>) -> Self {
        if let Some(reason) = err.decode_revert::<String>() {
            return Self::message(format!("execution reverted: {reason}"));
        }
        if let Some(inner) = err.as_middleware_error() {
            return Self::from_middleware(inner);
        }
        Self::message(err.to_string())
    }

    fn from_error_response(response: &JsonRpcError) -> Self {
        let reason = response
            .as_revert_data()
            .and_then(|data| String::decode_with_selector(&data));
        let message = match reason {
            Some(reason) if !response.message.contains(&reason) => {
                format!("{}: {reason}", response.message)
            }
            _ => response.message.clone(),
        };
        Self::with_code(response.code, message)
    }
}

impl From<ProviderError> for Failure {
    fn from(err: ProviderError) -> Self {
        Failure::from_middleware(&err)
    }
}
