//! Crate-level error type
//!
//! Each layer has its own error enum; [`ClientError`] wraps them for callers
//! of the client facade and the binary.

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::protocol::DecodeError;
use crate::transport::AmqpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Broker error: {0}")]
    Broker(#[from] AmqpError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Notification API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether retrying later may succeed without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Broker(_) => true,
            ClientError::Api(e) => e.is_transient(),
            ClientError::Serialization(_) | ClientError::Decode(_) | ClientError::Config(_) => {
                false
            }
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
