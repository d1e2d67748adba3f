//! Error types for the Snowflake proxy
//!
//! Every failure the proxy can observe is contained either at the level of
//! one proxy pair or of one broker poll. Nothing here is fatal to the
//! orchestrator: the worst outcome of any error is that a single session is
//! torn down and the next poll tries again.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnowflakeError>;

/// Which side of a proxy pair an event or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    /// WebRTC data channel towards the censored client
    Client,
    /// WebSocket towards the relay
    Relay,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Client => write!(f, "webrtc"),
            Leg::Relay => write!(f, "relay"),
        }
    }
}

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Broker errors (1xx)
    BrokerTimeout = 100,
    BrokerUnexpected = 101,

    // Signaling errors (2xx)
    InvalidOffer = 200,

    // Watchdog errors (3xx)
    SetupTimeout = 300,
    RelayTimeout = 301,

    // Transport errors (4xx)
    TransportError = 400,

    // Configuration errors (8xx)
    ConfigError = 800,
    InvalidUrl = 801,

    // Internal errors (9xx)
    InternalError = 900,
}

/// Main error type for the Snowflake proxy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnowflakeError {
    // ===== Broker Errors =====
    #[error("Broker found no client within its poll window")]
    BrokerTimeout,

    #[error("Unexpected broker response: {0}")]
    BrokerUnexpected(String),

    // ===== Signaling Errors =====
    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    // ===== Watchdog Errors =====
    #[error("Client did not open a data channel in time")]
    SetupTimeout,

    #[error("Timed out connecting to relay")]
    RelayTimeout,

    // ===== Transport Errors =====
    #[error("Transport error on {leg}: {reason}")]
    Transport { leg: Leg, reason: String },

    // ===== Configuration Errors =====
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Internal Errors =====
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SnowflakeError {
    pub fn transport(leg: Leg, reason: impl Into<String>) -> Self {
        SnowflakeError::Transport {
            leg,
            reason: reason.into(),
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            SnowflakeError::BrokerTimeout => ErrorCode::BrokerTimeout,
            SnowflakeError::BrokerUnexpected(_) => ErrorCode::BrokerUnexpected,
            SnowflakeError::InvalidOffer(_) => ErrorCode::InvalidOffer,
            SnowflakeError::SetupTimeout => ErrorCode::SetupTimeout,
            SnowflakeError::RelayTimeout => ErrorCode::RelayTimeout,
            SnowflakeError::Transport { .. } => ErrorCode::TransportError,
            SnowflakeError::InvalidUrl(_) => ErrorCode::InvalidUrl,
            SnowflakeError::Config(_) => ErrorCode::ConfigError,
            SnowflakeError::InvalidState(_) | SnowflakeError::Serialization(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Whether the next broker poll can simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SnowflakeError::BrokerTimeout
                | SnowflakeError::BrokerUnexpected(_)
                | SnowflakeError::InvalidOffer(_)
                | SnowflakeError::SetupTimeout
                | SnowflakeError::RelayTimeout
                | SnowflakeError::Transport { .. }
        )
    }

    /// Whether this error requires user action (configuration change, etc.)
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SnowflakeError::InvalidUrl(_) | SnowflakeError::Config(_)
        )
    }

    /// Get a user-friendly message for display
    pub fn user_message(&self) -> String {
        match self {
            SnowflakeError::BrokerTimeout => "No client is waiting right now.".into(),
            SnowflakeError::BrokerUnexpected(_) => {
                "The broker could not be reached. Will retry.".into()
            }
            SnowflakeError::InvalidOffer(_) => "A client sent an unusable offer.".into(),
            SnowflakeError::SetupTimeout => "A client did not finish connecting.".into(),
            SnowflakeError::RelayTimeout => "The relay did not answer in time.".into(),
            SnowflakeError::Transport { leg, .. } => format!("Disconnected by {}.", leg),
            SnowflakeError::InvalidUrl(_) => {
                "Invalid URL provided. Please check the proxy settings.".into()
            }
            SnowflakeError::Config(_) => {
                "Invalid proxy configuration. Please check your settings.".into()
            }
            SnowflakeError::InvalidState(_) | SnowflakeError::Serialization(_) => {
                "An internal error occurred. Please report this bug.".into()
            }
        }
    }
}

impl From<serde_json::Error> for SnowflakeError {
    fn from(err: serde_json::Error) -> Self {
        SnowflakeError::Serialization(err.to_string())
    }
}

#[cfg(target_arch = "wasm32")]
impl From<SnowflakeError> for wasm_bindgen::JsValue {
    fn from(err: SnowflakeError) -> Self {
        wasm_bindgen::JsValue::from_str(&err.to_string())
    }
}

/// Error information for JavaScript consumption
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: u32,
    pub message: String,
    pub user_message: String,
    pub is_retryable: bool,
}

impl From<&SnowflakeError> for ErrorInfo {
    fn from(err: &SnowflakeError) -> Self {
        ErrorInfo {
            code: err.code() as u32,
            message: err.to_string(),
            user_message: err.user_message(),
            is_retryable: err.is_retryable(),
        }
    }
}
