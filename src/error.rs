//! Error taxonomy shared by the signer, relay clients, watcher and analyzer.
//!
//! Relay-reported failures are data, not errors: every relay call returns
//! `Result<RelayResult<T>>`, where the outer layer carries transport and
//! validation failures and the inner layer carries the relay's own
//! `{"error": {"message", "code"}}` envelope.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured error envelope returned by a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("relay error {code}: {message}")]
pub struct RelayError {
    pub message: String,
    #[serde(default)]
    pub code: i64,
}

impl RelayError {
    /// Builds an envelope from whatever a relay put under `"error"`.
    /// Some builders answer with a bare string instead of an object.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self { message, code: 0 },
            Value::Object(ref map) => Self {
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| value.to_string()),
                code: map.get("code").and_then(Value::as_i64).unwrap_or(0),
            },
            other => Self {
                message: other.to_string(),
                code: 0,
            },
        }
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// Network failure, timeout or an unparseable response body.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("leg {index}: nonce must be a JSON number")]
    InvalidNonceFormat { index: usize },

    #[error("leg {index}: {reason}")]
    InvalidLeg { index: usize, reason: String },

    #[error("could not decode signed transaction: {0}")]
    CouldNotDecodeSignedTransaction(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("chain provider error: {0}")]
    Provider(String),

    #[error("inclusion watch timed out after {0:?}")]
    Timeout(Duration),

    #[error("block subscription closed before the watch resolved")]
    SubscriptionClosed,

    #[error("no relay accepted the bundle")]
    NoRelayAccepted,

    #[error("bundle not included after {attempts} attempts (last target block {last_target_block})")]
    MaxRetriesExceeded { attempts: u32, last_target_block: u64 },

    #[error("bundle simulation failed: {0}")]
    SimulationFailed(String),

    #[error("target bundle errors at the top of block {0}")]
    TargetBundleReverts(u64),

    #[error("blocks index has not processed block {target} yet (latest {latest})")]
    BlocksIndexBehind { target: u64, latest: u64 },

    #[error("bundle has no transactions")]
    EmptyBundle,

    #[error("invalid target block: {0}")]
    InvalidTargetBlock(String),
}

impl BundleError {
    /// True for failures caused by the caller's input rather than the network.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            BundleError::InvalidNonceFormat { .. }
                | BundleError::InvalidLeg { .. }
                | BundleError::CouldNotDecodeSignedTransaction(_)
                | BundleError::EmptyBundle
                | BundleError::InvalidTargetBlock(_)
        )
    }
}

impl From<reqwest::Error> for BundleError {
    fn from(err: reqwest::Error) -> Self {
        BundleError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for BundleError {
    fn from(err: serde_json::Error) -> Self {
        BundleError::Transport(format!("malformed JSON: {err}"))
    }
}

impl From<alloy::transports::TransportError> for BundleError {
    fn from(err: alloy::transports::TransportError) -> Self {
        BundleError::Provider(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
