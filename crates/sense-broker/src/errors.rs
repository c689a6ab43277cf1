// src/errors.rs

//! The error type shared by every broker-facing operation.

use thiserror::Error;

/// Failure kinds a `Broker` implementation can surface. Mirrors the error
/// taxonomy: transient connection failures, subscription faults, and
/// malformed payloads are all represented distinctly so callers can decide
/// whether to retry, log, or propagate.
#[derive(Error, Debug)]
pub enum SenseError {
    #[error("broker connection error: {0}")]
    Connect(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("timed out waiting for response after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed payload on channel '{channel}': {message}")]
    MalformedPayload { channel: String, message: String },
}

pub type Result<T> = std::result::Result<T, SenseError>;
