/**
 * Error types.
 *
 * Two layers:
 * - `TransportError`: the error surface of a transport implementation.
 * - `PublishError`: what the publisher reports to its caller.
 *
 * A send that fails *after* it was accepted by the transport never shows up
 * here: the caller's fallback is the only channel for asynchronous failure.
 */
use thiserror::Error;

use crate::protocol::types::SendKey;

/// Result alias for publisher operations.
pub type Result<T> = std::result::Result<T, PublishError>;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Failures reported by a `Transport` implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection string could not be used to open the transport.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// A tuning option was rejected during `configure`.
    #[error("option {name} rejected: {reason}")]
    InvalidOption {
        /// Name of the rejected option.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A message could not be built from the payload.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The transport refused to queue the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The transport has already been closed.
    #[error("transport is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// PublishError
// ---------------------------------------------------------------------------

/// Errors returned by `Publisher` construction and `send`.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Opening or configuring the transport failed. Fatal for the publisher.
    #[error("failed to initialize transport: {0}")]
    TransportInit(#[source] TransportError),

    /// A publisher option is out of range. Fatal for the publisher.
    #[error("option {name} rejected: {reason}")]
    InvalidOption {
        /// Name of the rejected option.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The payload could not be turned into a message. Nothing was queued.
    #[error("failed to construct message: {reason}")]
    MessageConstruction {
        /// Why construction failed.
        reason: String,
    },

    /// The transport refused the message. The fallback has already run.
    #[error("failed to submit send {key}: {source}")]
    Submission {
        /// Key the send would have been registered under.
        key: SendKey,
        #[source]
        source: TransportError,
    },

    /// The generated key is already pending. Nothing was queued.
    #[error("send key {0} is already pending")]
    KeyCollision(SendKey),

    /// The background driver thread could not be started.
    #[error("failed to spawn driver thread: {0}")]
    DriverSpawn(#[source] std::io::Error),
}
