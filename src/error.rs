//! Error types for the cluster-scheduler crate.

use std::io;

use thiserror::Error;

/// Main error type for driver and detector operations
#[derive(Error, Debug)]
pub enum DriverError {
    /// Process address could not be parsed
    #[error("Malformed process address: {0}")]
    MalformedAddress(String),

    /// No coordination service hosts were supplied
    #[error("No coordination service hosts configured")]
    MissingHosts,

    /// Connection could not be confirmed within the timeout
    #[error("Unable to confirm connection after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    /// Failed to connect to a remote endpoint
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation requires an established session
    #[error("Not connected to coordination service")]
    NotConnected,

    /// Coordination service session expired
    #[error("Session expired")]
    SessionExpired,

    /// Message could not be delivered
    #[error("Message send failed: {0}")]
    SendFailed(String),

    /// Inbound message could not be decoded
    #[error("Failed to decode message: {0}")]
    DecodeError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Transport has been stopped or was never started
    #[error("Transport closed")]
    TransportClosed,

    /// Internal channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Watch could not be armed for the given path
    #[error("Watch error on path {path}: {reason}")]
    WatchError {
        /// Path the watch was rooted at
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Type alias for Result with DriverError
pub type DriverResult<T> = Result<T, DriverError>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DriverError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DriverError::ChannelClosed
    }
}
