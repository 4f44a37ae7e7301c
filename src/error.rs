// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for peer replication.
//!
//! Replication outcomes are never surfaced to callers as errors: a failed
//! exchange is classified by the [`TaskProcessor`](crate::processor::TaskProcessor)
//! into a [`ProcessingResult`](crate::processor::ProcessingResult) and
//! recorded on the task. [`ReplicationError`] covers everything else:
//! construction, configuration, and calls made against a client that is
//! shutting down.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` | Yes | Peer unreachable while building or priming a connection |
//! | `Config` | No | Configuration invalid |
//! | `Serialization` | No | Wire payload could not be encoded/decoded |
//! | `InvalidState` | No | Client state machine violation |
//! | `Shutdown` | No | Client is shutting down |
//! | `Internal` | No | Unexpected internal error |

use crate::transport::TransportError;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur outside of task classification.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Transport failure talking to a peer.
    ///
    /// Retryable: the peer may come back.
    #[error("Transport error ({peer_id}): {source}")]
    Transport {
        peer_id: String,
        #[source]
        source: TransportError,
    },

    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., submitting to a stopped client).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    ///
    /// Returned when operations are attempted during shutdown.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a transport error for a peer.
    pub fn transport(peer_id: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            peer_id: peer_id.into(),
            source,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_network() && !source.is_tls(),
            Self::Config(_) => false,
            Self::Serialization(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}
