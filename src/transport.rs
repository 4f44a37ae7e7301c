// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication transport contract.
//!
//! The transport is what actually reaches a peer. This crate consumes it
//! through [`ReplicationTransport`]; [`HttpReplicationTransport`](crate::http::HttpReplicationTransport)
//! is the bundled HTTP implementation and tests plug in mocks.
//!
//! # Status Codes
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `2xx` | Accepted |
//! | `503` | Peer busy: congestion, retry later without penalty |
//! | `404` | Peer does not know this instance |
//! | other | Permanent application-level rejection |
//!
//! Transport failures come back as [`TransportError`]. Read timeouts are
//! congestion; connect/reset/refused/I-O failures are network failures;
//! TLS failures are network failures that are never retried.

use crate::protocol::{ReplicationList, ReplicationListResponse, SingleRequest};
use crate::instance::InstanceInfo;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// HTTP status a peer returns when it is overloaded.
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// HTTP status a peer returns when it has no record of an instance.
pub const STATUS_NOT_FOUND: u16 = 404;

/// Type alias for boxed transport futures (reduces trait signature complexity).
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Transport-level failure reaching a peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("connect timed out: {0}")]
    ConnectTimeout(String),

    /// The peer accepted the connection but did not answer in time.
    #[error("read timed out: {0}")]
    ReadTimeout(String),

    /// Handshake or certificate failure.
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// Reply could not be understood (not a network failure).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Network-layer failure that counts toward the peer's failure counter.
    pub fn is_network(&self) -> bool {
        match self {
            Self::ConnectionRefused(_)
            | Self::ConnectionReset(_)
            | Self::ConnectTimeout(_)
            | Self::Tls(_)
            | Self::Io(_) => true,
            Self::ReadTimeout(_) | Self::Protocol(_) => false,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub fn is_read_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout(_))
    }
}

/// Reply to a standalone request.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleReply {
    pub status: u16,
    /// Peer's instance record, when it sent one (e.g. heartbeat conflicts).
    pub body: Option<InstanceInfo>,
}

impl SingleReply {
    pub fn status(status: u16) -> Self {
        Self { status, body: None }
    }
}

/// Reply to a batch request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReply {
    pub status: u16,
    /// Per-item replies; present when `status` is 2xx.
    pub body: Option<ReplicationListResponse>,
}

/// How this crate reaches a peer.
///
/// Implementations must not retry internally: one call is one network
/// round trip, and the caller does the classification.
pub trait ReplicationTransport: Send + Sync + 'static {
    /// Send a whole batch in one exchange.
    fn send_batch<'a>(
        &'a self,
        peer_id: &'a str,
        batch: ReplicationList,
    ) -> TransportFuture<'a, BatchReply>;

    /// Send one non-batched request.
    fn send_single<'a>(
        &'a self,
        peer_id: &'a str,
        request: SingleRequest,
    ) -> TransportFuture<'a, SingleReply>;
}

/// Returns `true` for 2xx statuses.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
