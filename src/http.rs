// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP implementation of [`ReplicationTransport`].
//!
//! # Endpoints
//!
//! | Request | Method | Path |
//! |---------|--------|------|
//! | batch | `POST` | `{url}/peerreplication/batch/` |
//! | register | `POST` | `{url}/apps/{app}` |
//! | cancel | `DELETE` | `{url}/apps/{app}/{id}` |
//! | heartbeat | `PUT` | `{url}/apps/{app}/{id}?status=&lastDirtyTimestamp=&overriddenstatus=` |
//! | status update | `PUT` | `{url}/apps/{app}/{id}/status?value=&lastDirtyTimestamp=` |
//! | delete override | `DELETE` | `{url}/apps/{app}/{id}/status?lastDirtyTimestamp=` |
//! | resource group | `PUT` | `{url}/asg/{group}/status?value=` |
//!
//! Every request carries [`REPLICATION_HEADER`]` = true` so the peer does
//! not replicate it onwards.
//!
//! Path parameters are percent-encoded as single path segments.
//!
//! Connect timeouts are network failures; the overall request timeout is the
//! read timeout and surfaces as [`TransportError::ReadTimeout`]. TLS failures
//! are recognised by a `rustls::Error` in the source chain, never by message
//! text.

use crate::config::{PeerConfig, ReplicationSettings};
use crate::error::{ReplicationError, Result};
use crate::instance::InstanceInfo;
use crate::protocol::{ReplicationList, ReplicationListResponse, SingleRequest};
use crate::task::Action;
use crate::transport::{is_success, BatchReply, ReplicationTransport, SingleReply, TransportError, TransportFuture};
use reqwest::{Method, RequestBuilder, Url};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::io::ErrorKind;
use tracing::trace;

/// Header marking a request as peer replication.
pub const REPLICATION_HEADER: &str = "x-netflix-discovery-replication";

/// Reaches peers over HTTP. One instance serves every configured peer.
#[derive(Debug, Clone)]
pub struct HttpReplicationTransport {
    client: reqwest::Client,
    /// peer node id -> base service URL
    peers: HashMap<String, Url>,
}

impl HttpReplicationTransport {
    pub fn new(peers: &[PeerConfig], settings: &ReplicationSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout())
            .build()
            .map_err(|e| ReplicationError::Config(format!("cannot build HTTP client: {}", e)))?;

        let mut by_peer = HashMap::with_capacity(peers.len());
        for peer in peers {
            let url = Url::parse(&peer.service_url).map_err(|e| {
                ReplicationError::Config(format!(
                    "peer {} has an invalid service_url '{}': {}",
                    peer.node_id, peer.service_url, e
                ))
            })?;
            if url.cannot_be_a_base() {
                return Err(ReplicationError::Config(format!(
                    "peer {} service_url '{}' cannot carry a path",
                    peer.node_id, peer.service_url
                )));
            }
            by_peer.insert(peer.node_id.clone(), url);
        }

        Ok(Self {
            client,
            peers: by_peer,
        })
    }

    /// Peer base URL extended by `segments`, each encoded as one path segment.
    fn endpoint(&self, peer_id: &str, segments: &[&str]) -> std::result::Result<Url, TransportError> {
        let mut url = self
            .peers
            .get(peer_id)
            .cloned()
            .ok_or_else(|| TransportError::Protocol(format!("no service URL for peer {}", peer_id)))?;
        url.path_segments_mut()
            .map_err(|_| TransportError::Protocol(format!("service URL for peer {} cannot carry a path", peer_id)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).header(REPLICATION_HEADER, "true")
    }

    fn single_request(&self, peer_id: &str, request: SingleRequest) -> std::result::Result<RequestBuilder, TransportError> {
        let wire = match request {
            SingleRequest::ResourceGroupStatus { group_name, status } => {
                let url = self.endpoint(peer_id, &["asg", group_name.as_str(), "status"])?;
                return Ok(self.request(Method::PUT, url).query(&[("value", status.as_str())]));
            }
            SingleRequest::Instance(wire) => wire,
        };

        let app = wire.app_name.as_str();
        let id = wire.id.as_str();
        let dirty = wire.last_dirty_timestamp.map(|ts| ts.to_string());

        let builder = match wire.action {
            Action::Register => {
                let info = wire.instance_info.as_ref().ok_or_else(|| {
                    TransportError::Protocol("register request without instance record".to_string())
                })?;
                self.request(Method::POST, self.endpoint(peer_id, &["apps", app])?).json(info)
            }
            Action::Cancel => self.request(Method::DELETE, self.endpoint(peer_id, &["apps", app, id])?),
            Action::Heartbeat => {
                let mut query = Vec::new();
                push_opt(&mut query, "status", wire.status.as_deref());
                push_opt(&mut query, "lastDirtyTimestamp", dirty.as_deref());
                push_opt(&mut query, "overriddenstatus", wire.overridden_status.as_deref());
                self.request(Method::PUT, self.endpoint(peer_id, &["apps", app, id])?).query(&query)
            }
            Action::StatusUpdate => {
                let mut query = Vec::new();
                push_opt(&mut query, "value", wire.status.as_deref());
                push_opt(&mut query, "lastDirtyTimestamp", dirty.as_deref());
                self.request(Method::PUT, self.endpoint(peer_id, &["apps", app, id, "status"])?)
                    .query(&query)
            }
            Action::DeleteStatusOverride => {
                let mut query = Vec::new();
                push_opt(&mut query, "lastDirtyTimestamp", dirty.as_deref());
                self.request(Method::DELETE, self.endpoint(peer_id, &["apps", app, id, "status"])?)
                    .query(&query)
            }
        };
        Ok(builder)
    }
}

fn push_opt<'a>(query: &mut Vec<(&'static str, &'a str)>, key: &'static str, value: Option<&'a str>) {
    if let Some(value) = value {
        query.push((key, value));
    }
}

impl ReplicationTransport for HttpReplicationTransport {
    fn send_batch<'a>(&'a self, peer_id: &'a str, batch: ReplicationList) -> TransportFuture<'a, BatchReply> {
        Box::pin(async move {
            let url = self.endpoint(peer_id, &["peerreplication", "batch", ""])?;
            let response = self
                .request(Method::POST, url)
                .json(&batch)
                .send()
                .await
                .map_err(|e| map_reqwest_error(&e))?;

            let status = response.status().as_u16();
            trace!(peer_id, status, batch_size = batch.len(), "Batch reply received");
            if !is_success(status) {
                return Ok(BatchReply { status, body: None });
            }

            let body: ReplicationListResponse =
                response.json().await.map_err(|e| map_reqwest_error(&e))?;
            Ok(BatchReply {
                status,
                body: Some(body),
            })
        })
    }

    fn send_single<'a>(&'a self, peer_id: &'a str, request: SingleRequest) -> TransportFuture<'a, SingleReply> {
        Box::pin(async move {
            let action = request.action();
            let response = self
                .single_request(peer_id, request)?
                .send()
                .await
                .map_err(|e| map_reqwest_error(&e))?;

            let status = response.status().as_u16();
            let text = response.text().await.map_err(|e| map_reqwest_error(&e))?;
            // Peers answer heartbeat conflicts with their own record; other
            // bodies are informational.
            let body = if text.trim().is_empty() {
                None
            } else {
                serde_json::from_str::<InstanceInfo>(&text).ok()
            };
            trace!(peer_id, status, action = %action, has_body = body.is_some(), "Single reply received");
            Ok(SingleReply { status, body })
        })
    }
}

/// Map a reqwest failure onto the classifier's error taxonomy.
fn map_reqwest_error(e: &reqwest::Error) -> TransportError {
    let detail = error_chain(e);

    if e.is_timeout() {
        return if e.is_connect() {
            TransportError::ConnectTimeout(detail)
        } else {
            TransportError::ReadTimeout(detail)
        };
    }

    if let Some(kind) = io_error_kind(e) {
        match kind {
            ErrorKind::ConnectionRefused => return TransportError::ConnectionRefused(detail),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                return TransportError::ConnectionReset(detail)
            }
            ErrorKind::TimedOut => return TransportError::ReadTimeout(detail),
            _ => {}
        }
    }

    if has_tls_cause(e) {
        return TransportError::Tls(detail);
    }
    if e.is_decode() || e.is_builder() || e.is_redirect() || e.is_status() {
        return TransportError::Protocol(detail);
    }
    TransportError::Io(detail)
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut detail = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

fn io_error_kind(e: &reqwest::Error) -> Option<ErrorKind> {
    let mut source = e.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = cause.source();
    }
    None
}

/// True when a `rustls::Error` sits anywhere in the chain. The TLS stack
/// hands it up wrapped in an `io::Error`, whose `source()` skips the payload,
/// so the payload is checked explicitly.
fn has_tls_cause(e: &(dyn StdError + 'static)) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(cause) = source {
        if cause.is::<rustls::Error>() {
            return true;
        }
        if let Some(inner) = cause
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
        {
            if has_tls_cause(inner) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
