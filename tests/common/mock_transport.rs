//! Mock ReplicationTransport for testing.
//!
//! Records every batch and single request for assertions. Replies are
//! scripted per call; with nothing scripted every item is accepted with 200.
//! Individual items can be given their own reply by action and instance id.

use peer_replication::protocol::{
    ReplicationInstanceResponse, ReplicationList, ReplicationListResponse, SingleRequest,
};
use peer_replication::transport::{BatchReply, SingleReply, TransportFuture};
use peer_replication::{Action, InstanceInfo, ReplicationTransport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

/// Scripted reply to one batch exchange.
#[derive(Debug, Clone)]
pub enum BatchScript {
    /// 200 with one reply per item (item overrides apply).
    AcceptAll,
    /// 200 with exactly these item replies.
    Items(Vec<ReplicationInstanceResponse>),
    /// This status and no body.
    Status(u16),
    /// 200 without a body.
    NoBody,
    /// Transport failure.
    Error(TransportError),
}

/// A recorded batch exchange.
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub list: ReplicationList,
    pub at: Instant,
}

impl BatchCall {
    /// `(action, instance id)` for every item, in order.
    pub fn items(&self) -> Vec<(Action, String)> {
        self.list
            .replication_list
            .iter()
            .map(|i| (i.action, i.id.clone()))
            .collect()
    }
}

/// Mock implementation of ReplicationTransport that records all calls.
///
/// # Example
/// ```rust,ignore
/// let transport = MockTransport::new();
///
/// // Configure responses
/// transport.script_batch(BatchScript::Status(503));
/// transport.reply_to_item(Action::Heartbeat, "billing-1", 404, None);
///
/// // Use in tests...
///
/// // Assert what was sent
/// assert_eq!(transport.batches().len(), 2);
/// ```
#[derive(Default)]
pub struct MockTransport {
    batches: Mutex<Vec<BatchCall>>,
    singles: Mutex<Vec<SingleRequest>>,
    batch_script: Mutex<VecDeque<BatchScript>>,
    single_script: Mutex<VecDeque<Result<SingleReply, TransportError>>>,
    /// One-shot item replies keyed by (action, instance id).
    item_replies: Mutex<HashMap<(Action, String), VecDeque<ReplicationInstanceResponse>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply for the next unscripted batch exchange.
    pub fn script_batch(&self, script: BatchScript) {
        self.batch_script.lock().unwrap().push_back(script);
    }

    /// Queue the same reply for the next `n` batch exchanges.
    pub fn script_batches(&self, script: BatchScript, n: usize) {
        let mut queue = self.batch_script.lock().unwrap();
        for _ in 0..n {
            queue.push_back(script.clone());
        }
    }

    /// Queue the outcome for the next single request.
    pub fn script_single(&self, outcome: Result<SingleReply, TransportError>) {
        self.single_script.lock().unwrap().push_back(outcome);
    }

    /// Reply to the next batched `action` for `instance_id` with `status`.
    pub fn reply_to_item(
        &self,
        action: Action,
        instance_id: &str,
        status: u16,
        entity: Option<InstanceInfo>,
    ) {
        let reply = ReplicationInstanceResponse {
            status_code: status,
            response_entity: entity,
        };
        self.item_replies
            .lock()
            .unwrap()
            .entry((action, instance_id.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn batches(&self) -> Vec<BatchCall> {
        self.batches.lock().unwrap().clone()
    }

    pub fn singles(&self) -> Vec<SingleRequest> {
        self.singles.lock().unwrap().clone()
    }

    /// Every item sent in any batch, in send order.
    pub fn sent_items(&self) -> Vec<(Action, String)> {
        self.batches().iter().flat_map(BatchCall::items).collect()
    }

    fn accept_all(&self, list: &ReplicationList) -> ReplicationListResponse {
        let mut overrides = self.item_replies.lock().unwrap();
        ReplicationListResponse {
            response_list: list
                .replication_list
                .iter()
                .map(|item| {
                    overrides
                        .get_mut(&(item.action, item.id.clone()))
                        .and_then(VecDeque::pop_front)
                        .unwrap_or_else(|| ReplicationInstanceResponse::new(200))
                })
                .collect(),
        }
    }
}

impl ReplicationTransport for MockTransport {
    fn send_batch<'a>(&'a self, _peer_id: &'a str, batch: ReplicationList) -> TransportFuture<'a, BatchReply> {
        let script = self
            .batch_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(BatchScript::AcceptAll);

        let outcome = match script {
            BatchScript::AcceptAll => Ok(BatchReply {
                status: 200,
                body: Some(self.accept_all(&batch)),
            }),
            BatchScript::Items(response_list) => Ok(BatchReply {
                status: 200,
                body: Some(ReplicationListResponse { response_list }),
            }),
            BatchScript::Status(status) => Ok(BatchReply { status, body: None }),
            BatchScript::NoBody => Ok(BatchReply {
                status: 200,
                body: None,
            }),
            BatchScript::Error(e) => Err(e),
        };

        self.batches.lock().unwrap().push(BatchCall {
            list: batch,
            at: Instant::now(),
        });
        Box::pin(async move { outcome })
    }

    fn send_single<'a>(&'a self, _peer_id: &'a str, request: SingleRequest) -> TransportFuture<'a, SingleReply> {
        self.singles.lock().unwrap().push(request);
        let outcome = self
            .single_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SingleReply::status(200)));
        Box::pin(async move { outcome })
    }
}
