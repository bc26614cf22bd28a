//! In-process storage replicas and the transport that reaches them.
//!
//! Each datanode of the cluster view is backed by a [`LocalReplica`] holding
//! blobs in memory. This is the storage layer for single-process deployments
//! and the substrate for deterministic tests: replicas can be primed with a
//! fixed error code per blob, or silenced entirely to exercise timeouts.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use cluster_map::{BlobId, DataNodeId};
use tokio::sync::Notify;

use crate::{
    blob::{BlobInfo, BlobProperties, GetOption},
    clock::Clock,
    error::ServerErrorCode,
    transport::{ReplicaRequest, ReplicaResponse, ReplicaTransport, RequestInfo, ResponseInfo},
};

struct StoredBlob {
    properties: BlobProperties,
    user_metadata: Bytes,
    body: Bytes,
    deleted: bool,
}

pub struct LocalReplica {
    blobs: Mutex<HashMap<BlobId, StoredBlob>>,
    primed_errors: Mutex<HashMap<BlobId, ServerErrorCode>>,
    unresponsive: AtomicBool,
}

impl LocalReplica {
    fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            primed_errors: Mutex::new(HashMap::new()),
            unresponsive: AtomicBool::new(false),
        }
    }

    /// Makes every future request for `blob_id` answer with `code` instead
    /// of consulting the store.
    pub fn prime_error(&self, blob_id: BlobId, code: ServerErrorCode) {
        self.primed_errors.lock().unwrap().insert(blob_id, code);
    }

    /// When set, requests are swallowed without a response.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    fn handle(&self, request: &ReplicaRequest, now_ms: u64) -> Option<ReplicaResponse> {
        if self.unresponsive.load(Ordering::SeqCst) {
            return None;
        }
        let blob_id = match request {
            ReplicaRequest::Put { blob_id, .. }
            | ReplicaRequest::Get { blob_id, .. }
            | ReplicaRequest::Delete { blob_id, .. } => *blob_id,
        };
        if let Some(code) = self.primed_errors.lock().unwrap().get(&blob_id) {
            // primed replicas answer with the code verbatim, store untouched
            return Some(ReplicaResponse::error(*code));
        }
        Some(self.answer(request, now_ms))
    }

    fn answer(&self, request: &ReplicaRequest, now_ms: u64) -> ReplicaResponse {
        let mut blobs = self.blobs.lock().unwrap();
        match request {
            ReplicaRequest::Put {
                blob_id,
                properties,
                user_metadata,
                body,
            } => {
                blobs.insert(
                    *blob_id,
                    StoredBlob {
                        properties: properties.clone(),
                        user_metadata: user_metadata.clone(),
                        body: body.clone(),
                        deleted: false,
                    },
                );
                ReplicaResponse::error(ServerErrorCode::NoError)
            }
            ReplicaRequest::Get { blob_id, options } => match blobs.get(blob_id) {
                None => ReplicaResponse::error(ServerErrorCode::BlobNotFound),
                Some(blob) => {
                    if blob.deleted && !options.includes_deleted() {
                        return ReplicaResponse::error(ServerErrorCode::BlobDeleted);
                    }
                    let expired = blob
                        .properties
                        .expires_at_ms()
                        .is_some_and(|at| at <= now_ms);
                    if expired && !options.includes_expired() {
                        return ReplicaResponse::error(ServerErrorCode::BlobExpired);
                    }
                    ReplicaResponse {
                        error: ServerErrorCode::NoError,
                        blob: Some((
                            BlobInfo {
                                properties: blob.properties.clone(),
                                user_metadata: blob.user_metadata.clone(),
                            },
                            blob.body.clone(),
                        )),
                    }
                }
            },
            ReplicaRequest::Delete { blob_id, .. } => match blobs.get_mut(blob_id) {
                None => ReplicaResponse::error(ServerErrorCode::BlobNotFound),
                Some(blob) if blob.deleted => ReplicaResponse::error(ServerErrorCode::BlobDeleted),
                Some(blob) => {
                    blob.deleted = true;
                    ReplicaResponse::error(ServerErrorCode::NoError)
                }
            },
        }
    }
}

/// All replicas of the in-process cluster, keyed by datanode.
pub struct LocalReplicaLayout {
    replicas: Mutex<HashMap<DataNodeId, Arc<LocalReplica>>>,
}

impl LocalReplicaLayout {
    pub fn new() -> Self {
        Self {
            replicas: Mutex::new(HashMap::new()),
        }
    }

    pub fn replica(&self, node: &DataNodeId) -> Arc<LocalReplica> {
        self.replicas
            .lock()
            .unwrap()
            .entry(node.clone())
            .or_insert_with(|| Arc::new(LocalReplica::new()))
            .clone()
    }
}

impl Default for LocalReplicaLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport that answers requests synchronously from the local layout.
/// Responses queue up until the next `poll`.
pub struct LocalTransport {
    layout: Arc<LocalReplicaLayout>,
    clock: Arc<dyn Clock>,
    queue: Mutex<VecDeque<ResponseInfo>>,
    notify: Notify,
}

impl LocalTransport {
    pub fn new(layout: Arc<LocalReplicaLayout>, clock: Arc<dyn Clock>) -> Self {
        Self {
            layout,
            clock,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

#[async_trait::async_trait]
impl ReplicaTransport for LocalTransport {
    fn send(&self, requests: Vec<RequestInfo>) {
        let now = self.clock.now_ms();
        let mut queue = self.queue.lock().unwrap();
        for request in requests {
            let replica = self.layout.replica(&request.replica.node);
            if let Some(response) = replica.handle(&request.request, now) {
                queue.push_back(ResponseInfo {
                    correlation_id: request.correlation_id,
                    replica: request.replica,
                    result: Ok(response),
                });
            }
        }
        drop(queue);
        self.notify.notify_one();
    }

    async fn poll(&self) -> Vec<ResponseInfo> {
        // Return even when idle so the driver keeps checking deadlines.
        let _ = tokio::time::timeout(Duration::from_millis(1), self.notify.notified()).await;
        self.queue.lock().unwrap().drain(..).collect()
    }
}
