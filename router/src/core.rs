//! The router core: owns every in-flight replica operation and runs the
//! single driver loop that polls the transport and routes responses.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use bytes::{Bytes, BytesMut};
use cluster_map::{BlobId, ClusterView};
use futures::{stream::BoxStream, StreamExt};
use rand::seq::SliceRandom;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::{
    blob::{BlobInfo, BlobProperties, GetBlobPayload, GetOption, TTL_INFINITE},
    clock::Clock,
    config::RouterConfig,
    error::RouterError,
    operations::{OpKind, OpOutcome, ReplicaOperation},
    transport::{ReplicaTransport, ResponseInfo},
    BlobRouter,
};

struct OpEntry {
    op: ReplicaOperation,
    completion: oneshot::Sender<Result<OpOutcome, RouterError>>,
}

struct Shared {
    cluster: Arc<dyn ClusterView>,
    transport: Arc<dyn ReplicaTransport>,
    clock: Arc<dyn Clock>,
    config: RouterConfig,
    // In-flight registry. Entries are inserted once at dispatch and removed
    // once at terminal transition, both under this lock; the operation's
    // result slot is set exactly once, so a request cannot complete twice.
    ops: Mutex<HashMap<u64, OpEntry>>,
    // correlation id -> operation handle
    index: Mutex<HashMap<u64, u64>>,
    next_op_id: AtomicU64,
    next_correlation_id: AtomicU64,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

pub struct RouterCore {
    shared: Arc<Shared>,
}

impl RouterCore {
    /// Spawns the driver loop. Must be called from within a tokio runtime.
    pub fn new(
        cluster: Arc<dyn ClusterView>,
        transport: Arc<dyn ReplicaTransport>,
        clock: Arc<dyn Clock>,
        config: RouterConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            cluster,
            transport,
            clock,
            config,
            ops: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
            next_op_id: AtomicU64::new(0),
            next_correlation_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown_tx,
        });
        tokio::spawn(drive(shared.clone(), shutdown_rx));
        Self { shared }
    }

    fn submit(&self, kind: OpKind) -> Result<oneshot::Receiver<Result<OpOutcome, RouterError>>, RouterError> {
        let shared = &self.shared;
        let partition = match &kind {
            OpKind::Put { blob_id, .. } | OpKind::Get { blob_id, .. } | OpKind::Delete { blob_id, .. } => {
                blob_id.partition()
            }
        };
        let replicas = shared.cluster.replicas(partition);
        if replicas.is_empty() {
            return Err(RouterError::InvalidBlobId);
        }
        let now = shared.clock.now_ms();
        let op = ReplicaOperation::new(kind, replicas, &shared.config, now);
        let (tx, rx) = oneshot::channel();
        let op_id = shared.next_op_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut ops = shared.ops.lock().unwrap();
            if shared.closed.load(Ordering::SeqCst) {
                return Err(RouterError::RouterClosed);
            }
            ops.insert(op_id, OpEntry { op, completion: tx });
        }
        dispatch(shared, op_id);
        Ok(rx)
    }

    async fn run(&self, kind: OpKind) -> Result<OpOutcome, RouterError> {
        let rx = self.submit(kind)?;
        rx.await.map_err(|_| RouterError::RouterClosed)?
    }

    fn parse_blob_id(&self, blob_id: &str) -> Result<BlobId, RouterError> {
        BlobId::decode(blob_id, self.shared.cluster.as_ref()).map_err(|err| {
            debug!(%blob_id, %err, "rejecting unparseable blob id");
            RouterError::InvalidBlobId
        })
    }
}

#[async_trait::async_trait]
impl BlobRouter for RouterCore {
    async fn put_blob(
        &self,
        mut properties: BlobProperties,
        user_metadata: Bytes,
        mut body: BoxStream<'static, anyhow::Result<Bytes>>,
    ) -> Result<String, RouterError> {
        if properties.ttl_secs < TTL_INFINITE {
            return Err(RouterError::InvalidPutArgument);
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(RouterError::RouterClosed);
        }
        let mut bytes = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|_| RouterError::BadInputChannel)?;
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > self.shared.config.max_blob_size_bytes {
                return Err(RouterError::BlobTooLarge);
            }
        }
        properties.blob_size = bytes.len() as u64;

        let writable = self.shared.cluster.writable_partitions();
        let partition = *writable
            .choose(&mut rand::thread_rng())
            .ok_or(RouterError::InsufficientCapacity)?;
        // New ids stay at version 1: account and container are resolved
        // through the directory on read, not embedded in the id.
        let blob_id = BlobId::new_v1(self.shared.config.datacenter_id, partition);
        match self
            .run(OpKind::Put {
                blob_id,
                properties,
                user_metadata,
                body: bytes.freeze(),
            })
            .await?
        {
            OpOutcome::Put(id) => Ok(id),
            _ => Err(RouterError::UnexpectedInternalError),
        }
    }

    async fn get_blob(
        &self,
        blob_id: &str,
        options: GetOption,
    ) -> Result<GetBlobPayload, RouterError> {
        let blob_id = self.parse_blob_id(blob_id)?;
        match self.run(OpKind::Get { blob_id, options }).await? {
            OpOutcome::Get(payload) => Ok(payload),
            _ => Err(RouterError::UnexpectedInternalError),
        }
    }

    async fn get_blob_info(
        &self,
        blob_id: &str,
        options: GetOption,
    ) -> Result<BlobInfo, RouterError> {
        self.get_blob(blob_id, options).await.map(|p| p.info)
    }

    async fn delete_blob(
        &self,
        blob_id: &str,
        service_id: Option<&str>,
    ) -> Result<(), RouterError> {
        let blob_id = self.parse_blob_id(blob_id)?;
        match self
            .run(OpKind::Delete {
                blob_id,
                service_id: service_id.map(str::to_string),
            })
            .await?
        {
            OpOutcome::Delete => Ok(()),
            _ => Err(RouterError::UnexpectedInternalError),
        }
    }

    fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shared.shutdown_tx.send(true);
        }
    }
}

impl Drop for RouterCore {
    fn drop(&mut self) {
        self.close();
    }
}

async fn drive(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            batch = shared.transport.poll() => {
                for response in batch {
                    route_response(&shared, response);
                }
                tick(&shared);
            }
        }
    }
    abort_all(&shared);
}

/// Hands one replica response to its owning operation. Responses for
/// operations that already reached a terminal state are discarded.
fn route_response(shared: &Shared, response: ResponseInfo) {
    let op_id = match shared.index.lock().unwrap().remove(&response.correlation_id) {
        Some(op_id) => op_id,
        None => return,
    };
    let completed = {
        let mut ops = shared.ops.lock().unwrap();
        let Some(entry) = ops.get_mut(&op_id) else {
            debug!(
                correlation_id = response.correlation_id,
                "discarding straggler response for completed operation"
            );
            return;
        };
        entry.op.handle_response(response.correlation_id, response.result);
        let terminal = entry.op.is_terminal();
        if terminal {
            ops.remove(&op_id)
        } else {
            None
        }
    };
    match completed {
        Some(mut entry) => complete(entry.op.take_result().unwrap(), entry.completion),
        None => dispatch(shared, op_id),
    }
}

/// One driver tick: expire deadlines and top up the parallelism window of
/// every in-flight operation.
fn tick(shared: &Shared) {
    let now = shared.clock.now_ms();
    let op_ids: Vec<u64> = shared.ops.lock().unwrap().keys().copied().collect();
    for op_id in op_ids {
        let completed = {
            let mut ops = shared.ops.lock().unwrap();
            let Some(entry) = ops.get_mut(&op_id) else {
                continue;
            };
            entry.op.check_deadlines(now);
            let terminal = entry.op.is_terminal();
            if terminal {
                ops.remove(&op_id)
            } else {
                None
            }
        };
        match completed {
            Some(mut entry) => complete(entry.op.take_result().unwrap(), entry.completion),
            None => dispatch(shared, op_id),
        }
    }
}

fn dispatch(shared: &Shared, op_id: u64) {
    let requests = {
        let mut ops = shared.ops.lock().unwrap();
        let Some(entry) = ops.get_mut(&op_id) else {
            return;
        };
        let now = shared.clock.now_ms();
        let requests = entry.op.fetch_requests(&shared.next_correlation_id, now);
        let mut index = shared.index.lock().unwrap();
        for request in &requests {
            index.insert(request.correlation_id, op_id);
        }
        requests
    };
    if !requests.is_empty() {
        shared.transport.send(requests);
    }
}

fn abort_all(shared: &Shared) {
    let entries: Vec<OpEntry> = {
        let mut ops = shared.ops.lock().unwrap();
        ops.drain().map(|(_, entry)| entry).collect()
    };
    shared.index.lock().unwrap().clear();
    if !entries.is_empty() {
        warn!(count = entries.len(), "aborting in-flight operations on router close");
    }
    for mut entry in entries {
        entry.op.abort(RouterError::RouterClosed);
        complete(entry.op.take_result().unwrap(), entry.completion);
    }
}

fn complete(
    result: Result<OpOutcome, RouterError>,
    completion: oneshot::Sender<Result<OpOutcome, RouterError>>,
) {
    // the caller may have gone away; that is not the router's problem
    let _ = completion.send(result);
}
