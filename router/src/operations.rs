//! Per-operation state machines driving the replica fan-out.

use std::collections::HashMap;

use bytes::Bytes;
use cluster_map::{BlobId, ReplicaId};

use crate::{
    blob::{BlobProperties, GetBlobPayload, GetOption},
    config::RouterConfig,
    error::{RouterError, ServerErrorCode},
    tracker::OperationTracker,
    transport::{ReplicaRequest, ReplicaResponse, RequestInfo, TransportError},
};

/// Why one replica request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureCause {
    Code(ServerErrorCode),
    RequestTimedOut,
}

#[derive(Debug)]
pub(crate) enum OpKind {
    Put {
        blob_id: BlobId,
        properties: BlobProperties,
        user_metadata: Bytes,
        body: Bytes,
    },
    Get {
        blob_id: BlobId,
        options: GetOption,
    },
    Delete {
        blob_id: BlobId,
        service_id: Option<String>,
    },
}

#[derive(Debug)]
pub(crate) enum OpOutcome {
    Put(String),
    Get(GetBlobPayload),
    Delete,
}

/// One logical router operation: a fan-out over the replicas of a single
/// partition, tracked against a success target, resolving heterogeneous
/// per-replica error codes into one router-level outcome.
///
/// The terminal result is set exactly once; responses arriving afterwards
/// are discarded by the router core.
pub(crate) struct ReplicaOperation {
    kind: OpKind,
    tracker: OperationTracker,
    // correlation id -> request deadline
    inflight: HashMap<u64, u64>,
    failures: Vec<FailureCause>,
    payload: Option<GetBlobPayload>,
    deadline_ms: u64,
    request_timeout_ms: u64,
    result: Option<Result<OpOutcome, RouterError>>,
}

impl ReplicaOperation {
    pub fn new(kind: OpKind, replicas: Vec<ReplicaId>, config: &RouterConfig, now_ms: u64) -> Self {
        let (parallelism, success_target) = match &kind {
            OpKind::Put { .. } => (config.put_parallelism, config.put_success_target),
            OpKind::Get { .. } => (config.get_parallelism, config.get_success_target),
            OpKind::Delete { .. } => (config.delete_parallelism, config.delete_success_target),
        };
        let success_target = success_target.min(replicas.len().max(1));
        Self {
            kind,
            tracker: OperationTracker::new(replicas, parallelism, success_target),
            inflight: HashMap::new(),
            failures: Vec::new(),
            payload: None,
            deadline_ms: now_ms + config.operation_timeout_ms,
            request_timeout_ms: config.request_timeout_ms,
            result: None,
        }
    }

    /// Replica requests to issue now, within the parallelism window.
    pub fn fetch_requests(
        &mut self,
        next_correlation_id: &std::sync::atomic::AtomicU64,
        now_ms: u64,
    ) -> Vec<RequestInfo> {
        let mut requests = Vec::new();
        if self.result.is_some() {
            return requests;
        }
        while let Some(replica) = self.tracker.next_replica() {
            let correlation_id =
                next_correlation_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inflight
                .insert(correlation_id, now_ms + self.request_timeout_ms);
            requests.push(RequestInfo {
                correlation_id,
                replica,
                request: self.replica_request(),
            });
        }
        requests
    }

    fn replica_request(&self) -> ReplicaRequest {
        match &self.kind {
            OpKind::Put {
                blob_id,
                properties,
                user_metadata,
                body,
            } => ReplicaRequest::Put {
                blob_id: *blob_id,
                properties: properties.clone(),
                user_metadata: user_metadata.clone(),
                body: body.clone(),
            },
            OpKind::Get { blob_id, options } => ReplicaRequest::Get {
                blob_id: *blob_id,
                options: *options,
            },
            OpKind::Delete {
                blob_id,
                service_id,
            } => ReplicaRequest::Delete {
                blob_id: *blob_id,
                service_id: service_id.clone(),
            },
        }
    }

    pub fn handle_response(
        &mut self,
        correlation_id: u64,
        result: Result<ReplicaResponse, TransportError>,
    ) {
        if self.inflight.remove(&correlation_id).is_none() || self.result.is_some() {
            return;
        }
        match result {
            Ok(response) => self.on_replica_code(response),
            Err(_) => {
                self.tracker.record_failure();
                self.failures
                    .push(FailureCause::Code(ServerErrorCode::ReplicaUnavailable));
            }
        }
        self.maybe_complete();
    }

    fn on_replica_code(&mut self, response: ReplicaResponse) {
        match response.error {
            ServerErrorCode::NoError => {
                self.tracker.record_success();
                if let (OpKind::Get { .. }, Some((info, body)), None) =
                    (&self.kind, response.blob, &self.payload)
                {
                    self.payload = Some(GetBlobPayload { info, body });
                }
            }
            // Positive proof about the blob terminates the operation at
            // once, regardless of the success count.
            ServerErrorCode::BlobDeleted if self.short_circuits() => {
                self.tracker.record_failure();
                self.failures
                    .push(FailureCause::Code(ServerErrorCode::BlobDeleted));
                self.result = Some(Err(RouterError::BlobDeleted));
            }
            ServerErrorCode::BlobExpired if self.get_short_circuits() => {
                self.tracker.record_failure();
                self.failures
                    .push(FailureCause::Code(ServerErrorCode::BlobExpired));
                self.result = Some(Err(RouterError::BlobExpired));
            }
            ServerErrorCode::BlobAuthorizationFailure if self.get_short_circuits() => {
                self.tracker.record_failure();
                self.failures
                    .push(FailureCause::Code(ServerErrorCode::BlobAuthorizationFailure));
                self.result = Some(Err(RouterError::BlobAuthorizationFailure));
            }
            code => {
                self.tracker.record_failure();
                self.failures.push(FailureCause::Code(code));
            }
        }
    }

    fn short_circuits(&self) -> bool {
        matches!(self.kind, OpKind::Delete { .. } | OpKind::Get { .. })
    }

    fn get_short_circuits(&self) -> bool {
        matches!(self.kind, OpKind::Get { .. })
    }

    /// Expires overdue replica requests and aborts the operation once its
    /// own deadline has passed. An expired request does not fail the
    /// operation while other replicas can still satisfy the target.
    pub fn check_deadlines(&mut self, now_ms: u64) {
        if self.result.is_some() {
            return;
        }
        if now_ms >= self.deadline_ms {
            self.result = Some(Err(RouterError::OperationTimedOut));
            return;
        }
        let expired: Vec<u64> = self
            .inflight
            .iter()
            .filter(|(_, expires)| now_ms >= **expires)
            .map(|(id, _)| *id)
            .collect();
        for correlation_id in expired {
            self.inflight.remove(&correlation_id);
            self.tracker.record_failure();
            self.failures.push(FailureCause::RequestTimedOut);
        }
        self.maybe_complete();
    }

    fn maybe_complete(&mut self) {
        if self.result.is_some() {
            return;
        }
        if self.tracker.succeeded() {
            let outcome = match &self.kind {
                OpKind::Put { blob_id, .. } => Ok(OpOutcome::Put(blob_id.encode())),
                OpKind::Get { .. } => match self.payload.take() {
                    Some(payload) => Ok(OpOutcome::Get(payload)),
                    None => Err(RouterError::UnexpectedInternalError),
                },
                OpKind::Delete { .. } => Ok(OpOutcome::Delete),
            };
            self.result = Some(outcome);
        } else if self.tracker.failed() {
            self.result = Some(Err(resolve_failure(
                &self.failures,
                self.tracker.successes(),
            )));
        }
    }

    pub fn abort(&mut self, error: RouterError) {
        if self.result.is_none() {
            self.result = Some(Err(error));
        }
    }

    pub fn take_result(&mut self) -> Option<Result<OpOutcome, RouterError>> {
        self.result.take()
    }

    pub fn is_terminal(&self) -> bool {
        self.result.is_some()
    }
}

/// Combines the failure causes of a failed operation into one router error.
///
/// The per-replica codes are ranked by `ServerErrorCode::precedence`; the
/// outcome depends only on the multiset of causes. `BlobDoesNotExist` is
/// reported only when every recorded response was `BlobNotFound` and no
/// replica succeeded.
pub(crate) fn resolve_failure(failures: &[FailureCause], successes: usize) -> RouterError {
    let mut not_found = 0usize;
    let mut timeouts = 0usize;
    let mut has_auth = false;
    let mut has_expired = false;
    let mut has_deleted = false;
    let mut has_health = false;
    for cause in failures {
        match cause {
            FailureCause::Code(ServerErrorCode::BlobAuthorizationFailure) => has_auth = true,
            FailureCause::Code(ServerErrorCode::BlobExpired) => has_expired = true,
            FailureCause::Code(ServerErrorCode::BlobDeleted) => has_deleted = true,
            FailureCause::Code(ServerErrorCode::BlobNotFound) => not_found += 1,
            FailureCause::Code(code) if code.is_health_code() => has_health = true,
            FailureCause::Code(_) => {}
            FailureCause::RequestTimedOut => timeouts += 1,
        }
    }
    if has_auth {
        RouterError::BlobAuthorizationFailure
    } else if has_expired {
        RouterError::BlobExpired
    } else if has_deleted {
        RouterError::BlobDeleted
    } else if not_found > 0 && not_found == failures.len() && successes == 0 {
        RouterError::BlobDoesNotExist
    } else if has_health {
        RouterError::AmbryUnavailable
    } else if not_found > 0 {
        // not-found mixed with successes below the target: no proof either way
        RouterError::AmbryUnavailable
    } else if timeouts > 0 {
        RouterError::OperationTimedOut
    } else {
        RouterError::UnexpectedInternalError
    }
}
