use bytes::Bytes;
use cluster_map::{BlobId, ReplicaId};

use crate::{
    blob::{BlobInfo, BlobProperties, GetOption},
    error::ServerErrorCode,
};

/// A framed request to one replica.
#[derive(Debug, Clone)]
pub enum ReplicaRequest {
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

#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub correlation_id: u64,
    pub replica: ReplicaId,
    pub request: ReplicaRequest,
}

/// A framed response from one replica. `blob` is populated only for a GET
/// that succeeded.
#[derive(Debug, Clone)]
pub struct ReplicaResponse {
    pub error: ServerErrorCode,
    pub blob: Option<(BlobInfo, Bytes)>,
}

impl ReplicaResponse {
    pub fn error(error: ServerErrorCode) -> Self {
        Self { error, blob: None }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("transport failure talking to {replica}: {message}")]
pub struct TransportError {
    pub replica: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ResponseInfo {
    pub correlation_id: u64,
    pub replica: ReplicaId,
    pub result: Result<ReplicaResponse, TransportError>,
}

/// Non-blocking channel to the storage replicas.
///
/// `send` enqueues framed requests and returns immediately. `poll` awaits
/// the next batch of responses; it must return periodically (with an empty
/// batch when nothing arrived) so the router can check deadlines.
#[async_trait::async_trait]
pub trait ReplicaTransport: Send + Sync {
    fn send(&self, requests: Vec<RequestInfo>);
    async fn poll(&self) -> Vec<ResponseInfo>;
}
