//! Replicated-request router for the blob store frontend.
//!
//! A router operation fans a logical PUT/GET/DELETE out across the replicas
//! of one partition, tracks per-replica outcomes against a success target,
//! and folds heterogeneous replica error codes into a single router-level
//! result. A single driver loop polls the transport and feeds responses to
//! the owning operations.

pub mod blob;
pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod local;
mod operations;
mod tracker;
pub mod transport;


use bytes::Bytes;
use futures::stream::BoxStream;

pub use blob::{
    BlobInfo, BlobProperties, BlobPropertiesBuilder, GetBlobPayload, GetOption, TTL_INFINITE,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RouterConfig;
pub use core::RouterCore;
pub use error::{RouterError, ServerErrorCode};

/// The seam the REST frontend dispatches through. Implemented by
/// [`RouterCore`]; tests may substitute their own.
#[async_trait::async_trait]
pub trait BlobRouter: Send + Sync {
    /// Stores a blob and returns its id string. The id's partition is one
    /// of the cluster view's writable partitions.
    async fn put_blob(
        &self,
        properties: BlobProperties,
        user_metadata: Bytes,
        body: BoxStream<'static, anyhow::Result<Bytes>>,
    ) -> Result<String, RouterError>;

    async fn get_blob(
        &self,
        blob_id: &str,
        options: GetOption,
    ) -> Result<GetBlobPayload, RouterError>;

    async fn get_blob_info(
        &self,
        blob_id: &str,
        options: GetOption,
    ) -> Result<BlobInfo, RouterError>;

    async fn delete_blob(&self, blob_id: &str, service_id: Option<&str>)
        -> Result<(), RouterError>;

    /// Aborts every running operation with `RouterClosed` and rejects new
    /// submissions with the same code.
    fn close(&self);
}
