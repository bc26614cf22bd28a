//! Terminal response submission.
//!
//! Responses are handed to an asynchronous handler task; when the handler
//! is shut down, the pipeline completes the request directly on its channel
//! so the original outcome still reaches the client. Resource release
//! happens after the outcome is recorded, and release failures are
//! swallowed so they cannot mask it.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::rest::{
    headers::{DELETED, ERROR_CODE},
    RestError, RestRequest, RestResponseChannel,
};
use router::RouterError;

pub struct SubmitJob {
    pub request: Arc<RestRequest>,
    pub channel: Arc<dyn RestResponseChannel>,
    pub body: Bytes,
    pub error: Option<RestError>,
}

/// Delivers one terminal outcome and releases the request.
pub async fn deliver(job: SubmitJob) {
    if let Some(error) = &job.error {
        job.channel.set_header(ERROR_CODE, &error.kind.to_string());
        if error.router_code == Some(RouterError::BlobDeleted) {
            job.channel.set_header(DELETED, "true");
        }
    }
    if let Err(err) = job.channel.complete(job.body, job.error.as_ref()).await {
        warn!(%err, uri = job.request.uri(), "failed to complete response channel");
    }
    job.request.close();
}

/// Queue-backed submitter decoupling pipeline stages from channel writes.
pub struct ResponseHandler {
    tx: Mutex<Option<mpsc::UnboundedSender<SubmitJob>>>,
}

impl ResponseHandler {
    pub fn new() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SubmitJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                deliver(job).await;
            }
            debug!("response handler drained");
        });
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    /// Enqueues a response for delivery. On failure the job is handed back
    /// so the caller can deliver it directly.
    pub fn submit(&self, job: SubmitJob) -> Result<(), SubmitJob> {
        let tx = self.tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) => tx.send(job).map_err(|rejected| rejected.0),
            None => Err(job),
        }
    }

    /// Stops accepting submissions. Queued responses still drain.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap().take();
    }
}
