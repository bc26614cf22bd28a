//! Harness wiring a full frontend against an in-process cluster.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use account_service::{AccountService, InMemoryAccountService};
use axum::http::StatusCode;
use bytes::Bytes;
use cluster_map::InMemoryClusterView;
use futures::StreamExt;
use router::{
    local::{LocalReplicaLayout, LocalTransport},
    BlobRouter, Clock, ManualClock, RouterConfig, RouterCore,
};
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    frontend::{
        id_converter::{IdConverter, IdentityIdConverter},
        response::ResponseHandler,
        security::{HeaderSecurityService, SecurityService},
        BlobFrontend,
    },
    metrics::ApiMetrics,
    rest::{RestError, RestMethod, RestRequest, RestResponseChannel, ResponseStatus},
};

/// Epoch used as "now" in tests: 2020-01-01T00:00:00Z.
pub const TEST_EPOCH_MS: u64 = 1_577_836_800_000;

pub struct CollaboratorOverrides {
    pub security: Option<Arc<dyn SecurityService>>,
    pub id_converter: Option<Arc<dyn IdConverter>>,
    pub router: Option<Arc<dyn BlobRouter>>,
}

pub struct TestService {
    pub frontend: Arc<BlobFrontend>,
    pub router: Arc<RouterCore>,
    pub cluster: Arc<InMemoryClusterView>,
    pub accounts: Arc<InMemoryAccountService>,
    pub layout: Arc<LocalReplicaLayout>,
    pub clock: Arc<ManualClock>,
    pub response_handler: Arc<ResponseHandler>,
}

impl TestService {
    pub fn new() -> Self {
        Self::build(|_, _| {})
    }

    pub fn build(
        customize: impl FnOnce(&mut CollaboratorOverrides, Arc<RouterCore>),
    ) -> Self {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let cluster = Arc::new(cluster_map::test_objects::mock_cluster_view(4, 3));
        let accounts = Arc::new(InMemoryAccountService::new());
        let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
        let layout = Arc::new(LocalReplicaLayout::new());
        let transport = Arc::new(LocalTransport::new(
            layout.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        let router = Arc::new(RouterCore::new(
            cluster.clone(),
            transport,
            clock.clone() as Arc<dyn Clock>,
            RouterConfig::default(),
        ));

        let mut overrides = CollaboratorOverrides {
            security: None,
            id_converter: None,
            router: None,
        };
        customize(&mut overrides, router.clone());

        let response_handler = ResponseHandler::new();
        let frontend = Arc::new(BlobFrontend::new(
            overrides
                .router
                .unwrap_or_else(|| router.clone() as Arc<dyn BlobRouter>),
            cluster.clone(),
            accounts.clone() as Arc<dyn AccountService>,
            overrides
                .id_converter
                .unwrap_or_else(|| Arc::new(IdentityIdConverter)),
            overrides
                .security
                .unwrap_or_else(|| Arc::new(HeaderSecurityService::new(3600))),
            response_handler.clone(),
            Arc::new(ApiMetrics::new()),
            clock.clone() as Arc<dyn Clock>,
        ));
        frontend.start();

        Self {
            frontend,
            router,
            cluster,
            accounts,
            layout,
            clock,
            response_handler,
        }
    }

    /// Runs one request through the pipeline and waits for its terminal
    /// response.
    pub async fn do_operation(
        &self,
        method: RestMethod,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> (MockResponse, Arc<RestRequest>) {
        let header_map: BTreeMap<String, String> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect();
        let body_stream = body.map(|bytes| {
            futures::stream::iter(vec![Ok::<_, anyhow::Error>(bytes)]).boxed()
        });
        let request = Arc::new(RestRequest::new(method, uri, header_map, body_stream));
        let (channel, rx) = MockResponseChannel::new();
        self.frontend
            .handle(request.clone(), Arc::new(channel))
            .await;
        let response = rx.await.expect("request terminated without a response");
        (response, request)
    }
}

/// The recorded terminal response of one request.
#[derive(Debug)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub error: Option<RestError>,
}

impl MockResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn error_kind(&self) -> Option<crate::rest::RestErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Response channel that records everything and enforces single completion.
pub struct MockResponseChannel {
    status: Mutex<ResponseStatus>,
    headers: Mutex<Vec<(String, String)>>,
    sender: Mutex<Option<oneshot::Sender<MockResponse>>>,
    completed: AtomicBool,
    completions: Arc<AtomicUsize>,
}

impl MockResponseChannel {
    pub fn new() -> (Self, oneshot::Receiver<MockResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                status: Mutex::new(ResponseStatus::Ok),
                headers: Mutex::new(Vec::new()),
                sender: Mutex::new(Some(tx)),
                completed: AtomicBool::new(false),
                completions: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }
}

#[async_trait::async_trait]
impl RestResponseChannel for MockResponseChannel {
    fn set_status(&self, status: ResponseStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn set_header(&self, name: &str, value: &str) {
        self.headers
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
    }

    async fn complete(&self, body: Bytes, error: Option<&RestError>) -> anyhow::Result<()> {
        let previous = self.completions.fetch_add(1, Ordering::SeqCst);
        assert_eq!(previous, 0, "response channel completed more than once");
        self.completed.store(true, Ordering::SeqCst);
        let status = match error {
            Some(error) => error.status_code(),
            None => self.status.lock().unwrap().status_code(),
        };
        let response = MockResponse {
            status,
            headers: self.headers.lock().unwrap().clone(),
            body: if error.is_some() { Bytes::new() } else { body },
            error: error.cloned(),
        };
        self.sender
            .lock()
            .unwrap()
            .take()
            .expect("completion sender consumed")
            .send(response)
            .map_err(|_| anyhow::anyhow!("test dropped the response receiver"))?;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Router decorator that records the service id of the last delete, for
/// asserting pass-through.
pub struct RecordingRouter {
    pub inner: Arc<dyn BlobRouter>,
    pub last_delete_service_id: Arc<Mutex<Option<Option<String>>>>,
}

#[async_trait::async_trait]
impl BlobRouter for RecordingRouter {
    async fn put_blob(
        &self,
        properties: router::BlobProperties,
        user_metadata: Bytes,
        body: futures::stream::BoxStream<'static, anyhow::Result<Bytes>>,
    ) -> Result<String, router::RouterError> {
        self.inner.put_blob(properties, user_metadata, body).await
    }

    async fn get_blob(
        &self,
        blob_id: &str,
        options: router::GetOption,
    ) -> Result<router::GetBlobPayload, router::RouterError> {
        self.inner.get_blob(blob_id, options).await
    }

    async fn get_blob_info(
        &self,
        blob_id: &str,
        options: router::GetOption,
    ) -> Result<router::BlobInfo, router::RouterError> {
        self.inner.get_blob_info(blob_id, options).await
    }

    async fn delete_blob(
        &self,
        blob_id: &str,
        service_id: Option<&str>,
    ) -> Result<(), router::RouterError> {
        *self.last_delete_service_id.lock().unwrap() =
            Some(service_id.map(str::to_string));
        self.inner.delete_blob(blob_id, service_id).await
    }

    fn close(&self) {
        self.inner.close();
    }
}
