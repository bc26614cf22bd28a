use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    http::{HeaderName, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::StreamExt;
use hyper::StatusCode;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    frontend::BlobFrontend,
    rest::{RestError, RestMethod, RestRequest, RestResponseChannel, ResponseStatus},
};

#[derive(Clone)]
pub struct RouteState {
    pub frontend: Arc<BlobFrontend>,
    pub registry: Arc<prometheus::Registry>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(dump_metrics))
        .fallback(dispatch)
        .with_state(route_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();
                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());
                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(usize::MAX))
}

async fn healthz() -> &'static str {
    "GOOD"
}

async fn dump_metrics(State(state): State<RouteState>) -> Response {
    let encoder = prometheus::TextEncoder::new();
    match encoder.encode_to_string(&state.registry.gather()) {
        Ok(text) => text.into_response(),
        Err(err) => {
            warn!(%err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Every blob-path request funnels through here: the axum request becomes a
/// pipeline request, and the pipeline's terminal completion becomes the
/// HTTP response.
async fn dispatch(State(state): State<RouteState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let method = match parts.method {
        Method::GET => RestMethod::Get,
        Method::HEAD => RestMethod::Head,
        Method::POST => RestMethod::Post,
        Method::DELETE => RestMethod::Delete,
        other => RestMethod::Other(other.to_string()),
    };
    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let mut headers = BTreeMap::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }
    let body_stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(anyhow::Error::from))
        .boxed();
    let rest_request = Arc::new(RestRequest::new(method, &uri, headers, Some(body_stream)));

    let (channel, rx) = HttpResponseChannel::new();
    state.frontend.handle(rest_request, Arc::new(channel)).await;
    match rx.await {
        Ok(response) => response,
        Err(_) => {
            warn!(uri, "response channel dropped without completion");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bridges the pipeline's response channel onto an axum response.
pub struct HttpResponseChannel {
    status: Mutex<ResponseStatus>,
    headers: Mutex<Vec<(String, String)>>,
    sender: Mutex<Option<oneshot::Sender<Response>>>,
    completed: AtomicBool,
}

impl HttpResponseChannel {
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                status: Mutex::new(ResponseStatus::Ok),
                headers: Mutex::new(Vec::new()),
                sender: Mutex::new(Some(tx)),
                completed: AtomicBool::new(false),
            },
            rx,
        )
    }
}

#[async_trait::async_trait]
impl RestResponseChannel for HttpResponseChannel {
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
        if self.completed.swap(true, Ordering::SeqCst) {
            return Err(anyhow::anyhow!("response channel already completed"));
        }
        let status = match error {
            Some(error) => error.status_code(),
            None => self.status.lock().unwrap().status_code(),
        };
        let mut response = Response::builder().status(status);
        if let Some(response_headers) = response.headers_mut() {
            for (name, value) in self.headers.lock().unwrap().iter() {
                let Ok(name) = name.parse::<HeaderName>() else {
                    continue;
                };
                let Ok(value) = HeaderValue::from_str(value) else {
                    continue;
                };
                response_headers.insert(name, value);
            }
        }
        let body = if error.is_some() { Body::empty() } else { Body::from(body) };
        let response = response.body(body)?;
        self.sender
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("response already sent"))?
            .send(response)
            .map_err(|_| anyhow::anyhow!("http side went away"))?;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}
