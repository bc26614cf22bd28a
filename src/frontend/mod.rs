//! The request pipeline: takes one parsed REST request through security,
//! id conversion, account resolution, and router dispatch to a single
//! terminal response on its channel.

pub mod accounts;
pub mod cluster_ops;
pub mod id_converter;
pub mod response;
pub mod security;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use account_service::AccountService;
use bytes::Bytes;
use cluster_map::{BlobId, ClusterView};
use router::{BlobRouter, Clock, RouterError};
use tracing::{debug, error};

use crate::{
    metrics::ApiMetrics,
    rest::{
        headers::{
            self, CONTENT_LENGTH, CONTENT_TYPE_STD, DATE, LOCATION, OWNER_ID, PRIVATE, SERVICE_ID,
            TTL,
        },
        RestError, RestErrorKind, RestMethod, RestRequest, RestResponseChannel, ResponseStatus,
        SubResource,
    },
};

use self::{
    id_converter::IdConverter,
    response::{ResponseHandler, SubmitJob},
    security::SecurityService,
};

pub struct BlobFrontend {
    router: Arc<dyn BlobRouter>,
    cluster: Arc<dyn ClusterView>,
    accounts: Arc<dyn AccountService>,
    id_converter: Arc<dyn IdConverter>,
    security: Arc<dyn SecurityService>,
    response_handler: Arc<ResponseHandler>,
    metrics: Arc<ApiMetrics>,
    clock: Arc<dyn Clock>,
    started: AtomicBool,
}

impl BlobFrontend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<dyn BlobRouter>,
        cluster: Arc<dyn ClusterView>,
        accounts: Arc<dyn AccountService>,
        id_converter: Arc<dyn IdConverter>,
        security: Arc<dyn SecurityService>,
        response_handler: Arc<ResponseHandler>,
        metrics: Arc<ApiMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            router,
            cluster,
            accounts,
            id_converter,
            security,
            response_handler,
            metrics,
            clock,
            started: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    /// Runs one request to its terminal response. The response channel is
    /// completed exactly once, whether any stage succeeds or fails.
    pub async fn handle(&self, request: Arc<RestRequest>, channel: Arc<dyn RestResponseChannel>) {
        self.metrics.record_request(request.method());
        let outcome = match request.method() {
            RestMethod::Get => self.do_get(&request, &channel).await,
            RestMethod::Head => self.do_head(&request, &channel).await,
            RestMethod::Post => self.do_post(&request, &channel).await,
            RestMethod::Delete => self.do_delete(&request, &channel).await,
            other => Err(RestError::new(
                RestErrorKind::UnsupportedHttpMethod,
                format!("{} is not supported", other.as_str()),
            )),
        };
        match outcome {
            Ok(body) => self.submit_response(request, channel, body, None).await,
            Err(err) => {
                self.metrics.record_error();
                match err.kind {
                    RestErrorKind::InternalError | RestErrorKind::ServiceUnavailable => {
                        error!(uri = request.uri(), %err, "request failed");
                    }
                    _ => debug!(uri = request.uri(), %err, "request rejected"),
                }
                self.submit_response(request, channel, Bytes::new(), Some(err))
                    .await
            }
        }
    }

    async fn submit_response(
        &self,
        request: Arc<RestRequest>,
        channel: Arc<dyn RestResponseChannel>,
        body: Bytes,
        error: Option<RestError>,
    ) {
        let job = SubmitJob {
            request,
            channel,
            body,
            error,
        };
        if let Err(job) = self.response_handler.submit(job) {
            // handler is gone; the original outcome still goes out directly
            debug!("response handler unavailable, completing on the channel directly");
            response::deliver(job).await;
        }
    }

    fn ensure_started(&self) -> Result<(), RestError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(RestError::service_unavailable("frontend is not started"));
        }
        Ok(())
    }

    /// Converts the path id and decodes it against the cluster view.
    async fn resolve_blob_id(&self, request: &RestRequest) -> Result<(String, BlobId), RestError> {
        let raw_id = request
            .path()
            .blob_id
            .clone()
            .ok_or_else(|| RestError::bad_request("request names no blob id"))?;
        let id_str = self.id_converter.convert(request, &raw_id).await?;
        let blob_id = BlobId::decode(&id_str, self.cluster.as_ref())
            .map_err(|err| RestError::bad_request(format!("invalid blob id: {err}")))?;
        Ok((id_str, blob_id))
    }

    async fn do_get(
        &self,
        request: &Arc<RestRequest>,
        channel: &Arc<dyn RestResponseChannel>,
    ) -> Result<Bytes, RestError> {
        self.ensure_started()?;
        self.security.pre_process(request).await?;

        if request.path().operation.is_some() {
            let body = cluster_ops::peers_response(request, self.cluster.as_ref())?;
            channel.set_header(CONTENT_TYPE_STD, "application/json");
            channel.set_header(CONTENT_LENGTH, &body.len().to_string());
            channel.set_status(ResponseStatus::Ok);
            return Ok(body);
        }

        let (id_str, blob_id) = self.resolve_blob_id(request).await?;

        if request.path().sub_resource == Some(SubResource::Replicas) {
            let body = cluster_ops::replicas_response(&blob_id, self.cluster.as_ref())?;
            channel.set_header(CONTENT_TYPE_STD, "application/json");
            channel.set_header(CONTENT_LENGTH, &body.len().to_string());
            channel.set_status(ResponseStatus::Ok);
            return Ok(body);
        }

        accounts::inject_for_blob_id(request, &blob_id, self.accounts.as_ref())?;
        self.security.post_process(request).await?;

        let options = request.get_option();
        match request.path().sub_resource {
            None => {
                let payload = self.router.get_blob(&id_str, options).await?;
                let plan = self
                    .security
                    .process_response(request, channel.as_ref(), &payload.info)
                    .await?;
                channel.set_status(plan.status);
                if !plan.send_body {
                    return Ok(Bytes::new());
                }
                Ok(match plan.range {
                    Some((start, end)) => payload.body.slice(start as usize..(end + 1) as usize),
                    None => payload.body,
                })
            }
            Some(SubResource::BlobInfo) | Some(SubResource::UserMetadata) => {
                let info = self.router.get_blob_info(&id_str, options).await?;
                let plan = self
                    .security
                    .process_response(request, channel.as_ref(), &info)
                    .await?;
                channel.set_status(plan.status);
                if plan.send_body {
                    return Ok(info.user_metadata);
                }
                Ok(Bytes::new())
            }
            Some(SubResource::Replicas) => unreachable!("handled before router dispatch"),
        }
    }

    async fn do_head(
        &self,
        request: &Arc<RestRequest>,
        channel: &Arc<dyn RestResponseChannel>,
    ) -> Result<Bytes, RestError> {
        self.ensure_started()?;
        self.security.pre_process(request).await?;
        let (id_str, blob_id) = self.resolve_blob_id(request).await?;
        accounts::inject_for_blob_id(request, &blob_id, self.accounts.as_ref())?;
        self.security.post_process(request).await?;
        let info = self
            .router
            .get_blob_info(&id_str, request.get_option())
            .await?;
        let plan = self
            .security
            .process_response(request, channel.as_ref(), &info)
            .await?;
        channel.set_status(plan.status);
        Ok(Bytes::new())
    }

    async fn do_delete(
        &self,
        request: &Arc<RestRequest>,
        channel: &Arc<dyn RestResponseChannel>,
    ) -> Result<Bytes, RestError> {
        self.ensure_started()?;
        self.security.pre_process(request).await?;
        let (id_str, blob_id) = self.resolve_blob_id(request).await?;
        accounts::inject_for_blob_id(request, &blob_id, self.accounts.as_ref())?;
        self.security.post_process(request).await?;
        let service_id = request.header(SERVICE_ID);
        match self
            .router
            .delete_blob(&id_str, service_id.as_deref())
            .await
        {
            // deleting an already-deleted blob is still an accepted delete
            Ok(()) | Err(RouterError::BlobDeleted) => {
                channel.set_status(ResponseStatus::Accepted);
                channel.set_header(DATE, &headers::http_date(self.clock.now_ms()));
                channel.set_header(CONTENT_LENGTH, "0");
                Ok(Bytes::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn do_post(
        &self,
        request: &Arc<RestRequest>,
        channel: &Arc<dyn RestResponseChannel>,
    ) -> Result<Bytes, RestError> {
        self.ensure_started()?;
        accounts::ensure_no_internal_keys(request)?;
        self.security.pre_process(request).await?;
        accounts::inject_for_post(request, self.accounts.as_ref())?;
        self.security.post_process(request).await?;

        let properties = self.build_blob_properties(request)?;
        let user_metadata = headers::user_metadata_from_headers(request.headers());
        let body = request
            .take_body()
            .ok_or_else(|| RestError::internal("request body is gone"))?;
        let blob_id = self
            .router
            .put_blob(properties.clone(), user_metadata.clone(), body)
            .await?;
        let location = self.id_converter.convert(request, &blob_id).await?;

        let info = router::BlobInfo {
            properties,
            user_metadata,
        };
        self.security
            .process_response(request, channel.as_ref(), &info)
            .await?;
        channel.set_status(ResponseStatus::Created);
        channel.set_header(LOCATION, &location);
        channel.set_header(CONTENT_LENGTH, "0");
        Ok(Bytes::new())
    }

    fn build_blob_properties(
        &self,
        request: &RestRequest,
    ) -> Result<router::BlobProperties, RestError> {
        let service_id = request
            .header(SERVICE_ID)
            .ok_or_else(|| RestError::missing_args(format!("{SERVICE_ID} header missing")))?;
        let content_type = request.header(headers::CONTENT_TYPE).ok_or_else(|| {
            RestError::missing_args(format!("{} header missing", headers::CONTENT_TYPE))
        })?;
        let ttl_secs = headers::parse_ttl(request.header(TTL).as_deref())?;
        if ttl_secs < router::TTL_INFINITE {
            return Err(RestError::invalid_argument(format!("{TTL} cannot be below -1")));
        }
        let is_private = headers::parse_bool(PRIVATE, request.header(PRIVATE).as_deref())?;
        // declared size is advisory; the router records the received size
        let declared_size =
            headers::parse_blob_size(request.header(headers::BLOB_SIZE).as_deref())?;
        Ok(router::BlobProperties {
            blob_size: declared_size.unwrap_or(0),
            service_id,
            content_type,
            owner_id: request.header(OWNER_ID),
            ttl_secs,
            is_private,
            creation_time_ms: self.clock.now_ms(),
        })
    }
}
