use router::BlobInfo;

use crate::rest::{
    headers::{
        self, ACCEPT_RANGES, BLOB_SIZE, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE,
        CONTENT_TYPE_STD, CREATION_TIME, DATE, EXPIRES, GET_OPTION, IF_MODIFIED_SINCE,
        LAST_MODIFIED, OWNER_ID, PRAGMA, PRIVATE, RANGE, SERVICE_ID,
    },
    Arg, RestError, RestMethod, RestRequest, RestResponseChannel, ResponseStatus, SubResource,
};

/// How the pipeline should finish a successful blob read.
#[derive(Debug, Clone, Copy)]
pub struct ResponsePlan {
    pub status: ResponseStatus,
    /// Inclusive byte window into the blob body, when a range applies.
    pub range: Option<(u64, u64)>,
    pub send_body: bool,
}

impl ResponsePlan {
    fn headers_only(status: ResponseStatus) -> Self {
        Self {
            status,
            range: None,
            send_body: false,
        }
    }
}

/// The three security hooks wrapped around every request. Hooks may fail
/// the request or, on the response side, shape its headers.
#[async_trait::async_trait]
pub trait SecurityService: Send + Sync {
    /// Runs before id conversion; sees the raw request.
    async fn pre_process(&self, request: &RestRequest) -> Result<(), RestError>;

    /// Runs after the id and target account/container are resolved.
    async fn post_process(&self, request: &RestRequest) -> Result<(), RestError>;

    /// Shapes the response of a successful router read/write.
    async fn process_response(
        &self,
        request: &RestRequest,
        channel: &dyn RestResponseChannel,
        blob_info: &BlobInfo,
    ) -> Result<ResponsePlan, RestError>;
}

/// Header-driven security service: validates request headers up front and
/// stamps blob, freshness, and cache headers on responses.
pub struct HeaderSecurityService {
    cache_validity_secs: u64,
}

impl HeaderSecurityService {
    pub fn new(cache_validity_secs: u64) -> Self {
        Self {
            cache_validity_secs,
        }
    }

    fn set_blob_headers(&self, channel: &dyn RestResponseChannel, blob_info: &BlobInfo) {
        let properties = &blob_info.properties;
        channel.set_header(BLOB_SIZE, &properties.blob_size.to_string());
        channel.set_header(SERVICE_ID, &properties.service_id);
        channel.set_header(CREATION_TIME, &headers::http_date(properties.creation_time_ms));
        channel.set_header(PRIVATE, if properties.is_private { "true" } else { "false" });
        channel.set_header(headers::CONTENT_TYPE, &properties.content_type);
        if let Some(owner_id) = &properties.owner_id {
            channel.set_header(OWNER_ID, owner_id);
        }
        if let Some(um_headers) = headers::user_metadata_to_headers(&blob_info.user_metadata) {
            for (name, value) in um_headers {
                channel.set_header(&name, &value);
            }
        }
    }

    fn set_cache_headers(
        &self,
        channel: &dyn RestResponseChannel,
        blob_info: &BlobInfo,
        now_ms: u64,
    ) {
        if blob_info.properties.is_private {
            channel.set_header(EXPIRES, &headers::http_date(now_ms));
            channel.set_header(CACHE_CONTROL, "private, no-cache, no-store, proxy-revalidate");
            channel.set_header(PRAGMA, "no-cache");
        } else {
            let expiry = now_ms + self.cache_validity_secs * 1_000;
            channel.set_header(EXPIRES, &headers::http_date(expiry));
            channel.set_header(
                CACHE_CONTROL,
                &format!("max-age={}", self.cache_validity_secs),
            );
        }
    }

    fn not_modified(&self, request: &RestRequest, blob_info: &BlobInfo) -> bool {
        let Some(since) = request
            .header(IF_MODIFIED_SINCE)
            .as_deref()
            .and_then(headers::parse_http_date)
        else {
            return false;
        };
        // compare at second granularity, the resolution of HTTP dates
        blob_info.properties.creation_time_ms / 1_000 <= since / 1_000
    }
}

#[async_trait::async_trait]
impl SecurityService for HeaderSecurityService {
    async fn pre_process(&self, request: &RestRequest) -> Result<(), RestError> {
        let option = headers::parse_get_option(request.header(GET_OPTION).as_deref())?;
        request.set_arg(GET_OPTION, Arg::GetOption(option));
        if let Some(raw) = request.header(RANGE) {
            let range = headers::ByteRange::parse(&raw)?;
            request.set_arg(RANGE, Arg::Range(range));
        }
        Ok(())
    }

    async fn post_process(&self, request: &RestRequest) -> Result<(), RestError> {
        // by this stage every blob operation runs on behalf of a resolved pair
        if request.target_account().is_none() || request.target_container().is_none() {
            return Err(RestError::internal(
                "request reached the router without a resolved account and container",
            ));
        }
        Ok(())
    }

    async fn process_response(
        &self,
        request: &RestRequest,
        channel: &dyn RestResponseChannel,
        blob_info: &BlobInfo,
    ) -> Result<ResponsePlan, RestError> {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        channel.set_header(DATE, &headers::http_date(now_ms));
        let properties = &blob_info.properties;
        match request.method() {
            RestMethod::Post => {
                channel.set_header(CREATION_TIME, &headers::http_date(properties.creation_time_ms));
                Ok(ResponsePlan::headers_only(ResponseStatus::Created))
            }
            RestMethod::Head => {
                channel.set_header(LAST_MODIFIED, &headers::http_date(properties.creation_time_ms));
                if self.not_modified(request, blob_info) {
                    return Ok(ResponsePlan::headers_only(ResponseStatus::NotModified));
                }
                self.set_blob_headers(channel, blob_info);
                channel.set_header(ACCEPT_RANGES, "bytes");
                let mut plan = ResponsePlan::headers_only(ResponseStatus::Ok);
                if let Some(range) = request.byte_range() {
                    let (start, end) = range.resolve(properties.blob_size)?;
                    channel.set_header(
                        CONTENT_RANGE,
                        &format!("bytes {start}-{end}/{}", properties.blob_size),
                    );
                    channel.set_header(CONTENT_LENGTH, &(end - start + 1).to_string());
                    plan.status = ResponseStatus::PartialContent;
                    plan.range = Some((start, end));
                } else {
                    channel.set_header(CONTENT_LENGTH, &properties.blob_size.to_string());
                }
                channel.set_header(CONTENT_TYPE_STD, &properties.content_type);
                Ok(plan)
            }
            RestMethod::Get => match request.path().sub_resource {
                Some(SubResource::BlobInfo) => {
                    self.set_blob_headers(channel, blob_info);
                    channel.set_header(CONTENT_LENGTH, "0");
                    Ok(ResponsePlan::headers_only(ResponseStatus::Ok))
                }
                Some(SubResource::UserMetadata) => {
                    match headers::user_metadata_to_headers(&blob_info.user_metadata) {
                        Some(um_headers) => {
                            for (name, value) in um_headers {
                                channel.set_header(&name, &value);
                            }
                            channel.set_header(CONTENT_LENGTH, "0");
                            Ok(ResponsePlan::headers_only(ResponseStatus::Ok))
                        }
                        // metadata predating the header form is served raw
                        None => {
                            channel.set_header(CONTENT_TYPE_STD, "application/octet-stream");
                            channel.set_header(
                                CONTENT_LENGTH,
                                &blob_info.user_metadata.len().to_string(),
                            );
                            Ok(ResponsePlan {
                                status: ResponseStatus::Ok,
                                range: None,
                                send_body: true,
                            })
                        }
                    }
                }
                _ => {
                    channel.set_header(LAST_MODIFIED, &headers::http_date(properties.creation_time_ms));
                    if self.not_modified(request, blob_info) {
                        return Ok(ResponsePlan::headers_only(ResponseStatus::NotModified));
                    }
                    self.set_blob_headers(channel, blob_info);
                    self.set_cache_headers(channel, blob_info, now_ms);
                    channel.set_header(ACCEPT_RANGES, "bytes");
                    channel.set_header(CONTENT_TYPE_STD, &properties.content_type);
                    let mut plan = ResponsePlan {
                        status: ResponseStatus::Ok,
                        range: None,
                        send_body: true,
                    };
                    if let Some(range) = request.byte_range() {
                        let (start, end) = range.resolve(properties.blob_size)?;
                        channel.set_header(
                            CONTENT_RANGE,
                            &format!("bytes {start}-{end}/{}", properties.blob_size),
                        );
                        channel.set_header(CONTENT_LENGTH, &(end - start + 1).to_string());
                        plan.status = ResponseStatus::PartialContent;
                        plan.range = Some((start, end));
                    } else {
                        channel.set_header(CONTENT_LENGTH, &properties.blob_size.to_string());
                    }
                    Ok(plan)
                }
            },
            method => Err(RestError::internal(format!(
                "no response shaping for {}",
                method.as_str()
            ))),
        }
    }
}
