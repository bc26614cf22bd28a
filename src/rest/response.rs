use axum::http::StatusCode;
use bytes::Bytes;

use super::error::RestError;

/// Success statuses the pipeline can emit. Error statuses are derived from
/// the error kind at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Created,
    Accepted,
    PartialContent,
    NotModified,
}

impl ResponseStatus {
    pub fn status_code(self) -> StatusCode {
        match self {
            ResponseStatus::Ok => StatusCode::OK,
            ResponseStatus::Created => StatusCode::CREATED,
            ResponseStatus::Accepted => StatusCode::ACCEPTED,
            ResponseStatus::PartialContent => StatusCode::PARTIAL_CONTENT,
            ResponseStatus::NotModified => StatusCode::NOT_MODIFIED,
        }
    }
}

/// Where a request's terminal response goes. `complete` must be accepted at
/// most once; implementations reject a second call so a double submission
/// surfaces instead of silently racing.
#[async_trait::async_trait]
pub trait RestResponseChannel: Send + Sync {
    fn set_status(&self, status: ResponseStatus);

    fn set_header(&self, name: &str, value: &str);

    /// Delivers the terminal response. With an error, the body is dropped
    /// and the status comes from the error kind.
    async fn complete(&self, body: Bytes, error: Option<&RestError>) -> anyhow::Result<()>;

    fn is_completed(&self) -> bool;
}
