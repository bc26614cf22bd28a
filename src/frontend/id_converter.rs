use crate::rest::{RestError, RestMethod, RestRequest};

/// Translates external blob id strings to canonical ids and back. On POST
/// the input is the id the router just minted and the converter may rewrite
/// it (register an alias, attach an extension); on reads and deletes the
/// input is the client-supplied id to resolve.
#[async_trait::async_trait]
pub trait IdConverter: Send + Sync {
    async fn convert(&self, request: &RestRequest, input: &str) -> Result<String, RestError>;
}

/// Pass-through converter: ids on the wire are already canonical.
pub struct IdentityIdConverter;

#[async_trait::async_trait]
impl IdConverter for IdentityIdConverter {
    async fn convert(&self, request: &RestRequest, input: &str) -> Result<String, RestError> {
        match request.method() {
            RestMethod::Post => Ok(input.to_string()),
            _ => Ok(input.trim_start_matches('/').to_string()),
        }
    }
}
