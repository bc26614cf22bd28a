use bytes::Bytes;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::EnumString;

/// TTL value meaning the blob never expires.
pub const TTL_INFINITE: i64 = -1;

/// Typed blob properties recorded at upload time and returned on reads.
#[derive(Debug, Clone, Serialize, Deserialize, Builder, PartialEq)]
pub struct BlobProperties {
    pub blob_size: u64,
    pub service_id: String,
    pub content_type: String,
    #[builder(default)]
    pub owner_id: Option<String>,
    #[builder(default = "TTL_INFINITE")]
    pub ttl_secs: i64,
    #[builder(default)]
    pub is_private: bool,
    pub creation_time_ms: u64,
}

impl BlobProperties {
    /// Absolute expiry in milliseconds, or `None` for an infinite TTL.
    pub fn expires_at_ms(&self) -> Option<u64> {
        (self.ttl_secs != TTL_INFINITE)
            .then(|| self.creation_time_ms + (self.ttl_secs as u64) * 1_000)
    }
}

/// Properties plus the opaque user metadata attached at upload time.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobInfo {
    pub properties: BlobProperties,
    pub user_metadata: Bytes,
}

/// What a successful GET operation hands back: the first replica body to
/// arrive, along with the blob info.
#[derive(Debug, Clone)]
pub struct GetBlobPayload {
    pub info: BlobInfo,
    pub body: Bytes,
}

/// Whether reads may return blobs that are deleted or past their TTL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, strum::Display)]
pub enum GetOption {
    #[default]
    #[strum(serialize = "None")]
    None,
    #[strum(serialize = "Include_Expired_Blobs")]
    IncludeExpiredBlobs,
    #[strum(serialize = "Include_Deleted_Blobs")]
    IncludeDeletedBlobs,
    #[strum(serialize = "Include_All")]
    IncludeAll,
}

impl GetOption {
    pub fn includes_deleted(self) -> bool {
        matches!(self, GetOption::IncludeDeletedBlobs | GetOption::IncludeAll)
    }

    pub fn includes_expired(self) -> bool {
        matches!(self, GetOption::IncludeExpiredBlobs | GetOption::IncludeAll)
    }
}
