//! Header names and parsing helpers for the REST protocol.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use router::GetOption;

use super::error::RestError;

pub const SERVICE_ID: &str = "x-ambry-service-id";
pub const CONTENT_TYPE: &str = "x-ambry-content-type";
pub const TTL: &str = "x-ambry-ttl";
pub const PRIVATE: &str = "x-ambry-private";
pub const BLOB_SIZE: &str = "x-ambry-blob-size";
pub const OWNER_ID: &str = "x-ambry-owner-id";
pub const TARGET_ACCOUNT: &str = "x-ambry-target-account";
pub const TARGET_CONTAINER: &str = "x-ambry-target-container";
pub const GET_OPTION: &str = "x-ambry-get-option";
pub const CREATION_TIME: &str = "x-ambry-creation-time";
pub const ERROR_CODE: &str = "x-ambry-error-code";
pub const DELETED: &str = "x-ambry-deleted";
pub const USER_METADATA_PREFIX: &str = "x-ambry-um-";

/// Keys the pipeline writes into request args once the target account and
/// container are resolved. They must never arrive on the wire.
pub const TARGET_ACCOUNT_KEY: &str = "ambry-internal-keys-target-account";
pub const TARGET_CONTAINER_KEY: &str = "ambry-internal-keys-target-container";

pub const LOCATION: &str = "location";
pub const DATE: &str = "date";
pub const LAST_MODIFIED: &str = "last-modified";
pub const RANGE: &str = "range";
pub const CONTENT_RANGE: &str = "content-range";
pub const ACCEPT_RANGES: &str = "accept-ranges";
pub const IF_MODIFIED_SINCE: &str = "if-modified-since";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_TYPE_STD: &str = "content-type";
pub const CACHE_CONTROL: &str = "cache-control";
pub const PRAGMA: &str = "pragma";
pub const EXPIRES: &str = "expires";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub fn http_date(epoch_ms: u64) -> String {
    let datetime = DateTime::<Utc>::from_timestamp_millis(epoch_ms as i64)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).unwrap());
    datetime.format(HTTP_DATE_FORMAT).to_string()
}

pub fn parse_http_date(value: &str) -> Option<u64> {
    NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis() as u64)
}

pub fn parse_ttl(value: Option<&str>) -> Result<i64, RestError> {
    match value {
        None => Ok(router::TTL_INFINITE),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| RestError::invalid_argument(format!("{TTL} is not a number: {raw}"))),
    }
}

pub fn parse_bool(name: &str, value: Option<&str>) -> Result<bool, RestError> {
    match value {
        None => Ok(false),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(raw) => Err(RestError::invalid_argument(format!(
            "{name} must be true or false, got {raw}"
        ))),
    }
}

pub fn parse_blob_size(value: Option<&str>) -> Result<Option<u64>, RestError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| RestError::invalid_argument(format!("{BLOB_SIZE} is not a number: {raw}"))),
    }
}

pub fn parse_get_option(value: Option<&str>) -> Result<GetOption, RestError> {
    match value {
        None => Ok(GetOption::None),
        Some(raw) => raw
            .parse::<GetOption>()
            .map_err(|_| RestError::invalid_argument(format!("unrecognized {GET_OPTION}: {raw}"))),
    }
}

/// `Range: bytes=a-b | a- | -b`, not yet resolved against a blob size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    Closed(u64, u64),
    FromOffset(u64),
    LastNBytes(u64),
}

impl ByteRange {
    pub fn parse(header: &str) -> Result<Self, RestError> {
        let bad = || RestError::invalid_argument(format!("unparseable range header: {header}"));
        let spec = header.trim().strip_prefix("bytes=").ok_or_else(bad)?;
        let (start, end) = spec.split_once('-').ok_or_else(bad)?;
        match (start.is_empty(), end.is_empty()) {
            (true, false) => Ok(ByteRange::LastNBytes(end.parse().map_err(|_| bad())?)),
            (false, true) => Ok(ByteRange::FromOffset(start.parse().map_err(|_| bad())?)),
            (false, false) => {
                let start: u64 = start.parse().map_err(|_| bad())?;
                let end: u64 = end.parse().map_err(|_| bad())?;
                if start > end {
                    return Err(bad());
                }
                Ok(ByteRange::Closed(start, end))
            }
            (true, true) => Err(bad()),
        }
    }

    /// Inclusive byte offsets within a blob of `total` bytes.
    pub fn resolve(self, total: u64) -> Result<(u64, u64), RestError> {
        let unsatisfiable = || {
            RestError::new(
                super::error::RestErrorKind::RangeNotSatisfiable,
                format!("range {self:?} outside blob of {total} bytes"),
            )
        };
        match self {
            ByteRange::Closed(start, end) => {
                if start >= total {
                    return Err(unsatisfiable());
                }
                Ok((start, end.min(total.saturating_sub(1))))
            }
            ByteRange::FromOffset(start) => {
                if start >= total {
                    return Err(unsatisfiable());
                }
                Ok((start, total - 1))
            }
            ByteRange::LastNBytes(n) => {
                if n > total {
                    return Err(unsatisfiable());
                }
                if total == 0 || n == 0 {
                    return Err(unsatisfiable());
                }
                Ok((total - n, total - 1))
            }
        }
    }
}

/// Serializes `x-ambry-um-*` headers into the stored wire form. An upload
/// with no user metadata stores an empty byte string.
pub fn user_metadata_from_headers(headers: &BTreeMap<String, String>) -> Bytes {
    let entries: BTreeMap<&str, &str> = headers
        .iter()
        .filter(|(name, _)| name.starts_with(USER_METADATA_PREFIX))
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    if entries.is_empty() {
        return Bytes::new();
    }
    Bytes::from(serde_json::to_vec(&entries).expect("string map serializes"))
}

/// Recovers user-metadata headers from the stored wire form. Returns `None`
/// for blobs whose metadata predates the header form; callers serve the raw
/// bytes instead.
pub fn user_metadata_to_headers(bytes: &Bytes) -> Option<BTreeMap<String, String>> {
    if bytes.is_empty() {
        return Some(BTreeMap::new());
    }
    serde_json::from_slice::<BTreeMap<String, String>>(bytes)
        .ok()
        .filter(|map| map.keys().all(|k| k.starts_with(USER_METADATA_PREFIX)))
}
