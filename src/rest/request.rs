use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use account_service::{Account, Container};
use bytes::Bytes;
use futures::stream::BoxStream;
use router::GetOption;
use strum::EnumString;

use super::headers::{ByteRange, TARGET_ACCOUNT_KEY, TARGET_CONTAINER_KEY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    Head,
    Post,
    Delete,
    Other(String),
}

impl RestMethod {
    pub fn as_str(&self) -> &str {
        match self {
            RestMethod::Get => "GET",
            RestMethod::Head => "HEAD",
            RestMethod::Post => "POST",
            RestMethod::Delete => "DELETE",
            RestMethod::Other(name) => name,
        }
    }
}

/// Trailing path segment selecting an alternate view of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
pub enum SubResource {
    BlobInfo,
    UserMetadata,
    Replicas,
}

/// Non-blob operations addressed by path rather than blob id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendOperation {
    GetPeers,
}

#[derive(Debug, Clone, Default)]
pub struct RequestPath {
    pub operation: Option<FrontendOperation>,
    pub blob_id: Option<String>,
    pub sub_resource: Option<SubResource>,
}

impl RequestPath {
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Self::default();
        }
        if trimmed == "peers" {
            return Self {
                operation: Some(FrontendOperation::GetPeers),
                ..Self::default()
            };
        }
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.len() >= 2 {
            if let Ok(sub) = SubResource::from_str(segments[segments.len() - 1]) {
                return Self {
                    operation: None,
                    blob_id: Some(segments[..segments.len() - 1].join("/")),
                    sub_resource: Some(sub),
                };
            }
        }
        Self {
            operation: None,
            blob_id: Some(trimmed.to_string()),
            sub_resource: None,
        }
    }
}

/// Values stages write into the request's scratch space.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(String),
    TargetAccount(Account),
    TargetContainer(Container),
    Range(ByteRange),
    GetOption(GetOption),
}

/// One parsed REST request plus its per-request scratch space. Header names
/// are lowercased; args are seeded from the headers so stages see one
/// namespace, as the pipeline's injection rules require.
pub struct RestRequest {
    method: RestMethod,
    uri: String,
    path: RequestPath,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    args: Mutex<HashMap<String, Arg>>,
    body: Mutex<Option<BoxStream<'static, anyhow::Result<Bytes>>>>,
    open: AtomicBool,
}

impl RestRequest {
    pub fn new(
        method: RestMethod,
        uri: &str,
        headers: BTreeMap<String, String>,
        body: Option<BoxStream<'static, anyhow::Result<Bytes>>>,
    ) -> Self {
        let (path, query_str) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        let mut query = BTreeMap::new();
        if let Some(query_str) = query_str {
            for pair in query_str.split('&') {
                match pair.split_once('=') {
                    Some((k, v)) => query.insert(k.to_string(), v.to_string()),
                    None => query.insert(pair.to_string(), String::new()),
                };
            }
        }
        let args = headers
            .iter()
            .map(|(name, value)| (name.clone(), Arg::Value(value.clone())))
            .collect();
        Self {
            method,
            uri: uri.to_string(),
            path: RequestPath::parse(path),
            headers,
            query,
            args: Mutex::new(args),
            body: Mutex::new(body),
            open: AtomicBool::new(true),
        }
    }

    pub fn method(&self) -> &RestMethod {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> &RequestPath {
        &self.path
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    pub fn has_arg(&self, key: &str) -> bool {
        self.args.lock().unwrap().contains_key(key)
    }

    pub fn set_arg(&self, key: &str, value: Arg) {
        self.args.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn target_account(&self) -> Option<Account> {
        match self.args.lock().unwrap().get(TARGET_ACCOUNT_KEY) {
            Some(Arg::TargetAccount(account)) => Some(account.clone()),
            _ => None,
        }
    }

    pub fn target_container(&self) -> Option<Container> {
        match self.args.lock().unwrap().get(TARGET_CONTAINER_KEY) {
            Some(Arg::TargetContainer(container)) => Some(container.clone()),
            _ => None,
        }
    }

    pub fn byte_range(&self) -> Option<ByteRange> {
        match self.args.lock().unwrap().get(super::headers::RANGE) {
            Some(Arg::Range(range)) => Some(*range),
            _ => None,
        }
    }

    pub fn get_option(&self) -> GetOption {
        match self.args.lock().unwrap().get(super::headers::GET_OPTION) {
            Some(Arg::GetOption(option)) => *option,
            _ => GetOption::None,
        }
    }

    /// Hands the body stream to the caller; subsequent calls return `None`.
    pub fn take_body(&self) -> Option<BoxStream<'static, anyhow::Result<Bytes>>> {
        self.body.lock().unwrap().take()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Releases the request: drops any unconsumed body. Safe to call more
    /// than once.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.body.lock().unwrap().take();
    }
}
