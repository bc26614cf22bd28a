//! Cluster-introspection responses served without router dispatch.

use bytes::Bytes;
use cluster_map::{BlobId, ClusterView};
use serde_json::json;

use crate::rest::{RestError, RestErrorKind, RestRequest};

pub const NAME_QUERY_PARAM: &str = "name";
pub const PORT_QUERY_PARAM: &str = "port";

/// `GET /peers?name=H&port=P`: every datanode sharing a partition with the
/// named node.
pub fn peers_response(
    request: &RestRequest,
    cluster: &dyn ClusterView,
) -> Result<Bytes, RestError> {
    let name = request
        .query_param(NAME_QUERY_PARAM)
        .ok_or_else(|| RestError::missing_args(format!("{NAME_QUERY_PARAM} param missing")))?;
    let port = request
        .query_param(PORT_QUERY_PARAM)
        .ok_or_else(|| RestError::missing_args(format!("{PORT_QUERY_PARAM} param missing")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RestError::invalid_argument(format!("{PORT_QUERY_PARAM} is not a port: {port}")))?;
    let peers = cluster.peers(&name, port).ok_or_else(|| {
        RestError::new(
            RestErrorKind::NotFound,
            format!("no datanode {name}:{port} in the cluster"),
        )
    })?;
    let body = json!({ "peers": peers.into_iter().collect::<Vec<_>>() });
    Ok(Bytes::from(serde_json::to_vec(&body).map_err(|e| {
        RestError::internal(format!("serializing peers: {e}"))
    })?))
}

/// `GET /<blobId>/Replicas`: the replica list of the blob's partition.
pub fn replicas_response(
    blob_id: &BlobId,
    cluster: &dyn ClusterView,
) -> Result<Bytes, RestError> {
    let replicas = cluster.replicas(blob_id.partition());
    let list = format!(
        "[{}]",
        replicas
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",")
    );
    let body = json!({ "replicas": list });
    Ok(Bytes::from(serde_json::to_vec(&body).map_err(|e| {
        RestError::internal(format!("serializing replicas: {e}"))
    })?))
}
