//! Canonical blob identifiers.
//!
//! A blob id names a stored blob and pins it to a partition. The string form
//! is URL-safe base64 over a fixed binary layout. Two layout versions exist:
//! version 1 carries no account or container (both read as the unknown
//! sentinel), version 2 embeds both.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::{ClusterView, PartitionId};

pub const BLOB_ID_V1: u8 = 1;
pub const BLOB_ID_V2: u8 = 2;

/// Datacenter id used when the originating datacenter is not recorded.
pub const UNKNOWN_DATACENTER_ID: u8 = 0;

/// Sentinel account/container id embedded in ids that predate the account
/// directory. Matches the unknown directory records.
const UNKNOWN_ID: i16 = -1;

const V1_LEN: usize = 10;
const V2_LEN: usize = 14;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlobIdError {
    #[error("blob id is empty")]
    Empty,
    #[error("blob id is not valid base64")]
    Encoding,
    #[error("blob id has unexpected length {0}")]
    InvalidLength(usize),
    #[error("blob id version {0} is not supported")]
    UnsupportedVersion(u8),
    #[error("partition {0} is not in the cluster view")]
    UnknownPartition(u64),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlobId {
    version: u8,
    datacenter_id: u8,
    account_id: i16,
    container_id: i16,
    partition: PartitionId,
}

impl BlobId {
    /// A version 1 id: no embedded account or container.
    pub fn new_v1(datacenter_id: u8, partition: PartitionId) -> Self {
        Self {
            version: BLOB_ID_V1,
            datacenter_id,
            account_id: UNKNOWN_ID,
            container_id: UNKNOWN_ID,
            partition,
        }
    }

    pub fn new_v2(
        datacenter_id: u8,
        account_id: i16,
        container_id: i16,
        partition: PartitionId,
    ) -> Self {
        Self {
            version: BLOB_ID_V2,
            datacenter_id,
            account_id,
            container_id,
            partition,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn datacenter_id(&self) -> u8 {
        self.datacenter_id
    }

    /// Embedded account id; the unknown sentinel for version 1 ids.
    pub fn account_id(&self) -> i16 {
        self.account_id
    }

    /// Embedded container id; the unknown sentinel for version 1 ids.
    pub fn container_id(&self) -> i16 {
        self.container_id
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// URL-safe string form.
    pub fn encode(&self) -> String {
        let mut buf = Vec::with_capacity(V2_LEN);
        buf.push(self.version);
        buf.push(self.datacenter_id);
        if self.version == BLOB_ID_V2 {
            buf.extend_from_slice(&self.account_id.to_be_bytes());
            buf.extend_from_slice(&self.container_id.to_be_bytes());
        }
        buf.extend_from_slice(&self.partition.0.to_be_bytes());
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Parses the string form and verifies the partition against the
    /// cluster view.
    pub fn decode(s: &str, view: &dyn ClusterView) -> Result<Self, BlobIdError> {
        if s.is_empty() {
            return Err(BlobIdError::Empty);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map_err(|_| BlobIdError::Encoding)?;
        if bytes.is_empty() {
            return Err(BlobIdError::InvalidLength(0));
        }
        let id = match bytes[0] {
            BLOB_ID_V1 => {
                if bytes.len() != V1_LEN {
                    return Err(BlobIdError::InvalidLength(bytes.len()));
                }
                BlobId::new_v1(
                    bytes[1],
                    PartitionId(u64::from_be_bytes(bytes[2..10].try_into().unwrap())),
                )
            }
            BLOB_ID_V2 => {
                if bytes.len() != V2_LEN {
                    return Err(BlobIdError::InvalidLength(bytes.len()));
                }
                BlobId::new_v2(
                    bytes[1],
                    i16::from_be_bytes(bytes[2..4].try_into().unwrap()),
                    i16::from_be_bytes(bytes[4..6].try_into().unwrap()),
                    PartitionId(u64::from_be_bytes(bytes[6..14].try_into().unwrap())),
                )
            }
            v => return Err(BlobIdError::UnsupportedVersion(v)),
        };
        if !view.has_partition(id.partition) {
            return Err(BlobIdError::UnknownPartition(id.partition.0));
        }
        Ok(id)
    }
}
