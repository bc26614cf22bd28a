pub mod blob_id;
pub mod test_objects;

use std::{
    collections::{BTreeSet, HashMap},
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};

pub use blob_id::{BlobId, BlobIdError, UNKNOWN_DATACENTER_ID};

/// Identifies one datanode in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataNodeId {
    pub hostname: String,
    pub port: u16,
    pub datacenter_name: String,
}

impl DataNodeId {
    pub fn new(hostname: &str, port: u16, datacenter_name: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            datacenter_name: datacenter_name.to_string(),
        }
    }
}

impl Display for DataNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// A replication group. Blobs are placed in exactly one partition; the
/// partition's replica list is stable for the life of the cluster view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u64);

impl PartitionId {
    pub fn to_path_string(&self) -> String {
        format!("Partition[{}]", self.0)
    }
}

impl Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path_string())
    }
}

/// One copy of a partition on a specific datanode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaId {
    pub partition: PartitionId,
    pub node: DataNodeId,
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.node)
    }
}

/// Read view of cluster topology. Implementations must be safe for
/// concurrent reads.
pub trait ClusterView: Send + Sync {
    /// Partitions that accept new blobs, in a stable order.
    fn writable_partitions(&self) -> Vec<PartitionId>;

    fn has_partition(&self, partition: PartitionId) -> bool;

    /// Replicas of a partition in cluster-map order. Non-empty for every
    /// partition the view knows about.
    fn replicas(&self, partition: PartitionId) -> Vec<ReplicaId>;

    fn datanodes(&self) -> Vec<DataNodeId>;

    /// All `host:port` datanodes sharing at least one partition with the
    /// named node. `None` when the node is not part of the cluster.
    fn peers(&self, hostname: &str, port: u16) -> Option<BTreeSet<String>>;

    fn datacenter_name(&self, datacenter_id: u8) -> Option<String>;
}

/// A static single-datacenter cluster view held entirely in memory.
pub struct InMemoryClusterView {
    datacenter_id: u8,
    datacenter_name: String,
    nodes: Vec<DataNodeId>,
    partitions: HashMap<PartitionId, Vec<ReplicaId>>,
    partition_order: Vec<PartitionId>,
}

impl InMemoryClusterView {
    /// Builds `partition_count` partitions with `replicas_per_partition`
    /// replicas each, spread round-robin over `node_count` datanodes.
    pub fn new(
        datacenter_name: &str,
        datacenter_id: u8,
        hostname: &str,
        base_port: u16,
        node_count: usize,
        partition_count: u64,
        replicas_per_partition: usize,
    ) -> Self {
        let nodes: Vec<DataNodeId> = (0..node_count)
            .map(|i| DataNodeId::new(hostname, base_port + i as u16, datacenter_name))
            .collect();
        let mut partitions = HashMap::new();
        let mut partition_order = Vec::new();
        for p in 0..partition_count {
            let partition = PartitionId(p);
            let replicas = (0..replicas_per_partition)
                .map(|i| ReplicaId {
                    partition,
                    node: nodes[(p as usize + i) % nodes.len()].clone(),
                })
                .collect();
            partitions.insert(partition, replicas);
            partition_order.push(partition);
        }
        Self {
            datacenter_id,
            datacenter_name: datacenter_name.to_string(),
            nodes,
            partitions,
            partition_order,
        }
    }

    pub fn datacenter_id(&self) -> u8 {
        self.datacenter_id
    }
}

impl ClusterView for InMemoryClusterView {
    fn writable_partitions(&self) -> Vec<PartitionId> {
        self.partition_order.clone()
    }

    fn has_partition(&self, partition: PartitionId) -> bool {
        self.partitions.contains_key(&partition)
    }

    fn replicas(&self, partition: PartitionId) -> Vec<ReplicaId> {
        self.partitions.get(&partition).cloned().unwrap_or_default()
    }

    fn datanodes(&self) -> Vec<DataNodeId> {
        self.nodes.clone()
    }

    fn peers(&self, hostname: &str, port: u16) -> Option<BTreeSet<String>> {
        if !self
            .nodes
            .iter()
            .any(|n| n.hostname == hostname && n.port == port)
        {
            return None;
        }
        let mut peers = BTreeSet::new();
        for replicas in self.partitions.values() {
            let on_node = replicas
                .iter()
                .any(|r| r.node.hostname == hostname && r.node.port == port);
            if !on_node {
                continue;
            }
            for replica in replicas {
                if replica.node.hostname != hostname || replica.node.port != port {
                    peers.insert(replica.node.to_string());
                }
            }
        }
        Some(peers)
    }

    fn datacenter_name(&self, datacenter_id: u8) -> Option<String> {
        (datacenter_id == self.datacenter_id).then(|| self.datacenter_name.clone())
    }
}
