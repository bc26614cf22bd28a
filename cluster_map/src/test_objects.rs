//! Canned cluster views for tests and the in-process local mode.

use crate::InMemoryClusterView;

pub const TEST_DATACENTER: &str = "DC1";
pub const TEST_DATACENTER_ID: u8 = 1;

/// A single-datacenter view where every partition has its own replica count
/// spread over twice as many datanodes.
pub fn mock_cluster_view(partition_count: u64, replicas_per_partition: usize) -> InMemoryClusterView {
    InMemoryClusterView::new(
        TEST_DATACENTER,
        TEST_DATACENTER_ID,
        "localhost",
        6000,
        replicas_per_partition * 2,
        partition_count,
        replicas_per_partition,
    )
}
