use serde::{Deserialize, Serialize};

/// Tunables for the router core. Parallelism caps how many replicas an
/// operation contacts concurrently; success targets are the minimum replica
/// acknowledgements needed to declare the operation successful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub datacenter_id: u8,
    pub put_parallelism: usize,
    pub put_success_target: usize,
    pub get_parallelism: usize,
    pub get_success_target: usize,
    pub delete_parallelism: usize,
    pub delete_success_target: usize,
    /// Deadline for a single replica request.
    pub request_timeout_ms: u64,
    /// Deadline for a whole operation.
    pub operation_timeout_ms: u64,
    pub max_blob_size_bytes: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            datacenter_id: 1,
            put_parallelism: 3,
            put_success_target: 2,
            get_parallelism: 2,
            get_success_target: 1,
            delete_parallelism: 3,
            delete_success_target: 2,
            request_timeout_ms: 2_000,
            operation_timeout_ms: 10_000,
            max_blob_size_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}
