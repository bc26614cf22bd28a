use std::net::SocketAddr;

use anyhow::Result;
use figment::{
    providers::{Format, Serialized, Yaml},
    Figment,
};
use router::RouterConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub cluster: ClusterConfig,
    pub router: RouterConfig,
    pub frontend: FrontendConfig,
    /// Accounts seeded into the directory at startup, alongside the unknown
    /// account.
    pub accounts: Vec<AccountSeed>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:1174".to_string(),
            cluster: ClusterConfig::default(),
            router: RouterConfig::default(),
            frontend: FrontendConfig::default(),
            accounts: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::string(&config_str))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        self.cluster.validate()
    }
}

/// Shape of the in-process cluster the server hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub datacenter_name: String,
    pub datacenter_id: u8,
    pub hostname: String,
    pub base_port: u16,
    pub node_count: usize,
    pub partition_count: u64,
    pub replicas_per_partition: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            datacenter_name: "DC1".to_string(),
            datacenter_id: 1,
            hostname: "localhost".to_string(),
            base_port: 6000,
            node_count: 6,
            partition_count: 8,
            replicas_per_partition: 3,
        }
    }
}

impl ClusterConfig {
    fn validate(&self) -> Result<()> {
        if self.partition_count == 0 || self.replicas_per_partition == 0 {
            return Err(anyhow::anyhow!(
                "cluster must have at least one partition and one replica"
            ));
        }
        if self.node_count < self.replicas_per_partition {
            return Err(anyhow::anyhow!(
                "{} nodes cannot host {} replicas per partition",
                self.node_count,
                self.replicas_per_partition
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Cache validity advertised on public blob responses.
    pub cache_validity_secs: u64,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        FrontendConfig {
            cache_validity_secs: 365 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    pub id: i16,
    pub name: String,
    /// Whether the account carries the legacy default public/private
    /// containers used by service-id uploads.
    #[serde(default)]
    pub legacy_containers: bool,
    #[serde(default)]
    pub containers: Vec<ContainerSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSeed {
    pub id: i16,
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_listen_addr_is_rejected() {
        let config = ServerConfig {
            listen_addr: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn undersized_cluster_is_rejected() {
        let config = ServerConfig {
            cluster: ClusterConfig {
                node_count: 2,
                replicas_per_partition: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
