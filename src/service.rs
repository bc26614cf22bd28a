use std::{net::SocketAddr, sync::Arc};

use account_service::{Account, AccountService, Container, InMemoryAccountService};
use anyhow::{Context, Result};
use axum_server::Handle;
use cluster_map::InMemoryClusterView;
use prometheus::Registry;
use router::{
    local::{LocalReplicaLayout, LocalTransport},
    BlobRouter, Clock, RouterCore, SystemClock,
};
use tokio::{
    signal,
    sync::watch,
};
use tracing::info;

use crate::{
    config::{AccountSeed, ServerConfig},
    frontend::{
        id_converter::IdentityIdConverter, response::ResponseHandler,
        security::HeaderSecurityService, BlobFrontend,
    },
    metrics::{self, ApiMetrics},
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    pub frontend: Arc<BlobFrontend>,
    pub router: Arc<dyn BlobRouter>,
    pub metrics_registry: Arc<Registry>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let registry = metrics::init_provider().context("error initializing metrics provider")?;
        let metrics_registry = Arc::new(registry);
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let cluster = Arc::new(InMemoryClusterView::new(
            &config.cluster.datacenter_name,
            config.cluster.datacenter_id,
            &config.cluster.hostname,
            config.cluster.base_port,
            config.cluster.node_count,
            config.cluster.partition_count,
            config.cluster.replicas_per_partition,
        ));
        let accounts = Arc::new(InMemoryAccountService::new());
        accounts.update_accounts(config.accounts.iter().map(seed_account).collect());

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let layout = Arc::new(LocalReplicaLayout::new());
        let transport = Arc::new(LocalTransport::new(layout, clock.clone()));
        let router: Arc<dyn BlobRouter> = Arc::new(RouterCore::new(
            cluster.clone(),
            transport,
            clock.clone(),
            config.router.clone(),
        ));

        let frontend = Arc::new(BlobFrontend::new(
            router.clone(),
            cluster,
            accounts as Arc<dyn AccountService>,
            Arc::new(IdentityIdConverter),
            Arc::new(HeaderSecurityService::new(
                config.frontend.cache_validity_secs,
            )),
            ResponseHandler::new(),
            Arc::new(ApiMetrics::new()),
            clock,
        ));
        frontend.start();

        Ok(Self {
            config,
            shutdown_tx,
            shutdown_rx,
            frontend,
            router,
            metrics_registry,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let route_state = RouteState {
            frontend: self.frontend.clone(),
            registry: self.metrics_registry.clone(),
        };

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let frontend = self.frontend.clone();
        let router = self.router.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh, shutdown_tx).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
            frontend.shutdown();
            router.close();
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("frontend api listening on {}", self.config.listen_addr);
        let routes = create_routes(route_state);
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;
        Ok(())
    }
}

fn seed_account(seed: &AccountSeed) -> Account {
    let mut containers: Vec<Container> = seed
        .containers
        .iter()
        .map(|c| Container {
            id: c.id,
            name: c.name.clone(),
            status: account_service::ContainerStatus::Active,
            is_private: c.is_private,
            parent_account_id: seed.id,
        })
        .collect();
    if seed.legacy_containers {
        containers.push(Container {
            id: account_service::DEFAULT_PUBLIC_CONTAINER_ID,
            name: account_service::DEFAULT_PUBLIC_CONTAINER_NAME.to_string(),
            status: account_service::ContainerStatus::Active,
            is_private: false,
            parent_account_id: seed.id,
        });
        containers.push(Container {
            id: account_service::DEFAULT_PRIVATE_CONTAINER_ID,
            name: account_service::DEFAULT_PRIVATE_CONTAINER_NAME.to_string(),
            status: account_service::ContainerStatus::Active,
            is_private: true,
            parent_account_id: seed.id,
        });
    }
    Account {
        id: seed.id,
        name: seed.name.clone(),
        status: account_service::AccountStatus::Active,
        containers,
    }
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    handle.shutdown();
    let _ = shutdown_tx.send(());
    info!("signal received, shutting down server gracefully");
}
