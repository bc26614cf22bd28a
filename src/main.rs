use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod config;
mod frontend;
mod metrics;
mod rest;
mod routes;
mod service;

#[cfg(test)]
mod integration_test;
#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => match config::ServerConfig::from_path(path.to_str().unwrap()) {
            Ok(config) => config,
            Err(err) => {
                error!("Error loading config: {}", err);
                return;
            }
        },
        None => config::ServerConfig::default(),
    };
    let service = match service::Service::new(config).await {
        Ok(service) => service,
        Err(err) => {
            error!("Error creating service: {}", err);
            return;
        }
    };
    if let Err(err) = service.start().await {
        error!("Error starting service: {}", err);
    }
}
