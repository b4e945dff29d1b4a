//! Machine Provisioning Controller
//!
//! Provisions and tears down infrastructure machines by running the machine
//! driver in Kubernetes jobs:
//! - creates the driver job and its supporting objects for each machine
//! - reflects job and pod outcomes onto the machine's status
//! - gates deletion on etcd membership, the create job and node draining

mod config;
mod controller;
mod error;
mod outcome;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use anyhow::{Context, Result};
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Machine Provisioning Controller");

    let config = ControllerConfig::from_env().context("loading configuration")?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Image: {}", config.image);
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(config).await.context("starting controller")?;
    controller.run().await.context("controller stopped")?;

    Ok(())
}
