//! Main controller implementation.
//!
//! This module contains the `Controller` struct that discovers the
//! infrastructure machine kinds served by the API server and runs a watcher
//! for each of them, plus one for provisioning jobs.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::objects::DefaultProvisionObjects;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{is_infra_machine_kind, INFRA_MACHINE_GROUP};
use kube::api::ApiResource;
use kube::discovery::Discovery;
use kube::Client;
use provision_client::KubeProvisionClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for infrastructure machine provisioning.
pub struct Controller {
    /// Running watchers, by the name they log under
    watchers: Vec<(String, JoinHandle<Result<(), ControllerError>>)>,
}

/// Infrastructure machine kinds currently served by the API server
async fn discover_infra_machine_kinds(client: &Client) -> Result<Vec<ApiResource>, ControllerError> {
    let discovery = Discovery::new(client.clone())
        .filter(&[INFRA_MACHINE_GROUP])
        .run()
        .await
        .map_err(|e| ControllerError::Discovery(e.to_string()))?;

    let mut kinds = Vec::new();
    for group in discovery.groups() {
        for (resource, _caps) in group.recommended_resources() {
            if is_infra_machine_kind(&resource.group, &resource.version, &resource.kind) {
                kinds.push(resource);
            }
        }
    }
    Ok(kinds)
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing machine provisioning controller");

        let kube_client = Client::try_default().await?;

        // TODO: watch CustomResourceDefinitions in the group and start watchers for kinds registered after startup
        let kinds = discover_infra_machine_kinds(&kube_client).await?;
        if kinds.is_empty() {
            warn!("No infrastructure machine kinds found in {}", INFRA_MACHINE_GROUP);
        }
        for kind in &kinds {
            info!("Watching {}", kind.kind);
        }

        let client = KubeProvisionClient::new(kube_client.clone(), config.field_manager.clone());
        let objects = DefaultProvisionObjects::new(&config);
        let reconciler = Arc::new(Reconciler::new(Arc::new(client), Arc::new(objects)));
        let watcher = Arc::new(Watcher::new(kube_client, reconciler, config));

        let mut watchers = Vec::with_capacity(kinds.len() + 1);
        for kind in kinds {
            let name = kind.kind.clone();
            let watcher = watcher.clone();
            watchers.push((name, tokio::spawn(async move { watcher.watch_infra_machines(kind).await })));
        }

        let job_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_jobs().await })
        };
        watchers.push(("Job".to_string(), job_watcher));

        Ok(Self { watchers })
    }

    /// Runs until one of the watchers stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Controller running with {} watchers", self.watchers.len());

        let (names, handles): (Vec<String>, Vec<_>) = self.watchers.into_iter().unzip();
        let (result, index, _remaining) = futures::future::select_all(handles).await;
        let name = &names[index];

        result
            .map_err(|e| ControllerError::Watch(format!("{} watcher panicked: {}", name, e)))?
            .map_err(|e| ControllerError::Watch(format!("{} watcher error: {}", name, e)))?;

        Err(ControllerError::Watch(format!("{} watcher stopped", name)))
    }
}
