//! Etcd safe-removal check against a downstream cluster
//!
//! The downstream runtime's etcd controller watches its node objects: a node
//! annotated with the remove request is taken out of etcd membership and then
//! marked with the removed-node-name annotation.

use crate::error::ClientError;
use crate::owned::ClusterCredentials;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Annotation requesting removal of a node from etcd
pub(crate) fn remove_annotation(runtime: &str) -> String {
    format!("etcd.{}.cattle.io/remove", runtime)
}

/// Annotation set once the node left etcd
pub(crate) fn removed_node_annotation(runtime: &str) -> String {
    format!("etcd.{}.cattle.io/removed-node-name", runtime)
}

/// Builds a client for the downstream cluster
async fn downstream_client(credentials: &ClusterCredentials) -> Result<Client, ClientError> {
    let kubeconfig: Kubeconfig = serde_yaml::from_str(&credentials.kubeconfig).map_err(|e| {
        ClientError::Kubeconfig(format!("invalid kubeconfig for cluster {}: {}", credentials.cluster_name, e))
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            ClientError::Kubeconfig(format!("failed to load kubeconfig for cluster {}: {}", credentials.cluster_name, e))
        })?;
    Client::try_from(config).map_err(ClientError::from)
}

pub(crate) async fn safely_removed(
    credentials: &ClusterCredentials,
    runtime: &str,
    node_name: &str,
) -> Result<bool, ClientError> {
    let client = downstream_client(credentials).await?;
    let nodes: Api<Node> = Api::all(client);

    let Some(node) = nodes.get_opt(node_name).await? else {
        debug!("Node {} no longer exists in cluster {}", node_name, credentials.cluster_name);
        return Ok(true);
    };

    let annotations = node.metadata.annotations.unwrap_or_default();
    if annotations.contains_key(&removed_node_annotation(runtime)) {
        return Ok(true);
    }

    let remove_key = remove_annotation(runtime);
    if annotations.get(&remove_key).map(String::as_str) != Some("true") {
        info!("Requesting etcd removal of node {} in cluster {}", node_name, credentials.cluster_name);
        let request = BTreeMap::from([(remove_key, "true")]);
        let patch = json!({ "metadata": { "annotations": request } });
        nodes
            .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }

    Ok(false)
}
