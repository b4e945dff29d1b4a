//! Provisioning Cluster
//!
//! Aggregate owner of machines. Consulted for its deletion state, its
//! Kubernetes version (to pick the runtime) and the name of its downstream
//! kubeconfig secret.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Key of the kubeconfig inside the downstream kubeconfig secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "provisioning.cattle.io",
    version = "v1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Kubernetes version, e.g. `v1.30.4+rke2r1`
    #[serde(default)]
    pub kubernetes_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

impl Cluster {
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Distribution runtime: `k3s` or `rke2`
    pub fn runtime(&self) -> &'static str {
        runtime_for_version(&self.spec.kubernetes_version)
    }

    /// Secret holding the downstream cluster's kubeconfig
    pub fn kubeconfig_secret_name(&self) -> String {
        format!("{}-kubeconfig", self.metadata.name.as_deref().unwrap_or_default())
    }
}

/// Runtime for a Kubernetes version string
pub fn runtime_for_version(kubernetes_version: &str) -> &'static str {
    if kubernetes_version.contains("k3s") {
        "k3s"
    } else {
        "rke2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_for_version() {
        assert_eq!(runtime_for_version("v1.30.4+k3s1"), "k3s");
        assert_eq!(runtime_for_version("v1.30.4+rke2r1"), "rke2");
        assert_eq!(runtime_for_version(""), "rke2");
    }

    #[test]
    fn test_kubeconfig_secret_name() {
        let cluster = Cluster::new("prod", ClusterSpec::default());
        assert_eq!(cluster.kubeconfig_secret_name(), "prod-kubeconfig");
        assert!(!cluster.is_deleting());
    }
}
