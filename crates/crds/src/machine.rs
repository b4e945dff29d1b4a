//! Cluster API Machine
//!
//! The logical machine that owns an infrastructure machine. Read-only from
//! this controller's point of view: consulted for the bootstrap secret, the
//! bound node and the drain condition.

use crate::condition::{find_condition, Condition};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition reporting the outcome of node draining
pub const DRAINING_SUCCEEDED_CONDITION: &str = "DrainingSucceeded";

/// Reason set when draining gave up; removal proceeds anyway
pub const DRAINING_FAILED_REASON: &str = "DrainingFailed";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning cluster
    #[serde(default)]
    pub cluster_name: String,

    /// Bootstrap configuration
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Reference to the infrastructure machine
    #[serde(default)]
    pub infrastructure_ref: InfrastructureReference,

    /// Provider assigned identifier
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the rendered bootstrap data, set once bootstrap is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureReference {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Node bound to this machine, once it joined the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<NodeReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl Machine {
    /// Name of the bound node, if any
    pub fn node_name(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .node_ref
            .as_ref()
            .map(|node| node.name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Bootstrap data secret, if bootstrap finished
    pub fn bootstrap_secret_name(&self) -> Option<&str> {
        self.spec
            .bootstrap
            .data_secret_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// True while draining is explicitly unfinished.
    ///
    /// A `DrainingSucceeded` condition that is False with any reason other
    /// than `DrainingFailed` means the drain is still in progress. A missing
    /// condition does not block.
    pub fn drain_pending(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        match find_condition(&status.conditions, DRAINING_SUCCEEDED_CONDITION) {
            Some(condition) => condition.is_false() && condition.reason != DRAINING_FAILED_REASON,
            None => false,
        }
    }
}
