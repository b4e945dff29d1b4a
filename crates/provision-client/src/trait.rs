//! ProvisionClient trait for mocking
//!
//! This trait abstracts every cluster interaction of the controller. The
//! concrete `KubeProvisionClient` implements it against the API server, and
//! tests use the in-memory `MockProvisionClient`.

use crate::error::ClientError;
use crate::owned::{ApplyMode, ClusterCredentials, OwnedObject, Owner};
use crds::{Cluster, InfraMachine, Machine};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::GroupVersionKind;
use serde_json::{Map, Value};

/// Trait for cluster operations of the machine provision controller
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Lookups of missing objects return `ClientError::NotFound`.
#[async_trait::async_trait]
pub trait ProvisionClientTrait: Send + Sync {
    // Infrastructure machines
    async fn get_infra_machine(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<InfraMachine, ClientError>;

    /// Writes `status` to the status subresource.
    ///
    /// The write carries `machine`'s resource version, so a stale copy fails
    /// with `ClientError::Conflict`.
    async fn update_infra_machine_status(&self, machine: &InfraMachine, status: Map<String, Value>) -> Result<InfraMachine, ClientError>;

    async fn add_finalizer(&self, machine: &InfraMachine, finalizer: &str) -> Result<InfraMachine, ClientError>;
    async fn remove_finalizer(&self, machine: &InfraMachine, finalizer: &str) -> Result<(), ClientError>;

    // Jobs and pods
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClientError>;
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClientError>;

    // Lookups
    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClientError>;
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, ClientError>;
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, ClientError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError>;

    /// Reconciles every object of the registered child types owned by
    /// `owner` against `desired`. Owned objects missing from `desired` are
    /// deleted, so an empty set removes every child.
    async fn apply_owned(&self, owner: &Owner, desired: Vec<OwnedObject>, mode: ApplyMode) -> Result<(), ClientError>;

    // Etcd membership
    async fn cluster_credentials(&self, cluster: &Cluster) -> Result<ClusterCredentials, ClientError>;

    /// True once `node_name` can leave the cluster without breaking etcd quorum.
    /// Requests removal when it is not yet safe.
    async fn etcd_safely_removed(&self, credentials: &ClusterCredentials, runtime: &str, node_name: &str) -> Result<bool, ClientError>;
}
