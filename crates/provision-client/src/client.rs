//! Kubernetes-backed provision client

use crate::apply;
use crate::error::ClientError;
use crate::etcd;
use crate::owned::{ApplyMode, ClusterCredentials, OwnedObject, Owner};
use crate::provision_trait::ProvisionClientTrait;
use crds::{Cluster, InfraMachine, Machine, KUBECONFIG_SECRET_KEY};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Provision client talking to the API server
#[derive(Clone)]
pub struct KubeProvisionClient {
    client: Client,
    field_manager: String,
}

impl std::fmt::Debug for KubeProvisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeProvisionClient")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeProvisionClient {
    /// Create a new client
    ///
    /// `field_manager` names this controller in server-side apply.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn infra_api(&self, gvk: &GroupVersionKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &ApiResource::from_gvk(gvk))
    }

    fn infra_api_for(&self, machine: &InfraMachine) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(machine.group(), machine.version(), &machine.kind);
        self.infra_api(&gvk, machine.namespace())
    }

    async fn patch_finalizers(&self, machine: &InfraMachine, finalizers: Vec<String>) -> Result<InfraMachine, ClientError> {
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": machine.metadata.resource_version,
            }
        });
        let updated = self
            .infra_api_for(machine)
            .patch(machine.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(InfraMachine::from_dynamic(&updated)?)
    }
}

#[async_trait::async_trait]
impl ProvisionClientTrait for KubeProvisionClient {
    async fn get_infra_machine(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<InfraMachine, ClientError> {
        let obj = self.infra_api(gvk, namespace).get(name).await?;
        Ok(InfraMachine::from_dynamic(&obj)?)
    }

    async fn update_infra_machine_status(&self, machine: &InfraMachine, status: Map<String, Value>) -> Result<InfraMachine, ClientError> {
        let patch = json!({
            "metadata": { "resourceVersion": machine.metadata.resource_version },
            "status": status,
        });
        let updated = self
            .infra_api_for(machine)
            .patch_status(machine.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(InfraMachine::from_dynamic(&updated)?)
    }

    async fn add_finalizer(&self, machine: &InfraMachine, finalizer: &str) -> Result<InfraMachine, ClientError> {
        let mut finalizers = machine.metadata.finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(machine.clone());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(machine, finalizers).await
    }

    async fn remove_finalizer(&self, machine: &InfraMachine, finalizer: &str) -> Result<(), ClientError> {
        let finalizers = machine.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let remaining = finalizers.into_iter().filter(|f| f != finalizer).collect();
        match self.patch_finalizers(machine, remaining).await {
            Ok(_) => Ok(()),
            Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClientError> {
        Ok(Api::<Job>::namespaced(self.client.clone(), namespace).get(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClientError> {
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClientError> {
        Ok(Api::<Namespace>::all(self.client.clone()).get(name).await?)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, ClientError> {
        Ok(Api::<Machine>::namespaced(self.client.clone(), namespace).get(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, ClientError> {
        Ok(Api::<Cluster>::namespaced(self.client.clone(), namespace).get(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        Ok(Api::<Secret>::namespaced(self.client.clone(), namespace).get(name).await?)
    }

    async fn apply_owned(&self, owner: &Owner, desired: Vec<OwnedObject>, mode: ApplyMode) -> Result<(), ClientError> {
        debug!("Applying {} objects for {} ({:?})", desired.len(), owner, mode);
        apply::apply_owned(&self.client, &self.field_manager, owner, desired, mode).await
    }

    async fn cluster_credentials(&self, cluster: &Cluster) -> Result<ClusterCredentials, ClientError> {
        let namespace = cluster.metadata.namespace.clone().unwrap_or_default();
        let secret_name = cluster.kubeconfig_secret_name();
        let secret = self.get_secret(&namespace, &secret_name).await?;

        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| {
                ClientError::InvalidObject(format!("secret {}/{} has no {} key", namespace, secret_name, KUBECONFIG_SECRET_KEY))
            })?;
        let kubeconfig = String::from_utf8(kubeconfig.0.clone()).map_err(|e| {
            ClientError::Kubeconfig(format!("secret {}/{} is not UTF-8: {}", namespace, secret_name, e))
        })?;

        Ok(ClusterCredentials {
            cluster_name: cluster.metadata.name.clone().unwrap_or_default(),
            namespace,
            kubeconfig,
        })
    }

    async fn etcd_safely_removed(&self, credentials: &ClusterCredentials, runtime: &str, node_name: &str) -> Result<bool, ClientError> {
        etcd::safely_removed(credentials, runtime, node_name).await
    }
}
