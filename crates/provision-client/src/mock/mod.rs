//! Mock ProvisionClient for unit testing
//!
//! This module provides an in-memory implementation of ProvisionClientTrait
//! that can be used in unit tests without an API server.
//!
//! The mock is organized into:
//! - `apply.rs` - owned-object apply backed by a per-owner-and-type index
//! - `selector.rs` - label selector matching for pod listing
//!
//! Besides the stores it records write counters and answers etcd removal
//! checks from a script, so tests can assert on exactly what was written.

mod apply;
mod selector;

use crate::error::ClientError;
use crate::owned::{ApplyMode, ClusterCredentials, OwnedKind, OwnedObject, Owner};
use crate::provision_trait::ProvisionClientTrait;
use crds::{Cluster, InfraMachine, Machine, KUBECONFIG_SECRET_KEY};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::GroupVersionKind;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

type Key = (String, String);

/// Owned children of one owner and type, keyed by name
pub(crate) type OwnedIndex = HashMap<(String, OwnedKind), BTreeMap<String, OwnedObject>>;

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Mock ProvisionClient for testing
#[derive(Clone, Default)]
pub struct MockProvisionClient {
    // In-memory storage, keyed by (namespace, name); infra machines by (kind, namespace, name)
    pub(crate) infra_machines: Arc<Mutex<HashMap<(String, String, String), InfraMachine>>>,
    pub(crate) jobs: Arc<Mutex<HashMap<Key, Job>>>,
    pub(crate) pods: Arc<Mutex<HashMap<Key, Pod>>>,
    pub(crate) namespaces: Arc<Mutex<HashMap<String, Namespace>>>,
    pub(crate) machines: Arc<Mutex<HashMap<Key, Machine>>>,
    pub(crate) clusters: Arc<Mutex<HashMap<Key, Cluster>>>,
    pub(crate) secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    // Owned children, per owner and type
    pub(crate) owned: Arc<Mutex<OwnedIndex>>,
    // Scripted etcd answers per node; unscripted nodes are safe
    pub(crate) etcd_answers: Arc<Mutex<HashMap<String, bool>>>,
    // Write counters
    pub(crate) status_updates: Arc<Mutex<usize>>,
    pub(crate) apply_calls: Arc<Mutex<Vec<(String, usize, ApplyMode)>>>,
    pub(crate) child_writes: Arc<Mutex<usize>>,
    pub(crate) etcd_checks: Arc<Mutex<usize>>,
    pub(crate) fail_status_updates: Arc<Mutex<bool>>,
}

impl std::fmt::Debug for MockProvisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvisionClient").finish_non_exhaustive()
    }
}

impl MockProvisionClient {
    /// Create a new empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an infrastructure machine (for test setup)
    ///
    /// Assigns a resource version when none is set.
    pub fn add_infra_machine(&self, mut machine: InfraMachine) {
        machine.metadata.resource_version.get_or_insert_with(|| "1".to_string());
        let k = (machine.kind.clone(), machine.namespace().to_string(), machine.name().to_string());
        self.infra_machines.lock().unwrap().insert(k, machine);
    }

    /// Current stored copy of an infrastructure machine
    pub fn infra_machine(&self, kind: &str, namespace: &str, name: &str) -> Option<InfraMachine> {
        self.infra_machines
            .lock()
            .unwrap()
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Add or replace a job (for test setup)
    pub fn add_job(&self, job: Job) {
        let k = key(job.metadata.namespace.as_deref().unwrap_or_default(), job.metadata.name.as_deref().unwrap_or_default());
        self.jobs.lock().unwrap().insert(k, job);
    }

    /// Current stored copy of a job
    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Add a pod (for test setup)
    pub fn add_pod(&self, pod: Pod) {
        let k = key(pod.metadata.namespace.as_deref().unwrap_or_default(), pod.metadata.name.as_deref().unwrap_or_default());
        self.pods.lock().unwrap().insert(k, pod);
    }

    /// Add a namespace (for test setup)
    pub fn add_namespace(&self, namespace: Namespace) {
        let name = namespace.metadata.name.clone().unwrap_or_default();
        self.namespaces.lock().unwrap().insert(name, namespace);
    }

    /// Add a logical machine (for test setup)
    pub fn add_machine(&self, machine: Machine) {
        let k = key(machine.metadata.namespace.as_deref().unwrap_or_default(), machine.metadata.name.as_deref().unwrap_or_default());
        self.machines.lock().unwrap().insert(k, machine);
    }

    /// Add a cluster (for test setup)
    pub fn add_cluster(&self, cluster: Cluster) {
        let k = key(cluster.metadata.namespace.as_deref().unwrap_or_default(), cluster.metadata.name.as_deref().unwrap_or_default());
        self.clusters.lock().unwrap().insert(k, cluster);
    }

    /// Add a secret (for test setup)
    pub fn add_secret(&self, secret: Secret) {
        let k = key(secret.metadata.namespace.as_deref().unwrap_or_default(), secret.metadata.name.as_deref().unwrap_or_default());
        self.secrets.lock().unwrap().insert(k, secret);
    }

    /// Script the etcd safe-removal answer for a node
    pub fn set_etcd_safely_removed(&self, node_name: &str, safe: bool) {
        self.etcd_answers.lock().unwrap().insert(node_name.to_string(), safe);
    }

    /// Make every status write fail with a conflict
    pub fn fail_status_updates(&self, fail: bool) {
        *self.fail_status_updates.lock().unwrap() = fail;
    }

    /// Number of persisted status writes
    pub fn status_update_count(&self) -> usize {
        *self.status_updates.lock().unwrap()
    }

    /// Recorded apply calls as (owner, desired count, mode)
    pub fn apply_calls(&self) -> Vec<(String, usize, ApplyMode)> {
        self.apply_calls.lock().unwrap().clone()
    }

    /// Number of child object creates, updates and deletes
    pub fn child_write_count(&self) -> usize {
        *self.child_writes.lock().unwrap()
    }

    /// Number of etcd safe-removal checks performed
    pub fn etcd_check_count(&self) -> usize {
        *self.etcd_checks.lock().unwrap()
    }

    /// Children currently owned by `owner`, across all types
    pub fn owned_objects(&self, owner: &Owner) -> Vec<OwnedObject> {
        let owned = self.owned.lock().unwrap();
        OwnedKind::ALL
            .iter()
            .filter_map(|kind| owned.get(&(owner.to_string(), *kind)))
            .flat_map(|objects| objects.values().cloned())
            .collect()
    }

    fn get<T: Clone>(store: &Mutex<HashMap<Key, T>>, what: &str, namespace: &str, name: &str) -> Result<T, ClientError> {
        store
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{} {}/{} not found", what, namespace, name)))
    }

    fn update_infra_machine<F>(&self, machine: &InfraMachine, mutate: F) -> Result<InfraMachine, ClientError>
    where
        F: FnOnce(&mut InfraMachine) -> Result<(), ClientError>,
    {
        let k = (machine.kind.clone(), machine.namespace().to_string(), machine.name().to_string());
        let mut store = self.infra_machines.lock().unwrap();
        let stored = store
            .get_mut(&k)
            .ok_or_else(|| ClientError::NotFound(format!("{} {}/{} not found", k.0, k.1, k.2)))?;

        if machine.metadata.resource_version.is_some() && machine.metadata.resource_version != stored.metadata.resource_version {
            return Err(ClientError::Conflict(format!(
                "{} {}/{} has been modified",
                k.0, k.1, k.2
            )));
        }

        mutate(stored)?;
        let next = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|rv| rv.parse::<u64>().ok())
            .unwrap_or_default()
            + 1;
        stored.metadata.resource_version = Some(next.to_string());
        Ok(stored.clone())
    }
}

#[async_trait::async_trait]
impl ProvisionClientTrait for MockProvisionClient {
    async fn get_infra_machine(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<InfraMachine, ClientError> {
        self.infra_machine(&gvk.kind, namespace, name)
            .ok_or_else(|| ClientError::NotFound(format!("{} {}/{} not found", gvk.kind, namespace, name)))
    }

    async fn update_infra_machine_status(&self, machine: &InfraMachine, status: Map<String, Value>) -> Result<InfraMachine, ClientError> {
        if *self.fail_status_updates.lock().unwrap() {
            return Err(ClientError::Conflict(format!("status of {} has been modified", machine.name())));
        }
        let updated = self.update_infra_machine(machine, |stored| {
            let mut merged = serde_json::to_value(&stored.status)?;
            if let Value::Object(fields) = &mut merged {
                fields.extend(status);
            }
            stored.status = serde_json::from_value(merged)?;
            Ok(())
        })?;
        *self.status_updates.lock().unwrap() += 1;
        Ok(updated)
    }

    async fn add_finalizer(&self, machine: &InfraMachine, finalizer: &str) -> Result<InfraMachine, ClientError> {
        if machine.metadata.finalizers.iter().flatten().any(|f| f == finalizer) {
            return Ok(machine.clone());
        }
        self.update_infra_machine(machine, |stored| {
            stored.metadata.finalizers.get_or_insert_with(Vec::new).push(finalizer.to_string());
            Ok(())
        })
    }

    async fn remove_finalizer(&self, machine: &InfraMachine, finalizer: &str) -> Result<(), ClientError> {
        let result = self.update_infra_machine(machine, |stored| {
            if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
            Ok(())
        });
        match result {
            Ok(_) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClientError> {
        Self::get(&self.jobs, "job", namespace, name)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClientError> {
        let requirements = selector::parse(label_selector)?;
        let empty = BTreeMap::new();
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, pod)| selector::matches(&requirements, pod.metadata.labels.as_ref().unwrap_or(&empty)))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClientError> {
        self.namespaces
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("namespace {} not found", name)))
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, ClientError> {
        Self::get(&self.machines, "machine", namespace, name)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, ClientError> {
        Self::get(&self.clusters, "cluster", namespace, name)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        Self::get(&self.secrets, "secret", namespace, name)
    }

    async fn apply_owned(&self, owner: &Owner, desired: Vec<OwnedObject>, mode: ApplyMode) -> Result<(), ClientError> {
        self.apply_calls.lock().unwrap().push((owner.to_string(), desired.len(), mode));
        apply::apply_owned(self, owner, desired, mode)
    }

    async fn cluster_credentials(&self, cluster: &Cluster) -> Result<ClusterCredentials, ClientError> {
        let namespace = cluster.metadata.namespace.clone().unwrap_or_default();
        let secret = self.get_secret(&namespace, &cluster.kubeconfig_secret_name()).await?;
        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
            .ok_or_else(|| ClientError::InvalidObject("kubeconfig secret has no value key".to_string()))?;

        Ok(ClusterCredentials {
            cluster_name: cluster.metadata.name.clone().unwrap_or_default(),
            namespace,
            kubeconfig,
        })
    }

    async fn etcd_safely_removed(&self, _credentials: &ClusterCredentials, _runtime: &str, node_name: &str) -> Result<bool, ClientError> {
        *self.etcd_checks.lock().unwrap() += 1;
        Ok(self.etcd_answers.lock().unwrap().get(node_name).copied().unwrap_or(true))
    }
}
