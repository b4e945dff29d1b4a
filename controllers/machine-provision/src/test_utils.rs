//! Test utilities for unit testing reconcilers
//!
//! This module provides builders for the objects the reconcilers read and a
//! reconciler wired to the in-memory `MockProvisionClient`.

use crate::config::ControllerConfig;
use crate::reconciler::objects::DefaultProvisionObjects;
use crate::reconciler::Reconciler;
use crds::{Cluster, InfraMachine, Machine};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use provision_client::MockProvisionClient;
use serde_json::{json, Value};
use std::sync::Arc;

pub const NAMESPACE: &str = "fleet-default";
pub const KIND: &str = "Amazonec2Machine";
pub const MACHINE: &str = "pool1-abc12";
pub const CAPI_MACHINE: &str = "pool1-machine-0";
pub const CLUSTER: &str = "prod";
pub const NODE: &str = "node-a";
pub const DELETED_AT: &str = "2026-01-01T00:00:00Z";

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> T {
    serde_json::from_value(value).expect("test object must decode")
}

/// Reconciler over a fresh mock, returning both
pub fn test_reconciler() -> (Reconciler, MockProvisionClient) {
    let (reconciler, mock) = reconciler_without_namespace();
    mock.add_namespace(namespace(false));
    (reconciler, mock)
}

/// Reconciler over a mock that does not know `NAMESPACE`
pub fn reconciler_without_namespace() -> (Reconciler, MockProvisionClient) {
    let mock = MockProvisionClient::new();
    let objects = DefaultProvisionObjects::new(&ControllerConfig::default());
    (Reconciler::new(Arc::new(mock.clone()), Arc::new(objects)), mock)
}

/// Infrastructure machine owned by `CAPI_MACHINE`, with `status` merged in
pub fn infra_machine(spec: Value, status: Value) -> InfraMachine {
    decode(json!({
        "apiVersion": "rke-machine.cattle.io/v1",
        "kind": KIND,
        "metadata": {
            "name": MACHINE,
            "namespace": NAMESPACE,
            "uid": "uid-infra",
            "resourceVersion": "1",
            "labels": { "cluster.x-k8s.io/cluster-name": CLUSTER },
            "ownerReferences": [{
                "apiVersion": "cluster.x-k8s.io/v1alpha4",
                "kind": "Machine",
                "name": CAPI_MACHINE,
                "uid": "uid-capi",
            }],
        },
        "spec": spec,
        "status": status,
    }))
}

/// Marks an infrastructure machine as an etcd member
pub fn etcd_member(mut machine: InfraMachine) -> InfraMachine {
    machine
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("rke.cattle.io/etcd-role".to_string(), "true".to_string());
    machine
}

/// Marks an object as being deleted
pub fn deleting(mut machine: InfraMachine) -> InfraMachine {
    machine.metadata.deletion_timestamp = decode(json!(DELETED_AT));
    machine
}

/// Logical machine with optional bootstrap secret, node and drain condition
pub fn capi_machine(bootstrap: Option<&str>, node: Option<&str>, drain: Option<(&str, &str)>) -> Machine {
    let conditions: Vec<Value> = drain
        .map(|(status, reason)| json!({"type": "DrainingSucceeded", "status": status, "reason": reason}))
        .into_iter()
        .collect();
    decode(json!({
        "apiVersion": "cluster.x-k8s.io/v1alpha4",
        "kind": "Machine",
        "metadata": { "name": CAPI_MACHINE, "namespace": NAMESPACE },
        "spec": {
            "clusterName": CLUSTER,
            "bootstrap": { "dataSecretName": bootstrap },
            "infrastructureRef": {
                "apiVersion": "rke-machine.cattle.io/v1",
                "kind": KIND,
                "name": MACHINE,
            },
        },
        "status": {
            "nodeRef": node.map(|name| json!({ "name": name })),
            "conditions": conditions,
        },
    }))
}

pub fn cluster(kubernetes_version: &str, being_deleted: bool) -> Cluster {
    decode(json!({
        "apiVersion": "provisioning.cattle.io/v1",
        "kind": "Cluster",
        "metadata": {
            "name": CLUSTER,
            "namespace": NAMESPACE,
            "deletionTimestamp": if being_deleted { Some(DELETED_AT) } else { None },
        },
        "spec": { "kubernetesVersion": kubernetes_version },
    }))
}

pub fn kubeconfig_secret() -> Secret {
    decode(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": format!("{}-kubeconfig", CLUSTER), "namespace": NAMESPACE },
        // "apiVersion: v1" base64 encoded
        "data": { "value": "YXBpVmVyc2lvbjogdjE=" },
    }))
}

pub fn secret(name: &str) -> Secret {
    decode(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name, "namespace": NAMESPACE },
    }))
}

pub fn namespace(terminating: bool) -> Namespace {
    decode(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": NAMESPACE,
            "deletionTimestamp": if terminating { Some(DELETED_AT) } else { None },
        },
    }))
}

/// Provisioning job labeled for `MACHINE`, with the given status block
pub fn job(name: &str, backoff_limit: Option<i32>, status: Value) -> Job {
    decode(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": name, "namespace": NAMESPACE },
        "spec": {
            "backoffLimit": backoff_limit,
            "selector": { "matchLabels": { "batch.kubernetes.io/controller-uid": "uid-job" } },
            "template": {
                "metadata": {
                    "labels": {
                        "rke.cattle.io/infra-machine-name": MACHINE,
                        "rke.cattle.io/infra-machine-group": "rke-machine.cattle.io",
                        "rke.cattle.io/infra-machine-version": "v1",
                        "rke.cattle.io/infra-machine-kind": KIND,
                    },
                },
                "spec": { "containers": [{ "name": "machine" }], "restartPolicy": "Never" },
            },
        },
        "status": status,
    }))
}

pub fn completed() -> Value {
    json!({ "completionTime": "2026-01-01T00:05:00Z", "succeeded": 1 })
}

pub fn failed() -> Value {
    json!({ "failed": 1, "conditions": [{ "type": "Failed", "status": "True", "reason": "BackoffLimitExceeded" }] })
}

/// Pod of the test job; containers given as (exit code, message)
pub fn pod(name: &str, created: &str, phase: &str, containers: &[(i32, &str)]) -> Pod {
    let statuses: Vec<Value> = containers
        .iter()
        .enumerate()
        .map(|(i, (exit_code, message))| {
            json!({
                "name": format!("c{}", i),
                "image": "rancher/machine",
                "imageID": "",
                "ready": false,
                "restartCount": 0,
                "state": { "terminated": { "exitCode": exit_code, "message": message } },
            })
        })
        .collect();
    decode(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": NAMESPACE,
            "creationTimestamp": created,
            "labels": { "batch.kubernetes.io/controller-uid": "uid-job" },
        },
        "spec": { "containers": [{ "name": "machine" }] },
        "status": { "phase": phase, "containerStatuses": statuses },
    }))
}
