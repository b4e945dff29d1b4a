//! InfraMachine
//!
//! Infrastructure machines are served under one group with one kind per
//! driver (`Amazonec2Machine`, `VmwarevsphereMachine`, ...), so there is no
//! single static kind to derive a `CustomResource` for. `InfraMachine` is a
//! typed view over the dynamic object: spec stays an opaque driver-argument
//! map, status is typed with unknown fields passed through untouched.

use crate::condition::Condition;
use crate::labels::{CAPI_CLUSTER_NAME_LABEL, ETCD_ROLE_LABEL, INFRA_MACHINE_KIND_SUFFIX};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Spec key carrying the provider assigned machine identifier
pub const PROVIDER_ID_FIELD: &str = "providerID";

/// Owner reference kind of the logical (Cluster API) machine
pub const LOGICAL_MACHINE_KIND: &str = "Machine";

/// Typed view of an infrastructure machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfraMachine {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Driver arguments, keyed by driver field name
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: Map<String, Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub status: InfraMachineStatus,
}

/// Status of an infrastructure machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfraMachineStatus {
    /// The provisioning job for the current action finished successfully
    #[serde(default)]
    pub job_complete: bool,

    /// Name of the job that last reported status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// `CreateMachineError` or `DeleteMachineError` when the job failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminated message of the failed provisioning container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Secret holding cloud credentials passed to the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_credential_secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Status fields written by other actors
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Failure reasons reported by the provisioning job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MachineFailureReason {
    CreateMachineError,
    DeleteMachineError,
}

impl MachineFailureReason {
    /// Reason for a failed job of the given action
    pub fn for_action(create: bool) -> Self {
        if create {
            Self::CreateMachineError
        } else {
            Self::DeleteMachineError
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateMachineError => "CreateMachineError",
            Self::DeleteMachineError => "DeleteMachineError",
        }
    }
}

impl fmt::Display for MachineFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status fields the controller derives and writes.
///
/// Serializes with empty fields omitted, so only the keys that carry a value
/// take part in a status patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionStatus {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub job_complete: bool,

    #[serde(skip_serializing_if = "is_blank")]
    pub job_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<MachineFailureReason>,

    #[serde(skip_serializing_if = "is_blank")]
    pub failure_message: Option<String>,

    #[serde(skip_serializing_if = "is_blank")]
    pub cloud_credential_secret_name: Option<String>,
}

impl ProvisionStatus {
    /// Summary of a job that finished successfully
    pub fn complete() -> Self {
        Self {
            job_complete: true,
            ..Default::default()
        }
    }

    /// Summary of a job whose last attempt failed
    pub fn failed(reason: MachineFailureReason, message: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason),
            failure_message: Some(message.into()),
            ..Default::default()
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(str::is_empty)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl InfraMachine {
    /// Decodes a dynamic object into the typed view
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(obj)?)
    }

    /// Encodes the typed view back into a dynamic object
    pub fn to_dynamic(&self) -> Result<DynamicObject, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// API group, the part of `apiVersion` before the slash
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or_default()
    }

    /// API version, the part of `apiVersion` after the slash
    pub fn version(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(_, version)| version)
            .unwrap_or(&self.api_version)
    }

    /// Driver identifier: the kind lower-cased with the `Machine` suffix removed
    pub fn driver_name(&self) -> String {
        self.kind
            .strip_suffix(INFRA_MACHINE_KIND_SUFFIX)
            .unwrap_or(&self.kind)
            .to_lowercase()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// True when the machine carries the etcd role
    pub fn is_etcd_member(&self) -> bool {
        self.label(ETCD_ROLE_LABEL) == Some("true")
    }

    /// Cluster named by the Cluster API cluster-name label
    pub fn cluster_name(&self) -> Option<&str> {
        self.label(CAPI_CLUSTER_NAME_LABEL).filter(|name| !name.is_empty())
    }

    /// Name of the owning logical machine, from owner references
    pub fn owner_machine_name(&self) -> Option<&str> {
        self.metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|owner| owner.kind == LOGICAL_MACHINE_KIND)
            .map(|owner| owner.name.as_str())
    }

    /// Provider identifier from spec, when set and non-empty
    pub fn provider_id(&self) -> Option<&str> {
        self.spec
            .get(PROVIDER_ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// The create job has neither completed nor failed
    pub fn create_job_pending(&self) -> bool {
        !self.status.job_complete
            && self.status.failure_reason.as_deref().unwrap_or_default().is_empty()
    }
}
