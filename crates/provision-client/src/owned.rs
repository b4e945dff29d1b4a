//! Owned child objects
//!
//! The registered child types an infrastructure machine owns, the owner
//! identity stamped onto them, and the applied-hash bookkeeping both
//! appliers compare against.

use crate::error::ClientError;
use crds::InfraMachine;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Label naming the owning infrastructure machine
pub const OWNER_NAME_LABEL: &str = "machine-provision.cattle.io/owner-name";
/// Label naming the owner's namespace
pub const OWNER_NAMESPACE_LABEL: &str = "machine-provision.cattle.io/owner-namespace";
/// Label naming the owner's kind
pub const OWNER_KIND_LABEL: &str = "machine-provision.cattle.io/owner-kind";
/// SHA-256 of the desired object as last applied
pub const APPLIED_HASH_ANNOTATION: &str = "machine-provision.cattle.io/applied-hash";

/// How `apply_owned` treats objects it did not create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// A live object without this owner's labels is a conflict
    #[default]
    Normal,
    /// Live objects are adopted regardless of their previous bookkeeping
    IgnorePreviousApplied,
}

/// Identity of the object that owns a set of children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl Owner {
    pub fn from_infra_machine(machine: &InfraMachine) -> Result<Self, ClientError> {
        let uid = machine
            .metadata
            .uid
            .clone()
            .ok_or_else(|| ClientError::InvalidObject(format!("{} {} has no uid", machine.kind, machine.name())))?;

        Ok(Self {
            api_version: machine.api_version.clone(),
            kind: machine.kind.clone(),
            name: machine.name().to_string(),
            namespace: machine.namespace().to_string(),
            uid,
        })
    }

    /// Controller owner reference pointing at this owner
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Labels identifying children of this owner
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (OWNER_NAME_LABEL.to_string(), self.name.clone()),
            (OWNER_NAMESPACE_LABEL.to_string(), self.namespace.clone()),
            (OWNER_KIND_LABEL.to_string(), self.kind.clone()),
        ])
    }

    /// Equality label selector matching children of this owner
    pub fn label_selector(&self) -> String {
        self.labels()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// True when `meta` carries this owner's labels
    pub fn owns(&self, meta: &ObjectMeta) -> bool {
        let Some(labels) = meta.labels.as_ref() else {
            return false;
        };
        self.labels().iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Registered child types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnedKind {
    Secret,
    ServiceAccount,
    Role,
    RoleBinding,
    Job,
}

impl OwnedKind {
    /// Apply order: dependencies before the job that mounts them
    pub const ALL: [OwnedKind; 5] = [
        OwnedKind::Secret,
        OwnedKind::ServiceAccount,
        OwnedKind::Role,
        OwnedKind::RoleBinding,
        OwnedKind::Job,
    ];

    /// Objects of this kind cannot be updated in place; a changed desired
    /// object replaces the live one.
    pub fn recreate_on_change(&self) -> bool {
        matches!(self, OwnedKind::Job)
    }
}

impl fmt::Display for OwnedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OwnedKind::Secret => "Secret",
            OwnedKind::ServiceAccount => "ServiceAccount",
            OwnedKind::Role => "Role",
            OwnedKind::RoleBinding => "RoleBinding",
            OwnedKind::Job => "Job",
        };
        f.write_str(name)
    }
}

/// A child object of one of the registered types
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedObject {
    Secret(Secret),
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
    Job(Job),
}

impl OwnedObject {
    pub fn kind(&self) -> OwnedKind {
        match self {
            OwnedObject::Secret(_) => OwnedKind::Secret,
            OwnedObject::ServiceAccount(_) => OwnedKind::ServiceAccount,
            OwnedObject::Role(_) => OwnedKind::Role,
            OwnedObject::RoleBinding(_) => OwnedKind::RoleBinding,
            OwnedObject::Job(_) => OwnedKind::Job,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            OwnedObject::Secret(o) => &o.metadata,
            OwnedObject::ServiceAccount(o) => &o.metadata,
            OwnedObject::Role(o) => &o.metadata,
            OwnedObject::RoleBinding(o) => &o.metadata,
            OwnedObject::Job(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            OwnedObject::Secret(o) => &mut o.metadata,
            OwnedObject::ServiceAccount(o) => &mut o.metadata,
            OwnedObject::Role(o) => &mut o.metadata,
            OwnedObject::RoleBinding(o) => &mut o.metadata,
            OwnedObject::Job(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Hash recorded by the last `stamp`
    pub fn applied_hash(&self) -> Option<&str> {
        applied_hash(self.metadata())
    }

    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            OwnedObject::Secret(o) => serde_json::to_vec(o),
            OwnedObject::ServiceAccount(o) => serde_json::to_vec(o),
            OwnedObject::Role(o) => serde_json::to_vec(o),
            OwnedObject::RoleBinding(o) => serde_json::to_vec(o),
            OwnedObject::Job(o) => serde_json::to_vec(o),
        }
    }

    /// Places the object in the owner's namespace, labels it with the owner
    /// identity, points an owner reference at the owner and records the
    /// applied hash.
    pub fn stamp(&mut self, owner: &Owner) -> Result<(), ClientError> {
        if self.name().is_empty() {
            return Err(ClientError::InvalidObject(format!("{} owned by {} has no name", self.kind(), owner)));
        }

        let meta = self.metadata_mut();
        meta.namespace = Some(owner.namespace.clone());
        meta.labels.get_or_insert_with(BTreeMap::new).extend(owner.labels());
        meta.owner_references = Some(vec![owner.owner_reference()]);
        if let Some(annotations) = meta.annotations.as_mut() {
            annotations.remove(APPLIED_HASH_ANNOTATION);
        }
        // An empty map hashes differently from no map
        if meta.annotations.as_ref().is_some_and(BTreeMap::is_empty) {
            meta.annotations = None;
        }

        let hash = format!("{:x}", Sha256::digest(self.to_json()?));
        self.metadata_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(APPLIED_HASH_ANNOTATION.to_string(), hash);
        Ok(())
    }
}

/// Applied hash recorded on a live or desired object
pub fn applied_hash(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(APPLIED_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Downstream cluster access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCredentials {
    pub cluster_name: String,
    pub namespace: String,
    /// Kubeconfig YAML
    pub kubeconfig: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner {
            api_version: "rke-machine.cattle.io/v1".to_string(),
            kind: "Amazonec2Machine".to_string(),
            name: "pool1-abc12".to_string(),
            namespace: "fleet-default".to_string(),
            uid: "uid-1".to_string(),
        }
    }

    fn secret(data: &str) -> OwnedObject {
        OwnedObject::Secret(Secret {
            metadata: ObjectMeta {
                name: Some("pool1-abc12-machine-state".to_string()),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([("k".to_string(), data.to_string())])),
            ..Default::default()
        })
    }

    #[test]
    fn test_stamp_sets_owner_identity() {
        let mut object = secret("a");
        object.stamp(&owner()).unwrap();

        let meta = object.metadata();
        assert_eq!(meta.namespace.as_deref(), Some("fleet-default"));
        assert!(owner().owns(meta));
        assert_eq!(meta.owner_references.as_ref().map(Vec::len), Some(1));
        assert_eq!(object.applied_hash().map(str::len), Some(64));
    }

    #[test]
    fn test_stamp_hash_is_stable_and_content_sensitive() {
        let mut first = secret("a");
        let mut again = secret("a");
        let mut changed = secret("b");
        first.stamp(&owner()).unwrap();
        again.stamp(&owner()).unwrap();
        changed.stamp(&owner()).unwrap();

        assert_eq!(first.applied_hash(), again.applied_hash());
        assert_ne!(first.applied_hash(), changed.applied_hash());

        // Re-stamping an already stamped object yields the same hash
        let before = first.applied_hash().map(str::to_string);
        first.stamp(&owner()).unwrap();
        assert_eq!(first.applied_hash().map(str::to_string), before);
    }

    #[test]
    fn test_stamp_treats_empty_annotations_as_absent() {
        let mut plain = secret("a");
        let mut empty = secret("a");
        empty.metadata_mut().annotations = Some(BTreeMap::new());
        plain.stamp(&owner()).unwrap();
        empty.stamp(&owner()).unwrap();

        assert_eq!(plain.applied_hash(), empty.applied_hash());
    }

    #[test]
    fn test_stamp_rejects_unnamed_object() {
        let mut object = OwnedObject::ServiceAccount(ServiceAccount::default());
        assert!(matches!(object.stamp(&owner()), Err(ClientError::InvalidObject(_))));
    }

    #[test]
    fn test_label_selector() {
        assert_eq!(
            owner().label_selector(),
            "machine-provision.cattle.io/owner-kind=Amazonec2Machine,\
             machine-provision.cattle.io/owner-name=pool1-abc12,\
             machine-provision.cattle.io/owner-namespace=fleet-default"
        );
    }
}
