//! Owned-object apply against the API server
//!
//! Each registered child type is reconciled separately: desired objects are
//! created or updated by server-side apply, live objects carrying the owner's
//! labels that are not desired are deleted.

use crate::error::ClientError;
use crate::owned::{applied_hash, ApplyMode, OwnedKind, OwnedObject, Owner};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fmt::Debug;
use tracing::{debug, info};

/// Desired objects split by registered type
#[derive(Default)]
struct DesiredSet {
    secrets: Vec<Secret>,
    service_accounts: Vec<ServiceAccount>,
    roles: Vec<Role>,
    role_bindings: Vec<RoleBinding>,
    jobs: Vec<Job>,
}

pub(crate) async fn apply_owned(
    client: &Client,
    field_manager: &str,
    owner: &Owner,
    desired: Vec<OwnedObject>,
    mode: ApplyMode,
) -> Result<(), ClientError> {
    let mut set = DesiredSet::default();
    for mut object in desired {
        object.stamp(owner)?;
        match object {
            OwnedObject::Secret(o) => set.secrets.push(o),
            OwnedObject::ServiceAccount(o) => set.service_accounts.push(o),
            OwnedObject::Role(o) => set.roles.push(o),
            OwnedObject::RoleBinding(o) => set.role_bindings.push(o),
            OwnedObject::Job(o) => set.jobs.push(o),
        }
    }

    let ns = owner.namespace.as_str();
    let applier = KindApplier { field_manager, owner, mode };

    for kind in OwnedKind::ALL {
        match kind {
            OwnedKind::Secret => {
                applier.reconcile(&Api::namespaced(client.clone(), ns), kind, std::mem::take(&mut set.secrets)).await?
            }
            OwnedKind::ServiceAccount => {
                applier.reconcile(&Api::namespaced(client.clone(), ns), kind, std::mem::take(&mut set.service_accounts)).await?
            }
            OwnedKind::Role => {
                applier.reconcile(&Api::namespaced(client.clone(), ns), kind, std::mem::take(&mut set.roles)).await?
            }
            OwnedKind::RoleBinding => {
                applier.reconcile(&Api::namespaced(client.clone(), ns), kind, std::mem::take(&mut set.role_bindings)).await?
            }
            OwnedKind::Job => {
                applier.reconcile(&Api::namespaced(client.clone(), ns), kind, std::mem::take(&mut set.jobs)).await?
            }
        }
    }

    Ok(())
}

struct KindApplier<'a> {
    field_manager: &'a str,
    owner: &'a Owner,
    mode: ApplyMode,
}

impl KindApplier<'_> {
    async fn reconcile<K>(&self, api: &Api<K>, kind: OwnedKind, desired: Vec<K>) -> Result<(), ClientError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned,
    {
        let owner = self.owner;
        let mut wanted = BTreeSet::new();

        for object in desired {
            let name = object.name_any();
            wanted.insert(name.clone());

            match api.get_opt(&name).await? {
                None => {
                    info!("Creating {} {}/{} for {}", kind, owner.namespace, name, owner);
                    self.server_side_apply(api, &name, &object).await?;
                }
                Some(live) => {
                    if !owner.owns(live.meta()) {
                        if self.mode == ApplyMode::Normal {
                            return Err(ClientError::Conflict(format!(
                                "{} {}/{} exists and is not owned by {}",
                                kind, owner.namespace, name, owner
                            )));
                        }
                        info!("Adopting {} {}/{} for {}", kind, owner.namespace, name, owner);
                    } else if applied_hash(live.meta()) == applied_hash(object.meta()) {
                        debug!("{} {}/{} unchanged, skipping apply", kind, owner.namespace, name);
                        continue;
                    }

                    if kind.recreate_on_change() {
                        // The owner is re-enqueued by the deletion event and
                        // creates the replacement on that pass
                        if live.meta().deletion_timestamp.is_none() {
                            info!("Replacing changed {} {}/{} for {}", kind, owner.namespace, name, owner);
                            self.delete(api, &name).await?;
                        }
                        continue;
                    }

                    debug!("Updating {} {}/{} for {}", kind, owner.namespace, name, owner);
                    self.server_side_apply(api, &name, &object).await?;
                }
            }
        }

        let live = api.list(&ListParams::default().labels(&owner.label_selector())).await?;
        for orphan in live.items {
            let name = orphan.name_any();
            if wanted.contains(&name) || orphan.meta().deletion_timestamp.is_some() {
                continue;
            }
            info!("Deleting orphaned {} {}/{} of {}", kind, owner.namespace, name, owner);
            self.delete(api, &name).await?;
        }

        Ok(())
    }

    async fn server_side_apply<K>(&self, api: &Api<K>, name: &str, object: &K) -> Result<(), ClientError>
    where
        K: Resource + Clone + Debug + Serialize + DeserializeOwned,
    {
        let params = PatchParams::apply(self.field_manager).force();
        api.patch(name, &params, &Patch::Apply(object)).await?;
        Ok(())
    }

    async fn delete<K>(&self, api: &Api<K>, name: &str) -> Result<(), ClientError>
    where
        K: Resource + Clone + Debug + DeserializeOwned,
    {
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) => match ClientError::from(e) {
                ClientError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}
