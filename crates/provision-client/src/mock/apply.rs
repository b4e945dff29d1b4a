//! Owned-object apply for MockProvisionClient
//!
//! Mirrors the API server applier against the in-memory per-owner-and-type
//! index. Jobs written here are also visible through `get_job`.

use super::{key, MockProvisionClient};
use crate::error::ClientError;
use crate::owned::{ApplyMode, OwnedKind, OwnedObject, Owner};
use std::collections::{BTreeSet, HashMap};

pub(super) fn apply_owned(
    client: &MockProvisionClient,
    owner: &Owner,
    desired: Vec<OwnedObject>,
    mode: ApplyMode,
) -> Result<(), ClientError> {
    let owner_key = owner.to_string();
    let mut by_kind: HashMap<OwnedKind, Vec<OwnedObject>> = HashMap::new();
    for mut object in desired {
        object.stamp(owner)?;
        by_kind.entry(object.kind()).or_default().push(object);
    }

    let mut owned = client.owned.lock().unwrap();
    let mut writes = 0;

    for kind in OwnedKind::ALL {
        let desired = by_kind.remove(&kind).unwrap_or_default();

        // Same name and namespace held by another owner
        for object in &desired {
            let holders: Vec<(String, OwnedKind)> = owned
                .iter()
                .filter(|((other, k), objects)| {
                    *k == kind
                        && other != &owner_key
                        && objects
                            .get(object.name())
                            .is_some_and(|o| o.metadata().namespace.as_deref() == Some(owner.namespace.as_str()))
                })
                .map(|(index_key, _)| index_key.clone())
                .collect();

            for holder in holders {
                if mode == ApplyMode::Normal {
                    return Err(ClientError::Conflict(format!(
                        "{} {}/{} exists and is not owned by {}",
                        kind, owner.namespace, object.name(), owner
                    )));
                }
                if let Some(objects) = owned.get_mut(&holder) {
                    objects.remove(object.name());
                }
            }
        }

        let current = owned.entry((owner_key.clone(), kind)).or_default();
        let mut wanted = BTreeSet::new();

        for object in desired {
            let name = object.name().to_string();
            wanted.insert(name.clone());

            let unchanged = current.get(&name).map(|live| live.applied_hash() == object.applied_hash());
            match unchanged {
                Some(true) => continue,
                Some(false) if kind.recreate_on_change() => {
                    current.remove(&name);
                    client.jobs.lock().unwrap().remove(&key(&owner.namespace, &name));
                }
                _ => {
                    if let OwnedObject::Job(job) = &object {
                        client.jobs.lock().unwrap().insert(key(&owner.namespace, &name), job.clone());
                    }
                    current.insert(name, object);
                }
            }
            writes += 1;
        }

        let orphans: Vec<String> = current.keys().filter(|name| !wanted.contains(*name)).cloned().collect();
        for name in orphans {
            current.remove(&name);
            if kind == OwnedKind::Job {
                client.jobs.lock().unwrap().remove(&key(&owner.namespace, &name));
            }
            writes += 1;
        }
    }

    *client.child_writes.lock().unwrap() += writes;
    Ok(())
}
