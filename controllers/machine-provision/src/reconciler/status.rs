//! Status and condition patcher.
//!
//! Both writers compare before writing: an unchanged status or condition
//! never reaches the API server, so status writes do not feed back into
//! reconcile storms.

use super::Reconciler;
use crate::error::ControllerError;
use crate::outcome::Outcome;
use crds::{find_condition, upsert_condition, Condition, InfraMachine, ProvisionStatus};
use kube::api::GroupVersionKind;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Condition reflecting the outcome of the create path
pub const CREATE_JOB_CONDITION: &str = "CreateJob";

/// String form of a status value used for change detection.
///
/// A missing or null value has no string form, so it differs from "".
fn string_form(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Desired status keys whose string form differs from the stored one
pub(crate) fn changed_status_fields(
    current: &Map<String, Value>,
    desired: &ProvisionStatus,
) -> Result<Map<String, Value>, ControllerError> {
    let Value::Object(mut fields) = serde_json::to_value(desired)? else {
        return Ok(Map::new());
    };

    if desired.job_complete {
        for key in ["failureMessage", "failureReason"] {
            fields.entry(key).or_insert_with(|| Value::String(String::new()));
        }
    }

    fields.retain(|key, value| string_form(Some(value)) != string_form(current.get(key)));
    Ok(fields)
}

/// Condition recorded for a reconcile result
pub(crate) fn condition_for<T>(condition_type: &str, result: &Result<Outcome<T>, ControllerError>) -> Condition {
    match result {
        Ok(_) => Condition::ok(condition_type),
        Err(e) => Condition::error(condition_type, e.to_string()),
    }
}

fn machine_gvk(machine: &InfraMachine) -> GroupVersionKind {
    GroupVersionKind::gvk(machine.group(), machine.version(), &machine.kind)
}

fn status_map(machine: &InfraMachine) -> Result<Map<String, Value>, ControllerError> {
    match serde_json::to_value(&machine.status)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

impl Reconciler {
    /// Re-reads the machine so a write carries the latest resource version
    async fn fresh_copy(&self, machine: &InfraMachine) -> Result<InfraMachine, ControllerError> {
        Ok(self
            .client
            .get_infra_machine(&machine_gvk(machine), machine.namespace(), machine.name())
            .await?)
    }

    /// Writes the derived status fields that differ from the stored ones.
    ///
    /// Returns the machine unchanged when nothing differs. Otherwise only the
    /// changed keys are merged onto a fresh copy; a concurrent writer makes
    /// this fail with a conflict.
    pub async fn patch_status(&self, machine: &InfraMachine, desired: &ProvisionStatus) -> Result<InfraMachine, ControllerError> {
        let changed = changed_status_fields(&status_map(machine)?, desired)?;
        if changed.is_empty() {
            debug!("Status of {} {}/{} unchanged, skipping write", machine.kind, machine.namespace(), machine.name());
            return Ok(machine.clone());
        }

        let fresh = self.fresh_copy(machine).await?;
        info!(
            "Updating status of {} {}/{}: {}",
            machine.kind,
            machine.namespace(),
            machine.name(),
            changed.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(self.client.update_infra_machine_status(&fresh, changed).await?)
    }

    /// Records `result` as condition `condition_type` and hands it back.
    ///
    /// An error becomes `False`/`Error` with the error text; any outcome
    /// becomes `True` with empty reason and message. The write is skipped
    /// when an equal condition is already stored. The original result is
    /// always returned; only when it succeeded does a failed condition write
    /// replace it.
    pub async fn set_condition<T: Send>(
        &self,
        machine: &InfraMachine,
        condition_type: &str,
        result: Result<Outcome<T>, ControllerError>,
    ) -> Result<Outcome<T>, ControllerError> {
        let desired = condition_for(condition_type, &result);
        if find_condition(&machine.status.conditions, condition_type) == Some(&desired) {
            return result;
        }

        match self.write_condition(machine, desired).await {
            Ok(()) => result,
            Err(write_err) => match result {
                Err(original) => Err(original),
                Ok(_) => Err(write_err),
            },
        }
    }

    async fn write_condition(&self, machine: &InfraMachine, desired: Condition) -> Result<(), ControllerError> {
        let fresh = self.fresh_copy(machine).await?;
        if find_condition(&fresh.status.conditions, &desired.type_) == Some(&desired) {
            return Ok(());
        }

        let mut conditions = fresh.status.conditions.clone();
        upsert_condition(&mut conditions, desired.clone());

        info!(
            "Setting condition {}={:?} on {} {}/{}",
            desired.type_,
            desired.status,
            fresh.kind,
            fresh.namespace(),
            fresh.name()
        );
        let patch = Map::from_iter([("conditions".to_string(), serde_json::to_value(&conditions)?)]);
        self.client.update_infra_machine_status(&fresh, patch).await?;
        Ok(())
    }
}
