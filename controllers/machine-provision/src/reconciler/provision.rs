//! Reconciliation engine, create/update path.

use super::files::materialize_files;
use super::objects::ProvisionAction;
use super::status::CREATE_JOB_CONDITION;
use super::Reconciler;
use crate::error::ControllerError;
use crate::outcome::Outcome;
use crds::InfraMachine;
use provision_client::{ApplyMode, Owner};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Re-check delay while the bootstrap secret is not rendered yet
pub const BOOTSTRAP_RECHECK: Duration = Duration::from_secs(2);

impl Reconciler {
    /// Handles a change of an infrastructure machine that is not being
    /// deleted: runs the create path and records its outcome as the
    /// `CreateJob` condition.
    pub async fn on_change(&self, machine: &InfraMachine) -> Result<Outcome<InfraMachine>, ControllerError> {
        info!("Reconciling {} {}/{}", machine.kind, machine.namespace(), machine.name());

        let result = self.run(machine, ProvisionAction::Create).await;
        let latest = match &result {
            Ok(Outcome::Done(updated)) => updated.clone(),
            _ => machine.clone(),
        };
        self.set_condition(&latest, CREATE_JOB_CONDITION, result).await
    }

    /// Computes and applies the child objects for `action`.
    ///
    /// On create the derived status is written back and the updated machine
    /// returned. A create seeing a deletion marker does nothing.
    pub async fn run(&self, machine: &InfraMachine, action: ProvisionAction) -> Result<Outcome<InfraMachine>, ControllerError> {
        if action == ProvisionAction::Create && machine.is_deleting() {
            debug!("{} {}/{} is being deleted, skipping create", machine.kind, machine.namespace(), machine.name());
            return Ok(Outcome::Done(machine.clone()));
        }

        let driver = machine.driver_name();
        let mut spec = machine.spec.clone();
        let files = materialize_files(&driver, &mut spec);

        let args = self.objects.driver_args(self.client.as_ref(), machine, &spec, action).await?;
        if args.bootstrap_secret_name.is_none() && !args.bootstrap_optional {
            warn!(
                "Bootstrap secret for {} {}/{} not ready, checking again in {:?}",
                machine.kind,
                machine.namespace(),
                machine.name(),
                BOOTSTRAP_RECHECK
            );
            return Ok(Outcome::retry_after(BOOTSTRAP_RECHECK));
        }

        let in_place = action == ProvisionAction::Create && machine.provider_id().is_some();
        let desired = self.objects.objects(machine, &args, files, in_place)?;

        // Deletion must go ahead even when a failed create left objects behind
        let mode = match action {
            ProvisionAction::Create => ApplyMode::Normal,
            ProvisionAction::Delete => ApplyMode::IgnorePreviousApplied,
        };
        let owner = Owner::from_infra_machine(machine)?;
        debug!("Applying {} objects for {} {} (driver {})", desired.len(), action, owner, driver);
        self.client.apply_owned(&owner, desired, mode).await?;

        if action == ProvisionAction::Create {
            let updated = self.patch_status(machine, &args.status).await?;
            return Ok(Outcome::Done(updated));
        }

        Ok(Outcome::Done(machine.clone()))
    }
}
