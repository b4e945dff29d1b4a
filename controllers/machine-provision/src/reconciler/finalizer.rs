//! Entry point for infrastructure machine events.
//!
//! Finalizer handling is done here rather than through
//! `kube_runtime::finalizer`: removal has to be able to end a pass without
//! either finishing or failing, and the finalizer must stay in place then.

use super::Reconciler;
use crate::error::ControllerError;
use crate::outcome::Outcome;
use crds::InfraMachine;
use tracing::{debug, info};

/// Finalizer guarding removal of an infrastructure machine
pub const REMOVAL_FINALIZER: &str = "machine-provision.cattle.io/remove";

fn has_finalizer(machine: &InfraMachine) -> bool {
    machine
        .metadata
        .finalizers
        .iter()
        .flatten()
        .any(|f| f == REMOVAL_FINALIZER)
}

impl Reconciler {
    /// Routes an infrastructure machine to the create or the removal path.
    ///
    /// The finalizer is added before anything is created for the machine and
    /// removed only once removal reports `Done`.
    pub async fn reconcile(&self, machine: &InfraMachine) -> Result<Outcome<()>, ControllerError> {
        if machine.is_deleting() {
            if !has_finalizer(machine) {
                debug!("{} {}/{} has no removal finalizer", machine.kind, machine.namespace(), machine.name());
                return Ok(Outcome::Done(()));
            }

            let outcome = self.on_remove(machine).await?;
            if outcome.is_done() {
                self.client.remove_finalizer(machine, REMOVAL_FINALIZER).await?;
                info!("Removed {} {}/{}", machine.kind, machine.namespace(), machine.name());
            }
            return Ok(outcome);
        }

        let machine = if has_finalizer(machine) {
            machine.clone()
        } else {
            self.client.add_finalizer(machine, REMOVAL_FINALIZER).await?
        };

        Ok(self.on_change(&machine).await?.map(|_| ()))
    }
}
