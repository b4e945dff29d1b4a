//! Teardown orchestrator.
//!
//! Deletion of an infrastructure machine is gated, in order, on:
//! 1. etcd membership: an etcd member's node must have left etcd
//! 2. the create job: it must have completed or failed
//! 3. draining of the logical machine's node
//!
//! Only then does the delete job run. Its completion removes every owned
//! child and lets the finalizer go.

use super::job_status::{is_create_job, job_completed};
use super::objects::ProvisionAction;
use super::Reconciler;
use crate::error::ControllerError;
use crate::outcome::Outcome;
use crds::{job_name, InfraMachine, CAPI_CLUSTER_NAME_LABEL};
use k8s_openapi::api::batch::v1::Job;
use provision_client::{ApplyMode, ClientError, Owner};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Re-check delay while draining or etcd removal is in progress
pub const REMOVAL_RECHECK: Duration = Duration::from_secs(5);

/// Maps a benign not-found into `None`
fn found<T>(result: Result<T, ClientError>) -> Result<Option<T>, ControllerError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A delete job that ran to completion and is not itself going away
fn delete_job_finished(job: &Job) -> bool {
    !is_create_job(job) && job_completed(job) && job.metadata.deletion_timestamp.is_none()
}

impl Reconciler {
    /// Handles deletion of an infrastructure machine.
    ///
    /// `Done` means every child is gone and the finalizer may be removed.
    pub async fn on_remove(&self, machine: &InfraMachine) -> Result<Outcome<()>, ControllerError> {
        let namespace = machine.namespace();
        info!("Removing {} {}/{}", machine.kind, namespace, machine.name());

        // Nothing can be created in a terminating namespace
        let ns = self.client.get_namespace(namespace).await?;
        if ns.metadata.deletion_timestamp.is_some() {
            info!("Namespace {} is terminating, finalizing {} {} immediately", namespace, machine.kind, machine.name());
            return Ok(Outcome::Done(()));
        }

        if machine.is_etcd_member() {
            let gate = self.etcd_removal_gate(machine).await?;
            if !gate.is_done() {
                return Ok(gate);
            }
        }

        self.remove(machine).await
    }

    /// `Done` once the machine's node can leave etcd
    async fn etcd_removal_gate(&self, machine: &InfraMachine) -> Result<Outcome<()>, ControllerError> {
        let namespace = machine.namespace();
        let cluster_name = machine.cluster_name().ok_or_else(|| {
            ControllerError::MissingLabel(format!(
                "{} on {} {}/{}",
                CAPI_CLUSTER_NAME_LABEL, machine.kind, namespace, machine.name()
            ))
        })?;

        let Some(cluster) = found(self.client.get_cluster(namespace, cluster_name).await)? else {
            debug!("Cluster {}/{} is gone, skipping etcd removal", namespace, cluster_name);
            return Ok(Outcome::Done(()));
        };
        if cluster.is_deleting() {
            debug!("Cluster {}/{} is being deleted, skipping etcd removal", namespace, cluster_name);
            return Ok(Outcome::Done(()));
        }

        let Some(owner) = machine.owner_machine_name() else {
            return Ok(Outcome::Done(()));
        };
        let Some(capi_machine) = found(self.client.get_machine(namespace, owner).await)? else {
            return Ok(Outcome::Done(()));
        };
        let Some(node_name) = capi_machine.node_name() else {
            return Ok(Outcome::Done(()));
        };

        let credentials = self.client.cluster_credentials(&cluster).await?;
        if self
            .client
            .etcd_safely_removed(&credentials, cluster.runtime(), node_name)
            .await?
        {
            info!("Node {} of cluster {} has left etcd", node_name, cluster_name);
            return Ok(Outcome::Done(()));
        }

        warn!(
            "Node {} of cluster {} is still an etcd member, checking again in {:?}",
            node_name, cluster_name, REMOVAL_RECHECK
        );
        Ok(Outcome::retry_after(REMOVAL_RECHECK))
    }

    /// Runs the delete job once the create job and draining allow it
    async fn remove(&self, machine: &InfraMachine) -> Result<Outcome<()>, ControllerError> {
        let namespace = machine.namespace();

        if machine.create_job_pending() {
            return Err(ControllerError::CreateJobNotFinished(machine.name().to_string()));
        }

        if let Some(owner) = machine.owner_machine_name()
            && let Some(capi_machine) = found(self.client.get_machine(namespace, owner).await)?
            && capi_machine.drain_pending()
        {
            info!("Waiting for machine {}/{} to drain, checking again in {:?}", namespace, owner, REMOVAL_RECHECK);
            return Ok(Outcome::retry_after(REMOVAL_RECHECK));
        }

        let outcome = self.run(machine, ProvisionAction::Delete).await?;
        if !outcome.is_done() {
            return Ok(outcome.map(|_| ()));
        }

        let name = job_name(machine.name());
        match found(self.client.get_job(namespace, &name).await)? {
            Some(job) if delete_job_finished(&job) => {
                let owner = Owner::from_infra_machine(machine)?;
                self.client.apply_owned(&owner, Vec::new(), ApplyMode::Normal).await?;
                info!("Delete job {}/{} finished, removed children of {}", namespace, name, owner);
                Ok(Outcome::Done(()))
            }
            _ => {
                debug!("Delete job {}/{} still running", namespace, name);
                Ok(Outcome::retry_on_change())
            }
        }
    }
}
