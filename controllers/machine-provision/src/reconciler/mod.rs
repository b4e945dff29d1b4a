//! Reconciliation logic for infrastructure machines.
//!
//! This module is organized by concern:
//! - `finalizer`: routes events to the create or removal path
//! - `files`: moves file-valued driver arguments into a secret
//! - `job_status`: infers machine status from provisioning jobs and pods
//! - `status`: idempotent status and condition writes
//! - `objects`: driver invocation and the child objects that run it
//! - `provision`: the create/update path
//! - `teardown`: the ordered deletion path

pub mod files;
pub mod finalizer;
pub mod job_status;
pub mod objects;
pub mod provision;
pub mod status;
pub mod teardown;

#[cfg(test)]
mod objects_test;
#[cfg(test)]
mod teardown_test;

use objects::ProvisionObjects;
use provision_client::ProvisionClientTrait;
use std::sync::Arc;

/// Reconciles infrastructure machines and their provisioning jobs.
pub struct Reconciler {
    pub(crate) client: Arc<dyn ProvisionClientTrait>,
    pub(crate) objects: Arc<dyn ProvisionObjects>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over the given collaborators.
    pub fn new(client: Arc<dyn ProvisionClientTrait>, objects: Arc<dyn ProvisionObjects>) -> Self {
        Self { client, objects }
    }
}
