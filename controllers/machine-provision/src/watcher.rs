//! Kubernetes resource watchers.
//!
//! One `kube_runtime::Controller` runs per discovered infrastructure machine
//! kind and one runs for provisioning jobs. The per-kind controllers also
//! watch jobs and map them back to their owning machine, so a job that was
//! deleted for recreation brings its owner back into the queue.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::outcome::Outcome;
use crate::reconciler::job_status::JobOwner;
use crate::reconciler::Reconciler;
use crds::{InfraMachine, INFRA_MACHINE_NAME_LABEL};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{ApiResource, DynamicObject};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// State shared by every reconcile call of one controller
struct Context {
    reconciler: Arc<Reconciler>,
    error_requeue: Duration,
    /// Kind served by an infrastructure machine controller
    resource: Option<ApiResource>,
}

/// Requeue behavior for a reconcile outcome
pub(crate) fn action_for(outcome: &Outcome<()>) -> Action {
    match outcome {
        Outcome::RetryWithoutFinalizing {
            requeue_after: Some(delay),
        } => Action::requeue(*delay),
        _ => Action::await_change(),
    }
}

/// Owner reference for a job, when it belongs to a machine of kind `resource`
pub(crate) fn job_owner_ref(job: &Job, resource: &ApiResource) -> Option<ObjectRef<DynamicObject>> {
    let owner = JobOwner::from_job(job)?;
    if owner.gvk.group != resource.group || owner.gvk.version != resource.version || owner.gvk.kind != resource.kind {
        return None;
    }
    let namespace = job.namespace()?;
    Some(ObjectRef::new_with(&owner.name, resource.clone()).within(&namespace))
}

fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    error!(
        "Reconciliation error for {}/{}: {}",
        obj.namespace().unwrap_or_default(),
        obj.name_any(),
        error
    );
    Action::requeue(ctx.error_requeue)
}

async fn reconcile_infra_machine(obj: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let mut machine = InfraMachine::from_dynamic(&obj)?;
    // Watch events may arrive without type metadata
    if machine.kind.is_empty()
        && let Some(resource) = &ctx.resource
    {
        machine.kind = resource.kind.clone();
        machine.api_version = resource.api_version.clone();
    }

    let outcome = ctx.reconciler.reconcile(&machine).await?;
    Ok(action_for(&outcome))
}

async fn reconcile_job(job: Arc<Job>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    ctx.reconciler.on_job_change(&job).await?;
    Ok(Action::await_change())
}

/// Watches infrastructure machines and provisioning jobs.
pub struct Watcher {
    client: Client,
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
}

impl Watcher {
    pub fn new(client: Client, reconciler: Arc<Reconciler>, config: ControllerConfig) -> Self {
        Self {
            client,
            reconciler,
            config,
        }
    }

    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .debounce(self.config.debounce)
            .concurrency(self.config.concurrency)
    }

    fn context(&self, resource: Option<ApiResource>) -> Arc<Context> {
        Arc::new(Context {
            reconciler: self.reconciler.clone(),
            error_requeue: self.config.error_requeue,
            resource,
        })
    }

    fn job_api(&self) -> Api<Job> {
        match &self.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Runs the controller for one infrastructure machine kind until its
    /// stream ends.
    pub async fn watch_infra_machines(&self, resource: ApiResource) -> Result<(), ControllerError> {
        info!("Starting {} watcher", resource.kind);

        let api: Api<DynamicObject> = match &self.config.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };
        let owner_kind = resource.clone();
        let kind = resource.kind.clone();

        Controller::new_with(api, watcher::Config::default(), resource.clone())
            .watches(
                self.job_api(),
                watcher::Config::default().labels(INFRA_MACHINE_NAME_LABEL),
                move |job: Job| job_owner_ref(&job, &owner_kind),
            )
            .with_config(self.runtime_config())
            .run(reconcile_infra_machine, error_policy, self.context(Some(resource)))
            .for_each(|res| {
                let kind = kind.clone();
                async move {
                    match res {
                        Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj.name),
                        Err(e) => error!("Controller error for {}: {}", kind, e),
                    }
                }
            })
            .await;

        Ok(())
    }

    /// Runs the controller translating provisioning job state onto machines.
    pub async fn watch_jobs(&self) -> Result<(), ControllerError> {
        info!("Starting provisioning job watcher");

        Controller::new(self.job_api(), watcher::Config::default().labels(INFRA_MACHINE_NAME_LABEL))
            .with_config(self.runtime_config())
            .run(reconcile_job, error_policy, self.context(None))
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled job {}", obj.name),
                    Err(e) => error!("Controller error for jobs: {}", e),
                }
            })
            .await;

        Ok(())
    }
}
