//! Job-status translator.
//!
//! Job and pod state is not reported back by the driver; it is inferred from
//! the job's completion, its `Failed` condition and the exit codes of the
//! most recent pod.

use super::Reconciler;
use crate::error::ControllerError;
use crds::{
    InfraMachine, MachineFailureReason, ProvisionStatus, INFRA_MACHINE_GROUP_LABEL, INFRA_MACHINE_KIND_LABEL,
    INFRA_MACHINE_NAME_LABEL, INFRA_MACHINE_VERSION_LABEL,
};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::GroupVersionKind;
use kube::ResourceExt;
use tracing::{debug, info};

/// Owning infrastructure machine, read from a job's pod template labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOwner {
    pub name: String,
    pub gvk: GroupVersionKind,
}

impl JobOwner {
    /// `None` when the owning name or kind label is missing
    pub fn from_job(job: &Job) -> Option<Self> {
        let labels = job
            .spec
            .as_ref()?
            .template
            .metadata
            .as_ref()?
            .labels
            .as_ref()?;
        let label = |key: &str| labels.get(key).map(String::as_str).unwrap_or_default();

        let name = label(INFRA_MACHINE_NAME_LABEL);
        let kind = label(INFRA_MACHINE_KIND_LABEL);
        if name.is_empty() || kind.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            gvk: GroupVersionKind::gvk(label(INFRA_MACHINE_GROUP_LABEL), label(INFRA_MACHINE_VERSION_LABEL), kind),
        })
    }
}

/// A job without a backoff limit, or with a zero limit, creates; delete jobs
/// retry.
pub fn is_create_job(job: &Job) -> bool {
    job.spec
        .as_ref()
        .and_then(|spec| spec.backoff_limit)
        .is_none_or(|limit| limit == 0)
}

pub fn job_completed(job: &Job) -> bool {
    job.status
        .as_ref()
        .is_some_and(|status| status.completion_time.is_some())
}

fn job_failed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == "Failed" && c.status == "True"))
}

/// Renders a label selector in the API server's string form
pub fn selector_string(selector: &LabelSelector) -> String {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default().join(",");
        let term = match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            _ => continue,
        };
        terms.push(term);
    }

    terms.join(",")
}

/// Most recently created pod; the first one wins a tie
fn latest_pod(pods: Vec<Pod>) -> Option<Pod> {
    let mut latest: Option<Pod> = None;
    for pod in pods {
        let newer = match &latest {
            None => true,
            Some(current) => {
                pod.metadata.creation_timestamp.as_ref().map(|t| t.0)
                    > current.metadata.creation_timestamp.as_ref().map(|t| t.0)
            }
        };
        if newer {
            latest = Some(pod);
        }
    }
    latest
}

/// Failure summary of a finished pod, `None` when it did not fail.
///
/// The message is always taken from the first container status, whichever
/// container exited non-zero.
fn pod_failure(pod: &Pod, create: bool) -> Option<ProvisionStatus> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;

    let failed = statuses.iter().any(|status| {
        status
            .state
            .as_ref()
            .and_then(|state| state.terminated.as_ref())
            .is_some_and(|terminated| terminated.exit_code != 0)
    });
    if !failed {
        return None;
    }

    let message = statuses
        .first()
        .and_then(|status| status.state.as_ref())
        .and_then(|state| state.terminated.as_ref())
        .and_then(|terminated| terminated.message.as_deref())
        .unwrap_or_default()
        .trim();

    Some(ProvisionStatus::failed(MachineFailureReason::for_action(create), message))
}

impl Reconciler {
    /// Derives the machine status summary from a provisioning job.
    ///
    /// The summary always carries the job's name.
    pub async fn machine_status(&self, job: &Job, create: bool) -> Result<ProvisionStatus, ControllerError> {
        let mut status = self.job_outcome(job, create).await?;
        status.job_name = Some(job.name_any());
        Ok(status)
    }

    async fn job_outcome(&self, job: &Job, create: bool) -> Result<ProvisionStatus, ControllerError> {
        if job_completed(job) {
            return Ok(ProvisionStatus::complete());
        }
        if !job_failed(job) {
            return Ok(ProvisionStatus::default());
        }

        let selector = job
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.as_ref())
            .map(selector_string)
            .unwrap_or_default();
        let namespace = job.namespace().unwrap_or_default();
        let pods = self.client.list_pods(&namespace, &selector).await?;

        let Some(pod) = latest_pod(pods) else {
            return Ok(ProvisionStatus::default());
        };
        if pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Succeeded") {
            return Ok(ProvisionStatus::complete());
        }

        Ok(pod_failure(&pod, create).unwrap_or_default())
    }

    /// Handles a provisioning job event.
    ///
    /// Writes the derived status onto the owning infrastructure machine and
    /// returns the updated machine. Jobs without owner labels and owners that
    /// no longer exist are ignored.
    pub async fn on_job_change(&self, job: &Job) -> Result<Option<InfraMachine>, ControllerError> {
        let Some(owner) = JobOwner::from_job(job) else {
            debug!("Ignoring job {} without infrastructure machine labels", job.name_any());
            return Ok(None);
        };

        let namespace = job.namespace().unwrap_or_default();
        let machine = match self.client.get_infra_machine(&owner.gvk, &namespace, &owner.name).await {
            Ok(machine) => machine,
            Err(e) if e.is_not_found() => {
                debug!("{} {}/{} for job {} no longer exists", owner.gvk.kind, namespace, owner.name, job.name_any());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let create = is_create_job(job);
        let status = self.machine_status(job, create).await?;
        info!(
            "Job {}/{} reports {} {} complete={} failure={:?}",
            namespace,
            job.name_any(),
            owner.gvk.kind,
            owner.name,
            status.job_complete,
            status.failure_reason
        );

        let updated = self.patch_status(&machine, &status).await?;
        Ok(Some(updated))
    }
}
