//! Unit tests for the teardown orchestrator

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::outcome::Outcome;
    use crate::reconciler::finalizer::REMOVAL_FINALIZER;
    use crate::reconciler::job_status::is_create_job;
    use crate::reconciler::teardown::REMOVAL_RECHECK;
    use crate::test_utils::*;
    use crds::{job_name, InfraMachine};
    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use provision_client::{ApplyMode, Owner};
    use serde_json::json;

    fn provisioned() -> InfraMachine {
        deleting(infra_machine(json!({"region": "eu-west-1"}), json!({"jobComplete": true})))
    }

    fn etcd_cluster(mock: &provision_client::MockProvisionClient) {
        mock.add_cluster(cluster("v1.30.4+rke2r1", false));
        mock.add_secret(kubeconfig_secret());
        mock.add_machine(capi_machine(Some("pool1-bootstrap"), Some(NODE), None));
    }

    #[tokio::test]
    async fn test_etcd_member_waits_for_safe_removal() {
        let (reconciler, mock) = test_reconciler();
        let machine = etcd_member(provisioned());
        mock.add_infra_machine(machine.clone());
        etcd_cluster(&mock);
        mock.set_etcd_safely_removed(NODE, false);

        let outcome = reconciler.on_remove(&machine).await.unwrap();

        assert_eq!(outcome, Outcome::retry_after(REMOVAL_RECHECK));
        assert_eq!(mock.etcd_check_count(), 1);
        assert!(mock.apply_calls().is_empty());
    }

    #[tokio::test]
    async fn test_etcd_member_proceeds_once_removed() {
        let (reconciler, mock) = test_reconciler();
        let machine = etcd_member(provisioned());
        mock.add_infra_machine(machine.clone());
        etcd_cluster(&mock);

        let outcome = reconciler.on_remove(&machine).await.unwrap();

        assert_eq!(outcome, Outcome::retry_on_change());
        assert_eq!(mock.etcd_check_count(), 1);
        assert_eq!(mock.apply_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_etcd_member_without_cluster_label_fails() {
        let (reconciler, mock) = test_reconciler();
        let mut machine = etcd_member(provisioned());
        machine.metadata.labels.as_mut().unwrap().remove("cluster.x-k8s.io/cluster-name");
        mock.add_infra_machine(machine.clone());

        let err = reconciler.on_remove(&machine).await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingLabel(_)));
    }

    #[tokio::test]
    async fn test_deleting_cluster_skips_etcd_check() {
        let (reconciler, mock) = test_reconciler();
        let machine = etcd_member(provisioned());
        mock.add_infra_machine(machine.clone());
        mock.add_cluster(cluster("v1.30.4+k3s1", true));
        mock.add_machine(capi_machine(None, Some(NODE), None));
        mock.set_etcd_safely_removed(NODE, false);

        reconciler.on_remove(&machine).await.unwrap();
        assert_eq!(mock.etcd_check_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_create_job_blocks_deletion() {
        let (reconciler, mock) = test_reconciler();
        let machine = deleting(infra_machine(json!({}), json!({})));
        mock.add_infra_machine(machine.clone());

        let err = reconciler.on_remove(&machine).await.unwrap_err();
        assert!(matches!(err, ControllerError::CreateJobNotFinished(_)));
        assert_eq!(
            err.to_string(),
            format!("cannot delete machine {} because create job has not finished", MACHINE)
        );
        assert!(mock.apply_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_job_allows_deletion() {
        let (reconciler, mock) = test_reconciler();
        let machine = deleting(infra_machine(json!({}), json!({"failureReason": "CreateMachineError"})));
        mock.add_infra_machine(machine.clone());

        reconciler.on_remove(&machine).await.unwrap();
        assert_eq!(mock.apply_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_drain_defers_deletion() {
        let (reconciler, mock) = test_reconciler();
        let machine = provisioned();
        mock.add_infra_machine(machine.clone());
        mock.add_machine(capi_machine(None, Some(NODE), Some(("False", "Draining"))));

        let outcome = reconciler.on_remove(&machine).await.unwrap();
        assert_eq!(outcome, Outcome::retry_after(REMOVAL_RECHECK));
        assert!(mock.apply_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_drain_does_not_block_deletion() {
        let (reconciler, mock) = test_reconciler();
        let machine = provisioned();
        mock.add_infra_machine(machine.clone());
        mock.add_machine(capi_machine(None, Some(NODE), Some(("False", "DrainingFailed"))));

        reconciler.on_remove(&machine).await.unwrap();
        assert_eq!(mock.apply_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_terminating_namespace_finalizes_immediately() {
        let (reconciler, mock) = test_reconciler();
        // Create job still pending: only the namespace shortcut can finish this
        let machine = deleting(infra_machine(json!({}), json!({})));
        mock.add_infra_machine(machine.clone());
        mock.add_namespace(namespace(true));

        let outcome = reconciler.on_remove(&machine).await.unwrap();
        assert_eq!(outcome, Outcome::Done(()));
        assert!(mock.apply_calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_job_runs_then_children_are_removed() {
        let (reconciler, mock) = test_reconciler();
        let machine = provisioned();
        mock.add_infra_machine(machine.clone());
        let owner = Owner::from_infra_machine(&machine).unwrap();
        let name = job_name(MACHINE);

        let outcome = reconciler.on_remove(&machine).await.unwrap();
        assert_eq!(outcome, Outcome::retry_on_change());
        assert_eq!(mock.apply_calls()[0].2, ApplyMode::IgnorePreviousApplied);

        let mut job = mock.job(NAMESPACE, &name).unwrap();
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(3));
        assert_eq!(
            spec.template.spec.as_ref().unwrap().containers[0].args.as_deref().unwrap()[0],
            "rm"
        );

        // Still running: nothing changes
        assert_eq!(reconciler.on_remove(&machine).await.unwrap(), Outcome::retry_on_change());
        assert!(!mock.owned_objects(&owner).is_empty());

        let finished: JobStatus = serde_json::from_value(completed()).unwrap();
        job.status = Some(finished);
        mock.add_job(job);

        assert_eq!(reconciler.on_remove(&machine).await.unwrap(), Outcome::Done(()));
        assert!(mock.owned_objects(&owner).is_empty());
        assert!(mock.job(NAMESPACE, &name).is_none());
        assert_eq!(mock.apply_calls().last().unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_missing_namespace_fails_removal() {
        let (reconciler, mock) = reconciler_without_namespace();
        let machine = provisioned();
        mock.add_infra_machine(machine.clone());

        let err = reconciler.on_remove(&machine).await.unwrap_err();
        assert!(matches!(&err, ControllerError::Client(e) if e.is_not_found()));
        assert!(mock.apply_calls().is_empty());
    }

    fn finish(mock: &provision_client::MockProvisionClient, mut job: Job) -> Job {
        job.status = Some(serde_json::from_value(completed()).unwrap());
        mock.add_job(job.clone());
        job
    }

    fn stored(mock: &provision_client::MockProvisionClient) -> InfraMachine {
        mock.infra_machine(KIND, NAMESPACE, MACHINE).unwrap()
    }

    #[tokio::test]
    async fn test_provisioned_machine_is_torn_down_after_create_job() {
        let (reconciler, mock) = test_reconciler();
        let machine = infra_machine(json!({"region": "eu-west-1"}), json!({}));
        mock.add_infra_machine(machine.clone());
        mock.add_machine(capi_machine(Some("pool1-bootstrap"), Some(NODE), None));
        let owner = Owner::from_infra_machine(&machine).unwrap();
        let name = job_name(MACHINE);

        assert_eq!(reconciler.reconcile(&machine).await.unwrap(), Outcome::Done(()));
        let create_job = mock.job(NAMESPACE, &name).unwrap();
        assert!(is_create_job(&create_job));

        let create_job = finish(&mock, create_job);
        reconciler.on_job_change(&create_job).await.unwrap();
        assert!(stored(&mock).status.job_complete);

        mock.add_infra_machine(deleting(stored(&mock)));

        // The finished create job is deleted to make way for the delete job
        let outcome = reconciler.reconcile(&stored(&mock)).await.unwrap();
        assert!(!outcome.is_done());
        assert!(mock.job(NAMESPACE, &name).is_none());
        assert_eq!(stored(&mock).metadata.finalizers, Some(vec![REMOVAL_FINALIZER.to_string()]));

        let outcome = reconciler.reconcile(&stored(&mock)).await.unwrap();
        assert!(!outcome.is_done());
        let delete_job = mock.job(NAMESPACE, &name).unwrap();
        assert!(!is_create_job(&delete_job));
        assert_eq!(delete_job.spec.as_ref().unwrap().backoff_limit, Some(3));
        assert!(!mock.owned_objects(&owner).is_empty());

        finish(&mock, delete_job);
        assert_eq!(reconciler.reconcile(&stored(&mock)).await.unwrap(), Outcome::Done(()));
        assert!(stored(&mock).metadata.finalizers.unwrap_or_default().is_empty());
        assert!(mock.owned_objects(&owner).is_empty());
    }
}
