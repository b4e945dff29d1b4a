//! Unit tests for the provisioning object builder

#[cfg(test)]
mod tests {
    use crate::reconciler::objects::*;
    use crate::test_utils::*;
    use crds::job_name;
    use k8s_openapi::api::core::v1::Secret;
    use provision_client::{OwnedKind, OwnedObject};
    use serde_json::{json, Map, Value};

    fn spec(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test spec must be an object"),
        }
    }

    fn kinds(objects: &[OwnedObject]) -> Vec<OwnedKind> {
        objects.iter().map(OwnedObject::kind).collect()
    }

    #[test]
    fn test_to_kebab() {
        assert_eq!(to_kebab("instanceType"), "instance-type");
        assert_eq!(to_kebab("vpc_id"), "vpc-id");
        assert_eq!(to_kebab("region"), "region");
    }

    #[test]
    fn test_driver_flags_by_value_type() {
        let flags = driver_flags(
            "amazonec2",
            &spec(json!({
                "cloudCredentialSecretName": "cc",
                "emptyValue": "",
                "instanceType": "t3.large",
                "privateAddressOnly": true,
                "providerID": "aws:///i-1",
                "rootSize": 40,
                "securityGroup": ["a", "b"],
                "useEbsOptimized": false,
            })),
        );
        assert_eq!(
            flags,
            vec![
                "--amazonec2-instance-type",
                "t3.large",
                "--amazonec2-private-address-only",
                "--amazonec2-root-size",
                "40",
                "--amazonec2-security-group",
                "a",
                "--amazonec2-security-group",
                "b",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_args_with_bootstrap_and_credentials() {
        let (_reconciler, mock) = test_reconciler();
        mock.add_machine(capi_machine(Some("pool1-bootstrap"), None, None));
        mock.add_secret(secret("cc-secret"));
        let machine = infra_machine(json!({}), json!({}));
        let spec = spec(json!({"cloudCredentialSecretName": "cc-secret", "region": "eu-west-1"}));

        let objects = DefaultProvisionObjects::new(&Default::default());
        let args = objects
            .driver_args(&mock, &machine, &spec, ProvisionAction::Create)
            .await
            .unwrap();

        assert_eq!(
            args.args,
            vec![
                "create",
                "--driver",
                "amazonec2",
                "--amazonec2-region",
                "eu-west-1",
                "--custom-install-script",
                "/run/secrets/bootstrap/value",
                MACHINE,
            ]
        );
        assert_eq!(args.bootstrap_secret_name.as_deref(), Some("pool1-bootstrap"));
        assert_eq!(args.env_secret_name.as_deref(), Some("cc-secret"));
        assert!(!args.bootstrap_optional);
        assert_eq!(args.backoff_limit, 0);
        assert_eq!(args.status.job_name, Some(job_name(MACHINE)));
        assert_eq!(args.status.cloud_credential_secret_name.as_deref(), Some("cc-secret"));
    }

    #[tokio::test]
    async fn test_delete_args_tolerate_missing_bootstrap() {
        let (_reconciler, mock) = test_reconciler();
        let machine = infra_machine(json!({}), json!({}));

        let objects = DefaultProvisionObjects::new(&Default::default());
        let args = objects
            .driver_args(&mock, &machine, &spec(json!({"region": "eu-west-1"})), ProvisionAction::Delete)
            .await
            .unwrap();

        assert_eq!(args.args, vec!["rm", "--driver", "amazonec2", "-y", MACHINE]);
        assert_eq!(args.bootstrap_secret_name, None);
        assert!(args.bootstrap_optional);
        assert_eq!(args.backoff_limit, 3);
    }

    #[tokio::test]
    async fn test_missing_cloud_credential_secret_fails() {
        let (_reconciler, mock) = test_reconciler();
        let machine = infra_machine(json!({}), json!({}));

        let objects = DefaultProvisionObjects::new(&Default::default());
        let err = objects
            .driver_args(&mock, &machine, &spec(json!({"cloudCredentialSecretName": "gone"})), ProvisionAction::Create)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone"));
    }

    #[tokio::test]
    async fn test_objects_for_create_job() {
        let (_reconciler, mock) = test_reconciler();
        mock.add_machine(capi_machine(Some("pool1-bootstrap"), None, None));
        let machine = infra_machine(json!({}), json!({}));
        let builder = DefaultProvisionObjects::new(&Default::default());
        let args = builder
            .driver_args(&mock, &machine, &Map::new(), ProvisionAction::Create)
            .await
            .unwrap();

        let files = Secret {
            data: Some(Default::default()),
            ..Default::default()
        };
        let objects = builder.objects(&machine, &args, Some(files), false).unwrap();
        assert_eq!(
            kinds(&objects),
            vec![
                OwnedKind::Secret,
                OwnedKind::Secret,
                OwnedKind::ServiceAccount,
                OwnedKind::Role,
                OwnedKind::RoleBinding,
                OwnedKind::Job,
            ]
        );
        assert_eq!(objects[0].name(), state_secret_name(&machine));
        assert_eq!(objects[1].name(), files_secret_name(&machine));

        let OwnedObject::Job(job) = &objects[5] else {
            unreachable!("last object is the job")
        };
        assert_eq!(job.metadata.name, Some(job_name(MACHINE)));
        assert_eq!(job.metadata.labels, Some(job_labels(&machine)));
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name, Some(job_name(MACHINE)));
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 2);
        let container = &pod.containers[0];
        assert_eq!(container.args.as_ref(), Some(&args.args));
        assert_eq!(container.image.as_deref(), Some("rancher/machine:v0.15.0"));
        assert!(container.env_from.is_none());
    }

    #[tokio::test]
    async fn test_in_place_objects_omit_job() {
        let (_reconciler, mock) = test_reconciler();
        let machine = infra_machine(json!({"providerID": "aws:///i-1"}), json!({}));
        let builder = DefaultProvisionObjects::new(&Default::default());
        let args = builder
            .driver_args(&mock, &machine, &machine.spec, ProvisionAction::Create)
            .await
            .unwrap();

        let objects = builder.objects(&machine, &args, None, true).unwrap();
        assert_eq!(
            kinds(&objects),
            vec![OwnedKind::Secret, OwnedKind::ServiceAccount, OwnedKind::Role, OwnedKind::RoleBinding]
        );
    }
}
