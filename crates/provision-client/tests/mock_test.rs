//! Behaviour of the in-memory client that controller tests rely on

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use provision_client::{ApplyMode, ClientError, MockProvisionClient, OwnedObject, Owner, ProvisionClientTrait};
use std::collections::BTreeMap;

fn owner(name: &str) -> Owner {
    Owner {
        api_version: "rke-machine.cattle.io/v1".to_string(),
        kind: "Amazonec2Machine".to_string(),
        name: name.to_string(),
        namespace: "fleet-default".to_string(),
        uid: format!("uid-{}", name),
    }
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn secret(name: &str, value: &str) -> OwnedObject {
    OwnedObject::Secret(Secret {
        metadata: meta(name),
        string_data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..Default::default()
    })
}

fn job(name: &str, backoff_limit: i32) -> OwnedObject {
    let mut job = Job {
        metadata: meta(name),
        ..Default::default()
    };
    job.spec.get_or_insert_with(Default::default).backoff_limit = Some(backoff_limit);
    OwnedObject::Job(job)
}

#[tokio::test]
async fn test_apply_is_idempotent() {
    let client = MockProvisionClient::new();
    let owner = owner("m1");
    let desired = vec![
        secret("m1-machine-state", "a"),
        OwnedObject::ServiceAccount(ServiceAccount {
            metadata: meta("m1-machine-provision"),
            ..Default::default()
        }),
    ];

    client.apply_owned(&owner, desired.clone(), ApplyMode::Normal).await.unwrap();
    assert_eq!(client.child_write_count(), 2);

    client.apply_owned(&owner, desired, ApplyMode::Normal).await.unwrap();
    assert_eq!(client.child_write_count(), 2);
    assert_eq!(client.owned_objects(&owner).len(), 2);
}

#[tokio::test]
async fn test_empty_apply_deletes_every_child() {
    let client = MockProvisionClient::new();
    let owner = owner("m1");
    client
        .apply_owned(&owner, vec![secret("m1-machine-state", "a"), job("m1-machine-provision", 0)], ApplyMode::Normal)
        .await
        .unwrap();
    assert!(client.job("fleet-default", "m1-machine-provision").is_some());

    client.apply_owned(&owner, vec![], ApplyMode::IgnorePreviousApplied).await.unwrap();

    assert!(client.owned_objects(&owner).is_empty());
    assert!(client.job("fleet-default", "m1-machine-provision").is_none());
}

#[tokio::test]
async fn test_changed_job_is_deleted_then_recreated_on_next_apply() {
    let client = MockProvisionClient::new();
    let owner = owner("m1");
    client.apply_owned(&owner, vec![job("m1-machine-provision", 0)], ApplyMode::Normal).await.unwrap();

    client
        .apply_owned(&owner, vec![job("m1-machine-provision", 3)], ApplyMode::IgnorePreviousApplied)
        .await
        .unwrap();
    assert!(client.job("fleet-default", "m1-machine-provision").is_none());

    client
        .apply_owned(&owner, vec![job("m1-machine-provision", 3)], ApplyMode::IgnorePreviousApplied)
        .await
        .unwrap();
    let recreated = client.job("fleet-default", "m1-machine-provision").unwrap();
    assert_eq!(recreated.spec.and_then(|s| s.backoff_limit), Some(3));
}

#[tokio::test]
async fn test_foreign_child_conflicts_unless_ignoring_previous_apply() {
    let client = MockProvisionClient::new();
    client.apply_owned(&owner("m1"), vec![secret("shared", "a")], ApplyMode::Normal).await.unwrap();

    let err = client
        .apply_owned(&owner("m2"), vec![secret("shared", "b")], ApplyMode::Normal)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    client
        .apply_owned(&owner("m2"), vec![secret("shared", "b")], ApplyMode::IgnorePreviousApplied)
        .await
        .unwrap();
    assert!(client.owned_objects(&owner("m1")).is_empty());
    assert_eq!(client.owned_objects(&owner("m2")).len(), 1);
}

#[tokio::test]
async fn test_missing_lookups_are_not_found() {
    let client = MockProvisionClient::new();
    let err = client.get_job("fleet-default", "missing").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
    assert!(err.is_not_found());
}
