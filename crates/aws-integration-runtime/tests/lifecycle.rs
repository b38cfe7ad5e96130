//! End-to-end relation lifecycle: a requesting unit and the integrator
//! exchanging data through snapshots, each side with its own local store.

use aws_integration_core::{
    Capability, EndpointSnapshot, InterfaceConfig, RelationData, RelationSnapshot, UnitName,
};
use aws_integration_protocol::{AwsProvides, StaticMetadata};
use aws_integration_runtime::{Dispatcher, Flag, RelationEvent};
use aws_integration_store::{MemoryKv, SqliteKv};
use tempfile::TempDir;

const REQUIRER_UNIT: &str = "kubernetes-worker/0";
const PROVIDER_UNIT: &str = "aws-integrator/0";
const RELATION_ID: u64 = 4;

/// Requester's view: its own data plus the integrator's.
fn requirer_view(requirer: &RelationData, provider: &RelationData) -> EndpointSnapshot {
    let mut relation = RelationSnapshot::new(RELATION_ID).with_remote(PROVIDER_UNIT, provider.clone());
    relation.local = requirer.clone();
    EndpointSnapshot::new(vec![relation])
}

/// Integrator's view: its own data plus every requesting unit's.
fn provider_view(provider: &RelationData, units: &[(&str, &RelationData)]) -> EndpointSnapshot {
    let mut relation = RelationSnapshot::new(RELATION_ID);
    relation.local = provider.clone();
    for (name, data) in units {
        relation.upsert_remote(UnitName::new(*name), (*data).clone());
    }
    EndpointSnapshot::new(vec![relation])
}

#[test]
fn request_complete_and_ready() {
    let config = InterfaceConfig::default();
    let requirer_store = MemoryKv::new();
    let provider_store = MemoryKv::new();
    let metadata = StaticMetadata::new("i-abcdefghijklmnopq", "us-east-1a");

    let mut requirer_data = RelationData::new();
    let mut provider_data = RelationData::new();

    // Requester joins, publishes identity, asks for features.
    let mut requirer = Dispatcher::requirer(&config, &requirer_store, &metadata);
    let mut view = requirer_view(&requirer_data, &provider_data);
    requirer.handle(RelationEvent::Joined, &mut view).unwrap();
    {
        let mut request = requirer.request(&mut view).unwrap();
        request.tag_instance([("env", Some("prod"))]).unwrap();
        request.enable_dns_management().unwrap();
    }
    requirer_data = view.relations[0].local.clone();
    assert!(requirer.is_set(Flag::Joined));

    // Integrator sees one changed request.
    let mut provider = Dispatcher::provider(&config, &provider_store);
    let mut view = provider_view(&provider_data, &[(REQUIRER_UNIT, &requirer_data)]);
    provider.handle(RelationEvent::Changed, &mut view).unwrap();
    assert!(provider.is_set(Flag::Requested));

    let provides = AwsProvides::new(&config, &provider_store);
    let mut requests = provides.requests(&view).unwrap();
    assert_eq!(requests.len(), 1);
    let request = &mut requests[0];
    assert_eq!(request.unit().as_str(), REQUIRER_UNIT);
    assert_eq!(request.instance_id(), Some("i-abcdefghijklmnopq"));
    assert_eq!(request.region(), Some("us-east-1"));
    assert_eq!(request.instance_tags().len(), 1);
    assert_eq!(request.instance_tags()["env"].as_deref(), Some("prod"));
    assert!(request.requested(Capability::DnsManagement));
    provides.mark_completed(&mut view, request).unwrap();
    provider_data = view.relations[0].local.clone();

    // Second evaluation without requester changes: nothing pending.
    let mut view = provider_view(&provider_data, &[(REQUIRER_UNIT, &requirer_data)]);
    provider.handle(RelationEvent::Changed, &mut view).unwrap();
    assert!(!provider.is_set(Flag::Requested));
    assert!(provides.requests(&view).unwrap().is_empty());
    assert_eq!(provides.all_requests(&view).unwrap().len(), 1);

    // Requester sees its request completed.
    let mut view = requirer_view(&requirer_data, &provider_data);
    requirer.handle(RelationEvent::Changed, &mut view).unwrap();
    assert!(requirer.is_set(Flag::Ready));

    // A new request lowers readiness at once and re-enters pending.
    requirer
        .request(&mut view)
        .unwrap()
        .enable_object_storage_access(Some(&["my-bucket/*"][..]))
        .unwrap();
    assert!(!requirer.is_set(Flag::Ready));
    requirer.handle(RelationEvent::Changed, &mut view).unwrap();
    assert!(!requirer.is_set(Flag::Ready));
    requirer_data = view.relations[0].local.clone();

    let view = provider_view(&provider_data, &[(REQUIRER_UNIT, &requirer_data)]);
    let changed = provides.requests(&view).unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(
        changed[0].object_storage_access_patterns(),
        ["arn:aws:s3:::my-bucket/*".to_string()]
    );
}

#[test]
fn crash_before_acknowledgement_redelivers() {
    let dir = TempDir::new().unwrap();
    let config = InterfaceConfig {
        state_dir: dir.path().join("provider"),
        ..InterfaceConfig::default()
    };

    let mut unit = RelationData::new();
    unit.insert("instance-id".into(), "i-1".into());
    unit.insert("region".into(), "eu-west-1".into());
    unit.insert("enable-block-storage-management".into(), "true".into());
    let provider_data = RelationData::new();

    {
        let store = SqliteKv::from_config(&config).unwrap();
        let provides = AwsProvides::new(&config, &store);
        let view = provider_view(&provider_data, &[("db/0", &unit)]);
        // Processing fails before mark_completed is reached.
        assert_eq!(provides.requests(&view).unwrap().len(), 1);
    }

    let store = SqliteKv::from_config(&config).unwrap();
    let provides = AwsProvides::new(&config, &store);
    let mut view = provider_view(&provider_data, &[("db/0", &unit)]);
    let mut requests = provides.requests(&view).unwrap();
    assert_eq!(requests.len(), 1);
    provides.mark_completed(&mut view, &mut requests[0]).unwrap();
    assert!(provides.requests(&view).unwrap().is_empty());
}

#[test]
fn departed_unit_leaves_all_views() {
    let config = InterfaceConfig::default();
    let store = MemoryKv::new();
    let mut provider = Dispatcher::provider(&config, &store);

    let mut u1 = RelationData::new();
    u1.insert("instance-id".into(), "i-1".into());
    u1.insert("region".into(), "us-east-1".into());
    let mut u2 = u1.clone();
    u2.insert("instance-id".into(), "i-2".into());

    let mut view = provider_view(&RelationData::new(), &[("app/0", &u1), ("app/1", &u2)]);
    let provides = AwsProvides::new(&config, &store);
    for mut request in provides.requests(&view).unwrap() {
        provides.mark_completed(&mut view, &mut request).unwrap();
    }

    view.relations[0].depart(&UnitName::new("app/0"));
    provider.handle(RelationEvent::Departed, &mut view).unwrap();

    let all: Vec<_> = provides
        .all_requests(&view)
        .unwrap()
        .into_iter()
        .map(|r| r.unit().to_string())
        .collect();
    assert_eq!(all, vec!["app/1"]);
    let index = provides.unit_instances(&view);
    assert!(!index.contains_key(&UnitName::new("app/0")));
    assert!(index.contains_key(&UnitName::new("app/1")));
    assert_eq!(
        provides.application_names(&view).into_iter().collect::<Vec<_>>(),
        vec!["app"]
    );
}
