//! Provides side: the integrator reading requests and acknowledging them.
//!
//! Relation data arrives as whole-document snapshots, so reprocessing every
//! request on every evaluation would repeat side effects (re-tagging, policy
//! updates). Each request is therefore compared against the hash the provider
//! last acknowledged for that unit; only differing ones are reported.
//! Acknowledgements live in the provider's local durable store. A provider
//! that fails before [`AwsProvides::mark_completed`] sees the same request
//! again on the next evaluation.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::request::{read_json, InstanceIdentity, IntegrationRequest, RequestBody, COMPLETED_KEY};
use aws_integration_core::{
    EndpointSnapshot, Error, InterfaceConfig, RelationData, RelationSnapshot, Result, UnitName,
};
use aws_integration_store::KeyValueStore;

/// Provider-side helper bound to one endpoint and the unit's local store.
pub struct AwsProvides<'a> {
    config: &'a InterfaceConfig,
    store: &'a dyn KeyValueStore,
}

impl<'a> AwsProvides<'a> {
    pub fn new(config: &'a InterfaceConfig, store: &'a dyn KeyValueStore) -> Self {
        Self { config, store }
    }

    fn hash_key_prefix(&self) -> String {
        self.config.expand_name("request.")
    }

    fn hash_key(&self, unit: &UnitName) -> String {
        format!("{}{}", self.hash_key_prefix(), unit)
    }

    /// Every joined unit's request, in join order, regardless of change state.
    pub fn all_requests(&self, endpoint: &EndpointSnapshot) -> Result<Vec<IntegrationRequest>> {
        endpoint
            .joined_units()
            .map(|(relation_id, unit)| {
                let acknowledged = self.store.get(&self.hash_key(&unit.name))?;
                IntegrationRequest::decode(relation_id, unit.name.clone(), &unit.data, acknowledged)
            })
            .collect()
    }

    /// New or updated requests that still need to be processed.
    pub fn requests(&self, endpoint: &EndpointSnapshot) -> Result<Vec<IntegrationRequest>> {
        let changed: Vec<_> = self
            .all_requests(endpoint)?
            .into_iter()
            .filter(IntegrationRequest::changed)
            .collect();
        debug!("{} changed requests on {}", changed.len(), self.config.endpoint);
        Ok(changed)
    }

    pub fn has_pending(&self, endpoint: &EndpointSnapshot) -> Result<bool> {
        Ok(!self.requests(endpoint)?.is_empty())
    }

    /// Acknowledge `request`: remember its hash for the unit and publish it in
    /// the `completed` map of the relation it came from. Calling this again
    /// without an intervening change does nothing.
    pub fn mark_completed(
        &self,
        endpoint: &mut EndpointSnapshot,
        request: &mut IntegrationRequest,
    ) -> Result<()> {
        let relation = endpoint.relation_mut(request.relation_id()).ok_or_else(|| {
            Error::Storage(format!(
                "relation {} is no longer established",
                request.relation_id()
            ))
        })?;
        self.complete_in(&mut relation.local, request)
    }

    /// [`Self::mark_completed`] against a single relation's local data.
    pub fn complete_in(
        &self,
        local: &mut RelationData,
        request: &mut IntegrationRequest,
    ) -> Result<()> {
        let key = self.hash_key(request.unit());
        if self.store.get(&key)?.as_deref() != Some(request.content_hash()) {
            self.store.set(&key, request.content_hash())?;
        }

        if let Some(instance_id) = request.instance_id() {
            let mut completed = completed_map(local);
            if completed.get(instance_id).map(String::as_str) != Some(request.content_hash()) {
                completed.insert(instance_id.to_string(), request.content_hash().to_string());
                local.insert(COMPLETED_KEY.into(), serde_json::to_string(&completed)?);
            }
        }

        request.set_acknowledged();
        info!(
            "Completed request from {} ({})",
            request.unit(),
            request.content_hash()
        );
        Ok(())
    }

    /// Forget units that departed `relation` and drop `completed` entries
    /// that no longer belong to a joined unit. Returns the forgotten units.
    pub fn forget_departed(&self, relation: &mut RelationSnapshot) -> Result<Vec<UnitName>> {
        let departed = std::mem::take(&mut relation.departed);
        for unit in &departed {
            if self.store.unset(&self.hash_key(unit))? {
                info!("Forgot request from departed unit {}", unit);
            }
        }

        let joined: BTreeSet<String> = relation
            .remote
            .iter()
            .filter_map(|u| RequestBody::decode(&u.data).instance_id)
            .collect();
        let mut completed = completed_map(&relation.local);
        let before = completed.len();
        completed.retain(|instance_id, _| joined.contains(instance_id));
        if completed.len() != before {
            relation
                .local
                .insert(COMPLETED_KEY.into(), serde_json::to_string(&completed)?);
        }

        Ok(departed)
    }

    /// Drop acknowledgements of units not joined on any relation of
    /// `endpoint`. Catches units whose departure was never delivered, as when
    /// a whole relation is broken. Returns the swept units.
    pub fn sweep_acknowledgements(&self, endpoint: &EndpointSnapshot) -> Result<Vec<UnitName>> {
        let prefix = self.hash_key_prefix();
        let joined: BTreeSet<&str> = endpoint
            .joined_units()
            .map(|(_, unit)| unit.name.as_str())
            .collect();

        let mut swept = Vec::new();
        for key in self.store.keys_with_prefix(&prefix)? {
            let Some(unit) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if joined.contains(unit) {
                continue;
            }
            if self.store.unset(&key)? {
                info!("Swept acknowledgement of unit {}", unit);
                swept.push(UnitName::new(unit));
            }
        }
        Ok(swept)
    }

    /// Names of all applications with at least one joined unit.
    pub fn application_names(&self, endpoint: &EndpointSnapshot) -> BTreeSet<String> {
        endpoint
            .joined_units()
            .map(|(_, unit)| unit.name.application_name().to_string())
            .collect()
    }

    /// Instance identity of every joined unit that published one.
    pub fn unit_instances(
        &self,
        endpoint: &EndpointSnapshot,
    ) -> BTreeMap<UnitName, InstanceIdentity> {
        endpoint
            .joined_units()
            .filter_map(|(_, unit)| {
                RequestBody::decode(&unit.data)
                    .identity()
                    .map(|identity| (unit.name.clone(), identity))
            })
            .collect()
    }
}

fn completed_map(local: &RelationData) -> BTreeMap<String, String> {
    read_json(local, COMPLETED_KEY).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_integration_core::Capability;
    use aws_integration_store::{MemoryKv, SqliteKv};
    use tempfile::TempDir;

    fn unit_data(instance_id: &str, extra: &[(&str, &str)]) -> RelationData {
        let mut data = RelationData::new();
        data.insert("instance-id".into(), instance_id.into());
        data.insert("region".into(), "us-east-1".into());
        for (k, v) in extra {
            data.insert(k.to_string(), v.to_string());
        }
        data
    }

    fn endpoint() -> EndpointSnapshot {
        EndpointSnapshot::new(vec![
            RelationSnapshot::new(1)
                .with_remote("worker/0", unit_data("i-0", &[("enable-dns-management", "true")]))
                .with_remote("worker/1", unit_data("i-1", &[])),
            RelationSnapshot::new(2).with_remote("control/0", unit_data("i-2", &[])),
        ])
    }

    #[test]
    fn test_all_new_requests_are_changed() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);

        let requests = provides.requests(&endpoint()).unwrap();
        let units: Vec<_> = requests.iter().map(|r| r.unit().as_str()).collect();
        assert_eq!(units, vec!["worker/0", "worker/1", "control/0"]);
        assert!(requests[0].requested(Capability::DnsManagement));
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);
        let mut endpoint = endpoint();

        let mut request = provides.requests(&endpoint).unwrap().remove(0);
        provides.mark_completed(&mut endpoint, &mut request).unwrap();
        assert!(!request.changed());
        let published = endpoint.relations[0].local.clone();

        provides.mark_completed(&mut endpoint, &mut request).unwrap();
        assert_eq!(endpoint.relations[0].local, published);
        assert_eq!(store.len(), 1);

        let completed: BTreeMap<String, String> =
            serde_json::from_str(&published[COMPLETED_KEY]).unwrap();
        assert_eq!(completed["i-0"], request.content_hash());

        let remaining: Vec<_> = provides
            .requests(&endpoint)
            .unwrap()
            .into_iter()
            .map(|r| r.unit().to_string())
            .collect();
        assert_eq!(remaining, vec!["worker/1", "control/0"]);
        assert_eq!(provides.all_requests(&endpoint).unwrap().len(), 3);
    }

    #[test]
    fn test_change_after_completion_is_reported_again() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);
        let mut endpoint = endpoint();

        for mut request in provides.requests(&endpoint).unwrap() {
            provides.mark_completed(&mut endpoint, &mut request).unwrap();
        }
        assert!(!provides.has_pending(&endpoint).unwrap());

        endpoint.relations[1].upsert_remote(
            "control/0".into(),
            unit_data("i-2", &[("instance-tags", r#"{"role": "cp"}"#)]),
        );
        let changed = provides.requests(&endpoint).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].unit().as_str(), "control/0");
        assert_eq!(changed[0].instance_tags()["role"].as_deref(), Some("cp"));
    }

    #[test]
    fn test_units_without_identity_are_not_pending() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);
        let endpoint = EndpointSnapshot::new(vec![
            RelationSnapshot::new(1).with_remote("early/0", RelationData::new())
        ]);

        assert!(!provides.has_pending(&endpoint).unwrap());
        assert_eq!(provides.all_requests(&endpoint).unwrap().len(), 1);
        assert!(provides.unit_instances(&endpoint).is_empty());
    }

    #[test]
    fn test_forget_departed() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);
        let mut endpoint = endpoint();

        for mut request in provides.requests(&endpoint).unwrap() {
            provides.mark_completed(&mut endpoint, &mut request).unwrap();
        }

        let relation = &mut endpoint.relations[0];
        relation.depart(&UnitName::new("worker/1"));
        let forgotten = provides.forget_departed(relation).unwrap();
        assert_eq!(forgotten, vec![UnitName::new("worker/1")]);
        assert!(relation.departed.is_empty());

        let completed: BTreeMap<String, String> =
            serde_json::from_str(&relation.local[COMPLETED_KEY]).unwrap();
        assert!(completed.contains_key("i-0"));
        assert!(!completed.contains_key("i-1"));

        // Rejoining with identical data is a new request.
        relation.upsert_remote("worker/1".into(), unit_data("i-1", &[]));
        let changed = provides.requests(&endpoint).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].unit().as_str(), "worker/1");
    }

    #[test]
    fn test_sweep_keeps_units_still_joined() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);
        let mut endpoint = endpoint();

        for mut request in provides.requests(&endpoint).unwrap() {
            provides.mark_completed(&mut endpoint, &mut request).unwrap();
        }
        store.set("endpoint.other.request.control/0", "x").unwrap();

        endpoint.relations.retain(|r| r.relation_id != 2);
        let swept = provides.sweep_acknowledgements(&endpoint).unwrap();
        assert_eq!(swept, vec![UnitName::new("control/0")]);
        assert!(provides.requests(&endpoint).unwrap().is_empty());
        assert_eq!(
            store.get("endpoint.other.request.control/0").unwrap().as_deref(),
            Some("x")
        );

        assert!(provides.sweep_acknowledgements(&endpoint).unwrap().is_empty());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_aggregate_views() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);
        let endpoint = endpoint();

        let apps: Vec<_> = provides.application_names(&endpoint).into_iter().collect();
        assert_eq!(apps, vec!["control", "worker"]);

        let index = provides.unit_instances(&endpoint);
        assert_eq!(index.len(), 3);
        assert_eq!(index[&UnitName::new("worker/1")].instance_id, "i-1");
        assert_eq!(index[&UnitName::new("worker/1")].region, "us-east-1");
    }

    #[test]
    fn test_mark_completed_on_broken_relation_fails() {
        let config = InterfaceConfig::default();
        let store = MemoryKv::new();
        let provides = AwsProvides::new(&config, &store);
        let mut endpoint = endpoint();

        let mut request = provides.requests(&endpoint).unwrap().pop().unwrap();
        endpoint.relations.retain(|r| r.relation_id != request.relation_id());
        assert!(matches!(
            provides.mark_completed(&mut endpoint, &mut request),
            Err(Error::Storage(_))
        ));
        assert!(request.changed());
    }

    #[test]
    fn test_acknowledgements_survive_provider_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.db");
        let config = InterfaceConfig::default();
        let mut endpoint = endpoint();

        {
            let store = SqliteKv::open(&path).unwrap();
            let provides = AwsProvides::new(&config, &store);
            for mut request in provides.requests(&endpoint).unwrap() {
                provides.mark_completed(&mut endpoint, &mut request).unwrap();
            }
        }

        let store = SqliteKv::open(&path).unwrap();
        let provides = AwsProvides::new(&config, &store);
        assert!(provides.requests(&endpoint).unwrap().is_empty());
    }
}
