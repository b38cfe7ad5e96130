//! Integration request record, its relation-data codec and content hash.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use aws_integration_core::{Capability, RelationData, Result, TagScope, UnitName};

pub const INSTANCE_ID_KEY: &str = "instance-id";
pub const REGION_KEY: &str = "region";
pub const REQUESTED_KEY: &str = "requested";
pub const COMPLETED_KEY: &str = "completed";

/// Tag name → value. `None` is a tag with no value, not a removal.
pub type TagMap = BTreeMap<String, Option<String>>;

/// Where an instance lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub region: String,
}

/// Enabled capabilities. Anything not in the set is not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CapabilityFlags(BTreeSet<Capability>);

impl CapabilityFlags {
    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Returns whether the flag was newly enabled.
    pub fn enable(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything a requester asks for, decoded from its unit data.
///
/// Serializes canonically (sorted flags and tags), which is what the content
/// hash is computed over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestBody {
    pub instance_id: Option<String>,
    pub region: Option<String>,
    pub capabilities: CapabilityFlags,
    pub instance_tags: TagMap,
    pub security_group_tags: TagMap,
    pub subnet_tags: TagMap,
    pub object_storage_access_patterns: Vec<String>,
    pub object_storage_management_patterns: Vec<String>,
}

impl RequestBody {
    /// Decode a unit's data. Missing or malformed entries decode as
    /// "not requested"; keys outside the schema are ignored.
    pub fn decode(data: &RelationData) -> Self {
        let mut body = Self {
            instance_id: non_empty(data.get(INSTANCE_ID_KEY)),
            region: non_empty(data.get(REGION_KEY)),
            ..Default::default()
        };

        for (key, value) in data {
            if !Capability::is_flag_key(key) {
                continue;
            }
            match Capability::from_data_key(key) {
                Some(capability) => {
                    if parse_flag(key, value) {
                        body.capabilities.enable(capability);
                    }
                }
                None => debug!("Ignoring unrecognized capability flag {}", key),
            }
        }

        for scope in TagScope::all() {
            if let Some(tags) = read_json::<TagMap>(data, scope.data_key()) {
                *body.tags_mut(*scope) = tags;
            }
        }

        for capability in [Capability::ObjectStorageAccess, Capability::ObjectStorageManagement] {
            if let Some(key) = capability.patterns_key() {
                let patterns = read_json::<Option<Vec<String>>>(data, key)
                    .flatten()
                    .unwrap_or_default();
                if let Some(slot) = body.patterns_mut(capability) {
                    *slot = patterns;
                }
            }
        }

        body
    }

    /// Write this body over the schema keys of `data`. Keys outside the
    /// schema are left untouched; empty tag maps and pattern lists are removed.
    pub fn encode_into(&self, data: &mut RelationData) -> Result<()> {
        set_or_remove(data, INSTANCE_ID_KEY, self.instance_id.clone());
        set_or_remove(data, REGION_KEY, self.region.clone());

        for capability in Capability::all() {
            if self.capabilities.is_enabled(*capability) {
                data.insert(capability.data_key(), "true".into());
            } else {
                data.remove(&capability.data_key());
            }
        }

        for scope in TagScope::all() {
            let tags = self.tags(*scope);
            let encoded = if tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(tags)?)
            };
            set_or_remove(data, scope.data_key(), encoded);
        }

        for capability in [Capability::ObjectStorageAccess, Capability::ObjectStorageManagement] {
            if let Some(key) = capability.patterns_key() {
                let patterns = self.patterns(capability);
                let encoded = if patterns.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(patterns)?)
                };
                set_or_remove(data, key, encoded);
            }
        }

        Ok(())
    }

    /// Lowercase hex SHA-256 of the canonical serialization.
    pub fn content_hash(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn identity(&self) -> Option<InstanceIdentity> {
        Some(InstanceIdentity {
            instance_id: self.instance_id.clone()?,
            region: self.region.clone()?,
        })
    }

    pub fn tags(&self, scope: TagScope) -> &TagMap {
        match scope {
            TagScope::Instance => &self.instance_tags,
            TagScope::SecurityGroup => &self.security_group_tags,
            TagScope::Subnet => &self.subnet_tags,
        }
    }

    pub fn tags_mut(&mut self, scope: TagScope) -> &mut TagMap {
        match scope {
            TagScope::Instance => &mut self.instance_tags,
            TagScope::SecurityGroup => &mut self.security_group_tags,
            TagScope::Subnet => &mut self.subnet_tags,
        }
    }

    /// Resource patterns scoping `capability`; empty for unscoped ones.
    pub fn patterns(&self, capability: Capability) -> &[String] {
        match capability {
            Capability::ObjectStorageAccess => &self.object_storage_access_patterns,
            Capability::ObjectStorageManagement => &self.object_storage_management_patterns,
            _ => &[],
        }
    }

    pub fn patterns_mut(&mut self, capability: Capability) -> Option<&mut Vec<String>> {
        match capability {
            Capability::ObjectStorageAccess => Some(&mut self.object_storage_access_patterns),
            Capability::ObjectStorageManagement => {
                Some(&mut self.object_storage_management_patterns)
            }
            _ => None,
        }
    }
}

/// One remote unit's request as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationRequest {
    relation_id: u64,
    unit: UnitName,
    body: RequestBody,
    hash: String,
    acknowledged_hash: Option<String>,
}

impl IntegrationRequest {
    pub fn decode(
        relation_id: u64,
        unit: UnitName,
        data: &RelationData,
        acknowledged_hash: Option<String>,
    ) -> Result<Self> {
        let body = RequestBody::decode(data);
        let hash = body.content_hash()?;
        Ok(Self {
            relation_id,
            unit,
            body,
            hash,
            acknowledged_hash,
        })
    }

    /// Re-decode from freshly fetched unit data, keeping the acknowledgement.
    pub fn reload(&mut self, data: &RelationData) -> Result<()> {
        self.body = RequestBody::decode(data);
        self.hash = self.body.content_hash()?;
        Ok(())
    }

    /// Whether the content differs from what the provider last acknowledged.
    /// A request without an instance id has not been made yet.
    pub fn changed(&self) -> bool {
        self.body.instance_id.is_some() && self.acknowledged_hash.as_deref() != Some(&self.hash)
    }

    pub(crate) fn set_acknowledged(&mut self) {
        self.acknowledged_hash = Some(self.hash.clone());
    }

    pub fn relation_id(&self) -> u64 {
        self.relation_id
    }

    pub fn unit(&self) -> &UnitName {
        &self.unit
    }

    pub fn application_name(&self) -> &str {
        self.unit.application_name()
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn content_hash(&self) -> &str {
        &self.hash
    }

    pub fn acknowledged_hash(&self) -> Option<&str> {
        self.acknowledged_hash.as_deref()
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.body.instance_id.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.body.region.as_deref()
    }

    pub fn requested(&self, capability: Capability) -> bool {
        self.body.capabilities.is_enabled(capability)
    }

    pub fn instance_tags(&self) -> &TagMap {
        &self.body.instance_tags
    }

    pub fn security_group_tags(&self) -> &TagMap {
        &self.body.security_group_tags
    }

    pub fn subnet_tags(&self) -> &TagMap {
        &self.body.subnet_tags
    }

    pub fn object_storage_access_patterns(&self) -> &[String] {
        &self.body.object_storage_access_patterns
    }

    pub fn object_storage_management_patterns(&self) -> &[String] {
        &self.body.object_storage_management_patterns
    }
}

/// Parse a JSON-encoded relation data value, treating malformed input as absent.
pub(crate) fn read_json<T: DeserializeOwned>(data: &RelationData, key: &str) -> Option<T> {
    let raw = data.get(key)?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed relation data {}: {}", key, e);
            None
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Bool(enabled)) => enabled,
        Ok(serde_json::Value::String(s)) => s == "true",
        _ => {
            warn!("Ignoring malformed capability flag {}={}", key, raw);
            false
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

fn set_or_remove(data: &mut RelationData, key: &str, value: Option<String>) {
    match value {
        Some(v) => {
            data.insert(key.to_string(), v);
        }
        None => {
            data.remove(key);
        }
    }
}
