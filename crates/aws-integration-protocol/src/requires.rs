//! Requires side: charms asking the integrator for AWS features.
//!
//! ```ignore
//! let requires = AwsRequires::new(&config, &store);
//! let relation = endpoint.primary_mut().unwrap();
//! let mut request = requires.request(&mut relation.local);
//! request.tag_instance([("env", Some("prod"))])?;
//! request.enable_dns_management()?;
//! // later, on relation-changed:
//! if requires.is_ready(relation)? { /* ... */ }
//! ```

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::metadata::MetadataSource;
use crate::request::{
    read_json, InstanceIdentity, RequestBody, COMPLETED_KEY, INSTANCE_ID_KEY, REGION_KEY,
    REQUESTED_KEY,
};
use aws_integration_core::{
    s3_resource_pattern, Capability, InterfaceConfig, RelationData, RelationSnapshot, Result,
    TagScope,
};
use aws_integration_store::KeyValueStore;

/// Requester-side helper bound to one endpoint and the unit's local store.
pub struct AwsRequires<'a> {
    config: &'a InterfaceConfig,
    store: &'a dyn KeyValueStore,
}

impl<'a> AwsRequires<'a> {
    pub fn new(config: &'a InterfaceConfig, store: &'a dyn KeyValueStore) -> Self {
        Self { config, store }
    }

    /// Start accumulating requests on top of what `local` already holds.
    pub fn request<'r>(&self, local: &'r mut RelationData) -> Requester<'r> {
        Requester::new(local)
    }

    /// Instance identity of this unit, asking `source` only when it was
    /// never resolved before.
    pub fn resolve_identity(&self, source: &dyn MetadataSource) -> Result<InstanceIdentity> {
        let id_key = self.config.expand_name(INSTANCE_ID_KEY);
        let region_key = self.config.expand_name(REGION_KEY);

        if let (Some(instance_id), Some(region)) =
            (self.store.get(&id_key)?, self.store.get(&region_key)?)
        {
            return Ok(InstanceIdentity { instance_id, region });
        }

        let identity = source.identity()?;
        self.store.set(&id_key, &identity.instance_id)?;
        self.store.set(&region_key, &identity.region)?;
        info!(
            "Resolved instance {} in {}",
            identity.instance_id, identity.region
        );
        Ok(identity)
    }

    /// Publish `identity` into the local unit data.
    pub fn publish_identity(&self, local: &mut RelationData, identity: &InstanceIdentity) {
        local.insert(INSTANCE_ID_KEY.into(), identity.instance_id.clone());
        local.insert(REGION_KEY.into(), identity.region.clone());
    }

    /// Whether the provider has completed exactly the request currently
    /// published by this unit.
    pub fn is_ready(&self, relation: &RelationSnapshot) -> Result<bool> {
        let body = RequestBody::decode(&relation.local);
        let Some(instance_id) = body.instance_id.as_deref() else {
            return Ok(false);
        };
        let Some(provider) = relation.first_remote() else {
            return Ok(false);
        };
        let completed: BTreeMap<String, String> =
            read_json(&provider.data, COMPLETED_KEY).unwrap_or_default();
        let expected = body.content_hash()?;
        let ready = completed.get(instance_id) == Some(&expected);
        debug!(
            "{} ready={} (expected {}, completed {:?})",
            self.config.endpoint,
            ready,
            expected,
            completed.get(instance_id)
        );
        Ok(ready)
    }

    /// Status message for the charm, `None` once the integration is ready.
    /// `broken` is set while handling the departure of `relation` itself.
    pub fn evaluate_relation(
        &self,
        relation: Option<&RelationSnapshot>,
        broken: bool,
    ) -> Result<Option<String>> {
        let relation = match relation {
            Some(r) if !broken => r,
            _ => return Ok(Some(format!("Missing required {}", self.config.endpoint))),
        };
        if !self.is_ready(relation)? {
            return Ok(Some(format!("Waiting for {}", self.config.endpoint)));
        }
        Ok(None)
    }
}

/// Write-through request builder over the local unit data.
///
/// Requests accumulate: every call merges into what was already published
/// and immediately re-serializes the whole request.
pub struct Requester<'r> {
    local: &'r mut RelationData,
    body: RequestBody,
}

impl<'r> Requester<'r> {
    pub fn new(local: &'r mut RelationData) -> Self {
        let body = RequestBody::decode(local);
        Self { local, body }
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Instance id and region published for this unit, if any yet.
    pub fn instance_identity(&self) -> Option<InstanceIdentity> {
        self.body.identity()
    }

    /// Hash the provider will acknowledge once it completes this request.
    pub fn expected_hash(&self) -> Result<String> {
        self.body.content_hash()
    }

    fn publish(&mut self) -> Result<()> {
        self.body.encode_into(self.local)?;
        self.local.insert(REQUESTED_KEY.into(), "true".into());
        Ok(())
    }

    /// Merge one tag into `scope`. A `None` value is a tag without a value;
    /// there is no way to request removal of a tag.
    pub fn set_tag(&mut self, scope: TagScope, name: &str, value: Option<&str>) -> Result<()> {
        self.body
            .tags_mut(scope)
            .insert(name.to_string(), value.map(str::to_string));
        self.publish()
    }

    fn merge_tags<'v, I, K>(&mut self, scope: TagScope, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Option<&'v str>)>,
        K: Into<String>,
    {
        let map = self.body.tags_mut(scope);
        for (name, value) in tags {
            map.insert(name.into(), value.map(str::to_string));
        }
        self.publish()
    }

    /// Tags for the instance itself.
    pub fn tag_instance<'v, I, K>(&mut self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Option<&'v str>)>,
        K: Into<String>,
    {
        self.merge_tags(TagScope::Instance, tags)
    }

    /// Tags for the instance's machine-specific security group.
    pub fn tag_instance_security_group<'v, I, K>(&mut self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Option<&'v str>)>,
        K: Into<String>,
    {
        self.merge_tags(TagScope::SecurityGroup, tags)
    }

    pub fn tag_instance_subnet<'v, I, K>(&mut self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Option<&'v str>)>,
        K: Into<String>,
    {
        self.merge_tags(TagScope::Subnet, tags)
    }

    /// Idempotently enable `capability`.
    pub fn enable_capability(&mut self, capability: Capability) -> Result<()> {
        if !self.body.capabilities.enable(capability) {
            debug!("{} already requested", capability);
        }
        self.publish()
    }

    pub fn enable_acm_readonly(&mut self) -> Result<()> {
        self.enable_capability(Capability::AcmReadonly)
    }

    pub fn enable_acm_fullaccess(&mut self) -> Result<()> {
        self.enable_capability(Capability::AcmFullaccess)
    }

    pub fn enable_autoscaling_readonly(&mut self) -> Result<()> {
        self.enable_capability(Capability::AutoscalingReadonly)
    }

    pub fn enable_instance_inspection(&mut self) -> Result<()> {
        self.enable_capability(Capability::InstanceInspection)
    }

    pub fn enable_instance_modification(&mut self) -> Result<()> {
        self.enable_capability(Capability::InstanceModification)
    }

    pub fn enable_network_management(&mut self) -> Result<()> {
        self.enable_capability(Capability::NetworkManagement)
    }

    pub fn enable_load_balancer_management(&mut self) -> Result<()> {
        self.enable_capability(Capability::LoadBalancerManagement)
    }

    pub fn enable_block_storage_management(&mut self) -> Result<()> {
        self.enable_capability(Capability::BlockStorageManagement)
    }

    pub fn enable_dns_management(&mut self) -> Result<()> {
        self.enable_capability(Capability::DnsManagement)
    }

    pub fn enable_region_readonly(&mut self) -> Result<()> {
        self.enable_capability(Capability::RegionReadonly)
    }

    fn replace_patterns(&mut self, capability: Capability, patterns: &[&str]) {
        if let Some(slot) = self.body.patterns_mut(capability) {
            *slot = patterns.iter().map(|p| s3_resource_pattern(p)).collect();
        }
    }

    /// Replace the object-storage access patterns. Patterns lacking the S3
    /// ARN prefix get it prepended.
    pub fn set_object_storage_access_patterns(&mut self, patterns: &[&str]) -> Result<()> {
        self.replace_patterns(Capability::ObjectStorageAccess, patterns);
        self.publish()
    }

    /// Replace the object-storage management patterns. Patterns lacking the
    /// S3 ARN prefix get it prepended.
    pub fn set_object_storage_management_patterns(&mut self, patterns: &[&str]) -> Result<()> {
        self.replace_patterns(Capability::ObjectStorageManagement, patterns);
        self.publish()
    }

    /// Enable object-storage access, restricted to `patterns` when given.
    pub fn enable_object_storage_access(&mut self, patterns: Option<&[&str]>) -> Result<()> {
        self.body.capabilities.enable(Capability::ObjectStorageAccess);
        if let Some(patterns) = patterns {
            self.replace_patterns(Capability::ObjectStorageAccess, patterns);
        }
        self.publish()
    }

    /// Enable object-storage management, restricted to `patterns` when given.
    pub fn enable_object_storage_management(&mut self, patterns: Option<&[&str]>) -> Result<()> {
        self.body.capabilities.enable(Capability::ObjectStorageManagement);
        if let Some(patterns) = patterns {
            self.replace_patterns(Capability::ObjectStorageManagement, patterns);
        }
        self.publish()
    }
}
