//! Capability vocabulary and tag scopes shared by requester and provider.
//!
//! The wire names here are the contract between both sides of the relation
//! and must match exactly. Flags the reader does not recognize are ignored.

use serde::{Deserialize, Serialize};

/// Prefix every object-storage resource pattern must carry.
pub const S3_ARN_PREFIX: &str = "arn:aws:s3:::";

/// Relation data key prefix for capability flags.
const FLAG_KEY_PREFIX: &str = "enable-";

/// A discrete integration a requester can ask the provider to enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Read-only access to the certificate catalog (ACM).
    AcmReadonly,
    /// Full access to the certificate catalog (ACM).
    AcmFullaccess,
    AutoscalingReadonly,
    InstanceInspection,
    InstanceModification,
    /// Firewalls, subnets, routes.
    NetworkManagement,
    LoadBalancerManagement,
    BlockStorageManagement,
    DnsManagement,
    RegionReadonly,
    /// Object storage access, optionally restricted by resource patterns.
    ObjectStorageAccess,
    /// Object storage management, optionally restricted by resource patterns.
    ObjectStorageManagement,
}

impl Capability {
    pub fn all() -> &'static [Capability] {
        &[
            Self::AcmReadonly,
            Self::AcmFullaccess,
            Self::AutoscalingReadonly,
            Self::InstanceInspection,
            Self::InstanceModification,
            Self::NetworkManagement,
            Self::LoadBalancerManagement,
            Self::BlockStorageManagement,
            Self::DnsManagement,
            Self::RegionReadonly,
            Self::ObjectStorageAccess,
            Self::ObjectStorageManagement,
        ]
    }

    /// Wire name, e.g. `dns-management`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AcmReadonly => "acm-readonly",
            Self::AcmFullaccess => "acm-fullaccess",
            Self::AutoscalingReadonly => "autoscaling-readonly",
            Self::InstanceInspection => "instance-inspection",
            Self::InstanceModification => "instance-modification",
            Self::NetworkManagement => "network-management",
            Self::LoadBalancerManagement => "load-balancer-management",
            Self::BlockStorageManagement => "block-storage-management",
            Self::DnsManagement => "dns-management",
            Self::RegionReadonly => "region-readonly",
            Self::ObjectStorageAccess => "object-storage-access",
            Self::ObjectStorageManagement => "object-storage-management",
        }
    }

    /// Relation data key carrying this flag, e.g. `enable-dns-management`.
    pub fn data_key(&self) -> String {
        format!("{}{}", FLAG_KEY_PREFIX, self.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.name() == name)
    }

    /// Parse a relation data key. Returns `None` for keys that are not flags
    /// or name a capability outside the vocabulary.
    pub fn from_data_key(key: &str) -> Option<Self> {
        key.strip_prefix(FLAG_KEY_PREFIX).and_then(Self::from_name)
    }

    /// Relation data key of the pattern list scoping this capability, if any.
    pub fn patterns_key(&self) -> Option<&'static str> {
        match self {
            Self::ObjectStorageAccess => Some("object-storage-access-patterns"),
            Self::ObjectStorageManagement => Some("object-storage-management-patterns"),
            _ => None,
        }
    }

    /// Whether `key` looks like a capability flag at all.
    pub fn is_flag_key(key: &str) -> bool {
        key.starts_with(FLAG_KEY_PREFIX)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resource class a tag map applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagScope {
    Instance,
    /// The machine-specific security group created for the instance.
    SecurityGroup,
    Subnet,
}

impl TagScope {
    pub fn all() -> &'static [TagScope] {
        &[Self::Instance, Self::SecurityGroup, Self::Subnet]
    }

    pub fn data_key(&self) -> &'static str {
        match self {
            Self::Instance => "instance-tags",
            Self::SecurityGroup => "instance-security-group-tags",
            Self::Subnet => "instance-subnet-tags",
        }
    }
}

/// Prefix `pattern` with the S3 ARN prefix unless it already carries it.
pub fn s3_resource_pattern(pattern: &str) -> String {
    if pattern.starts_with(S3_ARN_PREFIX) {
        pattern.to_string()
    } else {
        format!("{}{}", S3_ARN_PREFIX, pattern)
    }
}
