//! AWS integration interface core: error types, configuration, the capability
//! vocabulary shared by both sides of the relation, and relation snapshots.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod relation;

pub use capabilities::{s3_resource_pattern, Capability, TagScope, S3_ARN_PREFIX};
pub use config::InterfaceConfig;
pub use error::{Error, Result};
pub use relation::{EndpointSnapshot, RelationData, RelationSnapshot, RemoteUnit, UnitName};
