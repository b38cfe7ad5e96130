//! Relation protocol between a requesting unit and the AWS integrator.
//!
//! The requester accumulates capability flags, tags and object-storage
//! patterns into its own unit data. The provider decodes every joined unit's
//! data into an [`IntegrationRequest`], reports only the ones whose content
//! hash differs from the hash it last acknowledged, and publishes a
//! `completed` map of instance id to hash that the requester compares against
//! to decide it is ready.

pub mod metadata;
pub mod provides;
pub mod request;
pub mod requires;

pub use metadata::{region_from_availability_zone, ImdsClient, MetadataSource, StaticMetadata};
pub use provides::AwsProvides;
pub use request::{CapabilityFlags, InstanceIdentity, IntegrationRequest, RequestBody, TagMap};
pub use requires::{AwsRequires, Requester};
