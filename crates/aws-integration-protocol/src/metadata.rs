//! Instance identity discovery through the EC2 instance metadata service.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::request::InstanceIdentity;
use aws_integration_core::{Error, InterfaceConfig, Result};

/// Upper bound on bytes read from a metadata response.
const READ_BLOCK_SIZE: usize = 2048;
const TOKEN_TTL_SECONDS: &str = "21600";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Source of the local unit's instance id and availability zone.
pub trait MetadataSource {
    fn instance_id(&self) -> Result<String>;

    fn availability_zone(&self) -> Result<String>;

    fn identity(&self) -> Result<InstanceIdentity> {
        Ok(InstanceIdentity {
            instance_id: self.instance_id()?,
            region: region_from_availability_zone(&self.availability_zone()?),
        })
    }
}

/// `us-east-1a` → `us-east-1`.
pub fn region_from_availability_zone(zone: &str) -> String {
    zone.trim()
        .trim_end_matches(|c: char| c.is_ascii_lowercase())
        .to_string()
}

/// IMDSv2 client: every lookup first obtains a session token.
pub struct ImdsClient {
    base_url: String,
    client: Client,
}

impl ImdsClient {
    pub fn new(config: &InterfaceConfig) -> Result<Self> {
        Self::with_base_url(&config.metadata_url, config.metadata_timeout())
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        // The metadata service is link-local; never route it through a proxy.
        let client = Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Metadata(e.to_string()))?;
        Ok(Self {
            base_url: base_url.to_string(),
            client,
        })
    }

    fn token(&self) -> Result<String> {
        let url = format!("{}api/token", self.base_url);
        let resp = self
            .client
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Metadata(format!("token request failed: {}", e)))?;
        read_limited(resp)
    }

    fn fetch(&self, path: &str) -> Result<String> {
        let token = self.token()?;
        let url = format!("{}meta-data/{}", self.base_url, path);
        debug!("Fetching instance metadata {}", url);
        let resp = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, token)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Metadata(format!("{}: {}", url, e)))?;
        read_limited(resp)
    }
}

impl MetadataSource for ImdsClient {
    fn instance_id(&self) -> Result<String> {
        self.fetch("instance-id")
    }

    fn availability_zone(&self) -> Result<String> {
        self.fetch("placement/availability-zone")
    }
}

fn read_limited(resp: reqwest::blocking::Response) -> Result<String> {
    let mut body = Vec::with_capacity(READ_BLOCK_SIZE);
    resp.take(READ_BLOCK_SIZE as u64).read_to_end(&mut body)?;
    Ok(String::from_utf8_lossy(&body).trim().to_string())
}

/// Fixed identity, for hosts that already know where they run.
#[derive(Debug, Clone)]
pub struct StaticMetadata {
    pub instance_id: String,
    pub availability_zone: String,
}

impl StaticMetadata {
    pub fn new(instance_id: impl Into<String>, availability_zone: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            availability_zone: availability_zone.into(),
        }
    }
}

impl MetadataSource for StaticMetadata {
    fn instance_id(&self) -> Result<String> {
        Ok(self.instance_id.clone())
    }

    fn availability_zone(&self) -> Result<String> {
        Ok(self.availability_zone.clone())
    }
}
