//! Hosting service capability.
//!
//! The deployer only talks to the service through [`HostingClient`], so the
//! version lifecycle can be driven against any implementation: the REST
//! binding in [`crate::firebase`] or an in-memory fake in tests.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::addresser::ContentHash;
use crate::catalog::Manifest;

/// Status the service reports for a version that accepts no more content
pub const FINALIZED: &str = "FINALIZED";

/// Failure talking to the hosting service
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("unexpected status {status}")]
    Status { status: u16, body: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("credentials: {0}")]
    Credentials(String),
}

/// Opaque version identifier, e.g. `sites/my-site/versions/abc123`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionName(String);

impl VersionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes the service does not hold yet and where to send them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequirement {
    /// As reported by the service; may repeat entries
    pub required_hashes: Vec<String>,
    pub upload_endpoint_base: String,
}

/// Blobs are addressed by hash under the upload base: `{base}/{hash}`
pub fn upload_endpoint(base: &str, hash: &ContentHash) -> String {
    format!("{}/{}", base.trim_end_matches('/'), hash)
}

/// Response headers applied to paths matching `glob`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderRule {
    pub glob: String,
    pub headers: BTreeMap<String, String>,
}

/// Redirect for paths matching `glob`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectRule {
    pub glob: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// Serving behavior attached to a new version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServingConfig {
    pub clean_urls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_slash_behavior: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redirects: Vec<RedirectRule>,
}

/// The five operations a deployment needs from the hosting service.
///
/// Implementations must be shareable across upload workers.
pub trait HostingClient: Sync {
    /// Stage a new version for `site` carrying `config`
    fn create_version(&self, site: &str, config: &ServingConfig)
        -> Result<VersionName, RemoteError>;

    /// Submit the full manifest and learn which hashes are missing
    fn reconcile(
        &self,
        version: &VersionName,
        manifest: &Manifest,
    ) -> Result<UploadRequirement, RemoteError>;

    /// Send one compressed blob to `endpoint`
    fn upload(&self, endpoint: &str, hash: &ContentHash, bytes: &[u8]) -> Result<(), RemoteError>;

    /// Mark the version finalized; returns the status the service reports
    fn finalize(&self, version: &VersionName) -> Result<String, RemoteError>;

    /// Publish `version` on `site`; returns the release name
    fn create_release(&self, site: &str, version: &VersionName) -> Result<String, RemoteError>;
}
