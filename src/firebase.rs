//! Firebase Hosting REST binding (`v1beta1`) over a blocking HTTP agent.

use std::io;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::addresser::ContentHash;
use crate::auth::CredentialProvider;
use crate::catalog::Manifest;
use crate::remote::{HostingClient, RemoteError, ServingConfig, UploadRequirement, VersionName};

pub const DEFAULT_API_BASE: &str = "https://firebasehosting.googleapis.com/v1beta1";

#[derive(Debug, Deserialize)]
struct VersionResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopulateFilesResponse {
    #[serde(default)]
    upload_required_hashes: Vec<String>,
    #[serde(default)]
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    name: String,
}

/// `my-site` → `sites/my-site`; already-qualified names pass through
pub fn site_resource(site: &str) -> String {
    if site.starts_with("sites/") {
        site.to_string()
    } else {
        format!("sites/{site}")
    }
}

/// Client for one API base URL, authenticated per request by `credentials`
pub struct FirebaseHostingClient<P> {
    agent: ureq::Agent,
    api_base: String,
    credentials: P,
}

impl<P: CredentialProvider> FirebaseHostingClient<P> {
    pub fn new(api_base: &str, credentials: P, request_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(request_timeout).build();
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.api_base, resource)
    }

    fn authorize(&self, request: ureq::Request) -> Result<ureq::Request, RemoteError> {
        let token = self.credentials.bearer_token()?;
        Ok(request.set("Authorization", &format!("Bearer {token}")))
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        request: ureq::Request,
        body: serde_json::Value,
    ) -> Result<T, RemoteError> {
        let response = self
            .authorize(request)?
            .send_json(body)
            .map_err(remote_error)?;
        response
            .into_json::<T>()
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

impl<P: CredentialProvider> HostingClient for FirebaseHostingClient<P> {
    fn create_version(
        &self,
        site: &str,
        config: &ServingConfig,
    ) -> Result<VersionName, RemoteError> {
        let url = self.url(&format!("{}/versions", site_resource(site)));
        debug!(%url, "create version");
        let created: VersionResponse =
            self.send_json(self.agent.post(&url), json!({ "config": config }))?;
        if created.name.is_empty() {
            return Err(RemoteError::Decode("version without name".to_string()));
        }
        Ok(VersionName::new(created.name))
    }

    fn reconcile(
        &self,
        version: &VersionName,
        manifest: &Manifest,
    ) -> Result<UploadRequirement, RemoteError> {
        let url = self.url(&format!("{version}:populateFiles"));
        debug!(%url, files = manifest.len(), "populate files");
        let populated: PopulateFilesResponse =
            self.send_json(self.agent.post(&url), json!({ "files": manifest }))?;
        if populated.upload_url.is_empty() && !populated.upload_required_hashes.is_empty() {
            return Err(RemoteError::Decode(
                "required hashes without upload url".to_string(),
            ));
        }
        Ok(UploadRequirement {
            required_hashes: populated.upload_required_hashes,
            upload_endpoint_base: populated.upload_url,
        })
    }

    fn upload(&self, endpoint: &str, hash: &ContentHash, bytes: &[u8]) -> Result<(), RemoteError> {
        debug!(%hash, size = bytes.len(), "upload");
        let request = self
            .authorize(self.agent.post(endpoint))?
            .set("Content-Type", "application/octet-stream");
        let response = request.send_bytes(bytes).map_err(remote_error)?;

        let status = response.status();
        let mut reader = response.into_reader();
        let body_drained = io::copy(&mut reader, &mut io::sink());
        if status != 200 {
            return Err(RemoteError::Status {
                status,
                body: String::new(),
            });
        }
        body_drained.map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(())
    }

    fn finalize(&self, version: &VersionName) -> Result<String, RemoteError> {
        let url = self.url(version.as_str());
        debug!(%url, "finalize");
        let patched: StatusResponse = self.send_json(
            self.agent.request("PATCH", &url).query("update_mask", "status"),
            json!({ "status": crate::remote::FINALIZED }),
        )?;
        Ok(patched.status)
    }

    fn create_release(&self, site: &str, version: &VersionName) -> Result<String, RemoteError> {
        let url = self.url(&format!("{}/releases", site_resource(site)));
        debug!(%url, %version, "create release");
        let released: ReleaseResponse = self.send_json(
            self.agent.post(&url).query("versionName", version.as_str()),
            json!({}),
        )?;
        Ok(released.name)
    }
}

fn remote_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => RemoteError::Status {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}
