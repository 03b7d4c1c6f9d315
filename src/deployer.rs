//! Version lifecycle orchestration.
//!
//! Drives one deployment through stage → reconcile → upload → finalize →
//! release against a [`HostingClient`]:
//! - Checked lifecycle transitions (CREATED → POPULATED → FINALIZED)
//! - Parallel uploads on the rayon pool with first-error cancellation
//! - Progress tracking with cache-aligned atomic counters

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::addresser::ContentHash;
use crate::cancel::Cancellation;
use crate::catalog::{Catalog, ContentStore};
use crate::error::DeployError;
use crate::remote::{
    upload_endpoint, HostingClient, ServingConfig, UploadRequirement, VersionName, FINALIZED,
};

/// Lifecycle state of a staged version, as driven by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VersionState {
    Created,
    Populated,
    Finalized,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionState::Created => "CREATED",
            VersionState::Populated => "POPULATED",
            VersionState::Finalized => "FINALIZED",
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            VersionState::Created => Some(VersionState::Populated),
            VersionState::Populated => Some(VersionState::Finalized),
            VersionState::Finalized => None,
        }
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A version staged during this run, with its lifecycle as seen locally
#[derive(Debug, Clone)]
pub struct StagedVersion {
    pub name: VersionName,
    state: VersionState,
}

impl StagedVersion {
    pub fn created(name: VersionName) -> Self {
        Self {
            name,
            state: VersionState::Created,
        }
    }

    pub fn state(&self) -> VersionState {
        self.state
    }

    /// Err unless `to` is exactly one step after the current state
    pub fn check_transition(&self, to: VersionState) -> Result<(), DeployError> {
        if self.state.next() == Some(to) {
            Ok(())
        } else {
            Err(self.illegal(to.as_str()))
        }
    }

    /// Move exactly one step forward
    pub fn advance(&mut self, to: VersionState) -> Result<(), DeployError> {
        self.check_transition(to)?;
        debug!(version = %self.name, from = %self.state, to = %to, "version transition");
        self.state = to;
        Ok(())
    }

    fn illegal(&self, to: &'static str) -> DeployError {
        DeployError::Lifecycle {
            version: self.name.to_string(),
            from: self.state.as_str(),
            to,
        }
    }
}

/// Cache-line aligned atomic counter to prevent false sharing
/// Each counter is on its own 64-byte cache line
#[repr(align(64))]
pub struct CacheAlignedAtomic(pub AtomicU64);

impl CacheAlignedAtomic {
    pub const fn new(val: u64) -> Self {
        Self(AtomicU64::new(val))
    }
}

/// Upload counters updated from the worker threads
pub struct DeployStats {
    pub files_uploaded: CacheAlignedAtomic,
    pub bytes_uploaded: CacheAlignedAtomic,
}

impl DeployStats {
    pub fn new() -> Self {
        Self {
            files_uploaded: CacheAlignedAtomic::new(0),
            bytes_uploaded: CacheAlignedAtomic::new(0),
        }
    }
}

impl Default for DeployStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct blobs to send and the base they are sent under
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPlan {
    pub hashes: Vec<ContentHash>,
    pub endpoint_base: String,
}

impl UploadPlan {
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Outcome of a successful deployment
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub version: VersionName,
    pub release: String,
    /// Paths in the submitted manifest
    pub file_count: usize,
    /// Distinct hashes sent to the service
    pub uploaded: u64,
    pub uploaded_bytes: u64,
    pub duration: Duration,
}

/// Deduplicate the service's requirement and check every hash against the store
pub fn plan_uploads(
    version: &VersionName,
    requirement: UploadRequirement,
    store: &ContentStore,
) -> Result<UploadPlan, DeployError> {
    let unique: BTreeSet<&str> = requirement
        .required_hashes
        .iter()
        .map(String::as_str)
        .collect();

    let hashes = unique
        .into_iter()
        .map(|raw| {
            ContentHash::parse(raw)
                .filter(|hash| store.contains(hash))
                .ok_or_else(|| DeployError::UnknownRequiredHash {
                    version: version.to_string(),
                    hash: raw.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UploadPlan {
        hashes,
        endpoint_base: requirement.upload_endpoint_base,
    })
}

/// Runs the version lifecycle against one hosting client
pub struct Deployer<'a, C: HostingClient> {
    client: &'a C,
    cancel: Cancellation,
    stats: DeployStats,
    progress: Option<ProgressBar>,
}

impl<'a, C: HostingClient> Deployer<'a, C> {
    pub fn new(client: &'a C, cancel: Cancellation) -> Self {
        Self {
            client,
            cancel,
            stats: DeployStats::new(),
            progress: None,
        }
    }

    /// Report upload progress on `bar`
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn stats(&self) -> &DeployStats {
        &self.stats
    }

    /// Deploy `catalog` to `site` and publish it as a new release
    pub fn deploy(
        &self,
        site: &str,
        serving: &ServingConfig,
        catalog: &Catalog,
    ) -> Result<DeployReport, DeployError> {
        let start = Instant::now();

        let mut version = self.create_version(site, serving)?;
        let plan = self.reconcile(&mut version, catalog)?;
        self.upload_all(&version, &plan, &catalog.store)?;
        self.finalize(&mut version)?;
        let release = self.release(site, &version)?;

        Ok(DeployReport {
            version: version.name,
            release,
            file_count: catalog.manifest.len(),
            uploaded: self.stats.files_uploaded.0.load(Ordering::Relaxed),
            uploaded_bytes: self.stats.bytes_uploaded.0.load(Ordering::Relaxed),
            duration: start.elapsed(),
        })
    }

    /// Stage a new version (CREATED)
    pub fn create_version(
        &self,
        site: &str,
        serving: &ServingConfig,
    ) -> Result<StagedVersion, DeployError> {
        self.cancel.check()?;
        let name = self
            .client
            .create_version(site, serving)
            .map_err(|source| DeployError::VersionCreate {
                site: site.to_string(),
                source,
            })?;
        info!(version = %name, "version created");
        Ok(StagedVersion::created(name))
    }

    /// Submit the manifest and plan the uploads it requires (→ POPULATED)
    pub fn reconcile(
        &self,
        version: &mut StagedVersion,
        catalog: &Catalog,
    ) -> Result<UploadPlan, DeployError> {
        version.check_transition(VersionState::Populated)?;
        self.cancel.check()?;

        let requirement = self
            .client
            .reconcile(&version.name, &catalog.manifest)
            .map_err(|source| DeployError::Reconcile {
                version: version.name.to_string(),
                source,
            })?;
        let plan = plan_uploads(&version.name, requirement, &catalog.store)?;

        version.advance(VersionState::Populated)?;
        info!(
            version = %version.name,
            files = catalog.manifest.len(),
            required = plan.hashes.len(),
            "manifest reconciled"
        );
        Ok(plan)
    }

    /// Send every planned blob exactly once.
    ///
    /// The first failure stops new uploads; uploads already running finish
    /// before the error is returned.
    pub fn upload_all(
        &self,
        version: &StagedVersion,
        plan: &UploadPlan,
        store: &ContentStore,
    ) -> Result<(), DeployError> {
        if version.state() != VersionState::Populated {
            return Err(version.illegal("UPLOAD"));
        }
        if plan.is_empty() {
            info!(version = %version.name, "nothing to upload");
            return Ok(());
        }

        if let Some(ref pb) = self.progress {
            pb.set_length(plan.hashes.len() as u64);
        }

        let result = plan
            .hashes
            .par_iter()
            .try_for_each(|hash| -> Result<(), DeployError> {
                self.cancel.check()?;

                let bytes = store
                    .get(hash)
                    .ok_or_else(|| DeployError::UnknownRequiredHash {
                        version: version.name.to_string(),
                        hash: hash.to_string(),
                    })?;
                let endpoint = upload_endpoint(&plan.endpoint_base, hash);

                self.client
                    .upload(&endpoint, hash, bytes)
                    .map_err(|source| DeployError::Upload {
                        hash: hash.to_string(),
                        source,
                    })?;

                self.stats.files_uploaded.0.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_uploaded
                    .0
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                if let Some(ref pb) = self.progress {
                    pb.inc(1);
                }
                debug!(%hash, size = bytes.len(), "uploaded");
                Ok(())
            });

        // Cleared either way so a failure message is not printed under a stale bar
        if let Some(ref pb) = self.progress {
            pb.finish_and_clear();
        }
        result?;

        info!(
            version = %version.name,
            uploaded = plan.hashes.len(),
            "uploads complete"
        );
        Ok(())
    }

    /// Mark the version finalized (→ FINALIZED).
    /// Only the exact finalized status counts
    pub fn finalize(&self, version: &mut StagedVersion) -> Result<(), DeployError> {
        version.check_transition(VersionState::Finalized)?;
        self.cancel.check()?;

        let status =
            self.client
                .finalize(&version.name)
                .map_err(|source| DeployError::FinalizeRequest {
                    version: version.name.to_string(),
                    source,
                })?;
        if status != FINALIZED {
            return Err(DeployError::Finalization {
                version: version.name.to_string(),
                status,
            });
        }

        version.advance(VersionState::Finalized)?;
        info!(version = %version.name, "version finalized");
        Ok(())
    }

    /// Publish a version finalized in this run
    pub fn release(&self, site: &str, version: &StagedVersion) -> Result<String, DeployError> {
        if version.state() != VersionState::Finalized {
            return Err(version.illegal("RELEASED"));
        }
        self.release_only(site, &version.name)
    }

    /// Publish an already finalized version without touching local files.
    ///
    /// Used to retry a run that failed after finalization.
    pub fn release_only(&self, site: &str, version: &VersionName) -> Result<String, DeployError> {
        self.cancel.check()?;
        let release = self
            .client
            .create_release(site, version)
            .map_err(|source| DeployError::Release {
                version: version.to_string(),
                source,
            })?;
        info!(%version, %release, "release created");
        Ok(release)
    }
}
