use std::path::PathBuf;
use thiserror::Error;

use crate::remote::RemoteError;

/// Failure to turn one file into a content address
#[derive(Error, Debug)]
pub enum AddressError {
    #[error("read failed")]
    Read(#[source] std::io::Error),

    #[error("gzip flush failed")]
    Compress(#[source] std::io::Error),
}

/// Deployment error types
///
/// Every variant is fatal to the current run. The display form names the
/// phase first so `main` can print it as a single diagnostic line.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("config: {message}")]
    Config { message: String },

    #[error("config: cannot read {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config: cannot parse {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("walk {root}: {message}")]
    Walk { root: PathBuf, message: String },

    #[error("hash {path}")]
    Hash {
        path: String,
        #[source]
        source: AddressError,
    },

    #[error("create version for site {site}")]
    VersionCreate {
        site: String,
        #[source]
        source: RemoteError,
    },

    #[error("reconcile {version}")]
    Reconcile {
        version: String,
        #[source]
        source: RemoteError,
    },

    #[error("reconcile {version}: server requested unknown hash {hash}")]
    UnknownRequiredHash { version: String, hash: String },

    #[error("upload {hash}")]
    Upload {
        hash: String,
        #[source]
        source: RemoteError,
    },

    #[error("finalize {version}: unexpected status {status:?}")]
    Finalization { version: String, status: String },

    #[error("finalize {version}")]
    FinalizeRequest {
        version: String,
        #[source]
        source: RemoteError,
    },

    #[error("release {version}")]
    Release {
        version: String,
        #[source]
        source: RemoteError,
    },

    #[error("version {version}: illegal transition {from} -> {to}")]
    Lifecycle {
        version: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("deployment cancelled")]
    Cancelled,
}

impl DeployError {
    /// Whether the run stopped because of Ctrl+C or the deadline
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled)
    }
}
