//! CLI arguments, the hosting config file, and the runtime settings built from both.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::auth::ACCESS_TOKEN_ENV;
use crate::error::DeployError;
use crate::firebase::DEFAULT_API_BASE;
use crate::remote::{HeaderRule, RedirectRule, ServingConfig, VersionName};

/// Content-addressed static site deployment to Firebase Hosting
#[derive(Parser, Debug)]
#[command(name = "hosting-deploy")]
#[command(version)]
#[command(about = "Deploy a static site to Firebase Hosting, uploading only changed content")]
pub struct Cli {
    /// Hosting config file
    #[arg(short, long, default_value = "firebase.json")]
    pub config: PathBuf,

    /// Site to deploy to (overrides hosting.site)
    #[arg(short, long)]
    pub site: Option<String>,

    /// Number of parallel hashing and upload workers
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub jobs: usize,

    /// Abort the whole run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Timeout for a single HTTP request, in seconds
    #[arg(long, default_value_t = 60)]
    pub request_timeout: u64,

    /// Hosting REST API base URL
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// OAuth access token for the hosting API
    #[arg(long, env = ACCESS_TOKEN_ENV, hide_env_values = true)]
    pub access_token: Option<String>,

    /// Only publish this already finalized version (e.g. sites/my-site/versions/abc)
    #[arg(long, value_name = "VERSION")]
    pub release_only: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// `hosting` section of the config file
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostingSection {
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub public: String,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub clean_urls: bool,
    #[serde(default)]
    pub trailing_slash: bool,
    #[serde(default)]
    pub headers: Vec<HeaderSource>,
    #[serde(default)]
    pub redirects: Vec<RedirectSource>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HeaderSource {
    pub source: String,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HeaderPair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RedirectSource {
    pub source: String,
    pub destination: String,
    #[serde(rename = "type")]
    pub status: Option<u16>,
}

/// Whole config file; only `hosting` is read
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HostingFile {
    #[serde(default)]
    pub hosting: HostingSection,
}

impl HostingFile {
    pub fn parse(path: &Path, content: &str) -> Result<Self, DeployError> {
        serde_json::from_str(content).map_err(|source| DeployError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let content = fs::read_to_string(path).map_err(|source| DeployError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }
}

impl HostingSection {
    /// Serving behavior sent with the new version
    pub fn serving_config(&self) -> ServingConfig {
        ServingConfig {
            clean_urls: self.clean_urls,
            trailing_slash_behavior: self.trailing_slash.then(|| "ADD".to_string()),
            headers: self
                .headers
                .iter()
                .map(|h| HeaderRule {
                    glob: h.source.clone(),
                    headers: h
                        .headers
                        .iter()
                        .map(|p| (p.key.clone(), p.value.clone()))
                        .collect::<BTreeMap<_, _>>(),
                })
                .collect(),
            redirects: self
                .redirects
                .iter()
                .map(|r| RedirectRule {
                    glob: r.source.clone(),
                    location: r.destination.clone(),
                    status_code: r.status,
                })
                .collect(),
        }
    }
}

/// Runtime configuration built from CLI and config file
#[derive(Debug, Clone)]
pub struct Config {
    /// Site identifier, without the `sites/` prefix
    pub site: String,
    /// Directory whose files are deployed
    pub public_root: PathBuf,
    /// Ignore globs from the config file
    pub ignore: Vec<String>,
    pub serving: ServingConfig,
    /// Number of parallel workers
    pub jobs: usize,
    pub timeout: Option<Duration>,
    pub request_timeout: Duration,
    pub api_base: String,
    pub access_token: Option<String>,
    pub release_only: Option<VersionName>,
    /// Enable verbose output
    pub verbose: bool,
}

impl Config {
    /// Create Config from CLI arguments, reading the hosting config file
    ///
    /// A release-only retry reads no local files, so a missing config file
    /// is tolerated there as long as `--site` names the site.
    pub fn from_cli(cli: Cli) -> Result<Self, DeployError> {
        let file = match HostingFile::load(&cli.config) {
            Err(DeployError::ConfigRead { .. }) if cli.release_only.is_some() => {
                HostingFile::default()
            }
            loaded => loaded?,
        };
        Self::from_parts(cli, file)
    }

    /// Combine parsed CLI arguments with an already parsed config file
    pub fn from_parts(cli: Cli, file: HostingFile) -> Result<Self, DeployError> {
        let hosting = file.hosting;

        let site = cli
            .site
            .clone()
            .unwrap_or_else(|| hosting.site.clone())
            .trim()
            .to_string();
        if site.is_empty() {
            return Err(DeployError::Config {
                message: "hosting.site is required".to_string(),
            });
        }

        // Release-only never walks the site
        let public_root = if cli.release_only.is_some() {
            PathBuf::new()
        } else {
            public_root(&cli.config, &hosting)?
        };

        Ok(Config {
            site,
            public_root,
            ignore: hosting.ignore.clone(),
            serving: hosting.serving_config(),
            jobs: cli.jobs.max(1),
            timeout: cli.timeout.map(Duration::from_secs),
            request_timeout: Duration::from_secs(cli.request_timeout.max(1)),
            api_base: cli.api_base,
            access_token: cli.access_token.filter(|t| !t.trim().is_empty()),
            release_only: cli.release_only.map(VersionName::new),
            verbose: cli.verbose,
        })
    }
}

impl Config {
    /// Worker pool bounding parallel hashing and uploads to `jobs` threads
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool, DeployError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("deploy-worker-{i}"))
            .build()
            .map_err(|e| DeployError::Config {
                message: format!("cannot start {} workers: {e}", self.jobs),
            })
    }
}

/// `hosting.public`, resolved against the config file's directory
fn public_root(config_path: &Path, hosting: &HostingSection) -> Result<PathBuf, DeployError> {
    let public = hosting.public.trim();
    if public.is_empty() {
        return Err(DeployError::Config {
            message: "hosting.public is required".to_string(),
        });
    }

    let public = Path::new(public);
    if public.is_absolute() {
        return Ok(public.to_path_buf());
    }
    let base = config_path.parent().unwrap_or_else(|| Path::new(""));
    Ok(base.join(public))
}
