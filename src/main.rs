use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hosting_deploy::auth::{CredentialProvider, EnvToken, StaticToken};
use hosting_deploy::cancel::Cancellation;
use hosting_deploy::catalog::{build_catalog, IgnoreRules};
use hosting_deploy::config::{Cli, Config};
use hosting_deploy::deployer::Deployer;
use hosting_deploy::error::DeployError;
use hosting_deploy::firebase::FirebaseHostingClient;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let cancelled = e
                .downcast_ref::<DeployError>()
                .is_some_and(DeployError::is_cancelled);
            eprintln!("error: {e:#}");
            if cancelled {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::from_cli(cli)?;

    // Setup Ctrl+C handler
    let mut cancel = Cancellation::new();
    if let Some(timeout) = config.timeout {
        cancel = cancel.with_timeout(timeout);
    }
    let flag = cancel.flag();
    ctrlc::set_handler(move || {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let credentials: Box<dyn CredentialProvider> = match config.access_token.clone() {
        Some(token) => Box::new(StaticToken::new(token)),
        None => Box::new(EnvToken::default()),
    };
    let client =
        FirebaseHostingClient::new(&config.api_base, credentials, config.request_timeout);

    if let Some(version) = &config.release_only {
        let release = Deployer::new(&client, cancel).release_only(&config.site, version)?;
        info!(%release, "released");
        return Ok(());
    }

    // Hashing and uploads both run on this pool
    let pool = config.thread_pool()?;

    let start = Instant::now();
    let rules = IgnoreRules::from_patterns(&config.public_root, &config.ignore)?;
    let catalog = pool.install(|| build_catalog(&config.public_root, &rules, &cancel))?;
    info!(
        files = catalog.manifest.len(),
        blobs = catalog.store.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "catalog ready"
    );

    let mut deployer = Deployer::new(&client, cancel);
    if config.verbose {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        deployer = deployer.with_progress(pb);
    }

    let report = pool.install(|| deployer.deploy(&config.site, &config.serving, &catalog))?;

    let secs = report.duration.as_secs_f64();
    info!(
        version = %report.version,
        release = %report.release,
        files = report.file_count,
        uploaded = report.uploaded,
        bytes = report.uploaded_bytes,
        "deployed in {secs:.2}s"
    );
    Ok(())
}
