//! # Hosting Deploy
//!
//! Content-addressed static site deployment to Firebase Hosting.
//!
//! Every file under the public directory is gzip-compressed and addressed
//! by the SHA-256 of its compressed bytes. The hosting service is asked
//! which of those hashes it lacks, only those blobs are uploaded, and the
//! version is then finalized and released.
//!
//! ## Features
//!
//! - Parallel hashing and uploads using Rayon
//! - Upload deduplication by content hash
//! - Checked version lifecycle (created → populated → finalized → released)
//! - Ctrl+C and deadline cancellation
//!
//! ## Usage
//!
//! ```ignore
//! use hosting_deploy::catalog::{build_catalog, IgnoreRules};
//! use hosting_deploy::deployer::Deployer;
//!
//! let catalog = build_catalog(&public_root, &rules, &cancel)?;
//! let report = Deployer::new(&client, cancel).deploy("my-site", &serving, &catalog)?;
//! ```

/// Gzip compression and content hashing
pub mod addresser;

/// Bearer token providers
pub mod auth;

/// Cancellation signal
pub mod cancel;

/// Directory walk, ignore rules, manifest and content store
pub mod catalog;

/// CLI configuration and hosting config file
pub mod config;

/// Version lifecycle orchestration
pub mod deployer;

/// Error types for deployment operations
pub mod error;

/// Firebase Hosting REST client
pub mod firebase;

/// Hosting service capability and wire types
pub mod remote;
