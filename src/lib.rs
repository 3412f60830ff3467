//! # handover
//!
//! Self-updating services with signed releases and zero-downtime restarts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────── handover-catalog ────────────────┐
//! │  storage dir ──scan──▶ Catalog ──▶ GET /          │
//! │  (svc.v1.4.2)          (sign)      GET /data/...  │
//! └───────────────────────────┬──────────────────────┘
//!                             │ descriptor + binary
//! ┌──────────────── handover-node ───────▼───────────┐
//! │  Updater: poll ▶ verify ▶ download ▶ apply ▶ exec │
//! │  HTTP service on an SO_REUSEPORT listener         │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! The catalog server scans a directory of versioned executables, signs the
//! SHA-256 digest of each with RSA-PSS and serves the newest one. Nodes poll
//! it, verify the signature with the embedded public key, replace their own
//! executable and start the new version on the same address before draining
//! and exiting.

pub mod catalog;
pub mod config;
pub mod distribution;
pub mod error;
pub mod event;
pub mod listener;
pub mod logging;
pub mod node;
pub mod server;
pub mod signature;
pub mod tasks;
pub mod upgrade;

#[cfg(test)]
mod testing;

pub use catalog::{parse_version, Artifact, Catalog};
pub use config::{CatalogConfig, NodeConfig, ScanPolicy, UpgradeConfig};
pub use error::{Error, FailureKind, Result};
pub use event::{Event, EventsChannel, EventsSender};
pub use listener::bind_reuseport;
pub use node::{build_version, NodeBuilder, NodeExit, RunningNode};
pub use server::CatalogServer;
pub use signature::{ReleaseVerifier, Signer, Verifier};
pub use tasks::TaskGroup;
pub use upgrade::{AttemptOutcome, RetryPolicy, UpdateState, Updater};
