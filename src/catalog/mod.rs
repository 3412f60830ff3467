//! Artifact catalog.
//!
//! Scans a storage directory for versioned executables, digests and signs
//! each new one, and tracks the newest version for the distribution
//! endpoint.
//!
//! Entries are append-only for the lifetime of the process: re-scanning never
//! replaces an entry for a filename that is already cataloged. The only
//! writer is the scan task, and scans never overlap, so the lock only ever
//! arbitrates between that writer and concurrent readers.

mod version;

pub use version::parse_version;

use crate::config::{CatalogConfig, ScanPolicy};
use crate::error::{Error, Result};
use crate::event::{create_event_channel, Event, EventsChannel, EventsSender};
use crate::signature::Signer;
use crate::tasks::shutdown_requested;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// One cataloged executable version.
///
/// This is also the descriptor served to updaters, so the serialized field
/// names are part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path under which the raw bytes are served.
    pub uri: String,
    /// Base filename in the storage directory.
    #[serde(rename = "image")]
    pub filename: String,
    /// When the artifact was cataloged.
    pub created_at: DateTime<Utc>,
    /// Encoded SHA-256 digest of the file.
    #[serde(rename = "file_sum")]
    pub digest: String,
    /// Encoded signature over the digest.
    #[serde(rename = "sign")]
    pub signature: String,
    /// Version parsed from the filename.
    pub version: Version,
}

impl Artifact {
    /// Ordering used to pick the newest artifact: version, then catalog
    /// time, then filename.
    fn rank(&self) -> (&Version, DateTime<Utc>, &str) {
        (&self.version, self.created_at, &self.filename)
    }
}

#[derive(Default)]
struct Entries {
    artifacts: HashMap<String, Artifact>,
    newest: Option<String>,
}

/// In-memory index of signed artifacts.
pub struct Catalog {
    storage_dir: PathBuf,
    http_prefix: String,
    signer: Signer,
    scan_policy: ScanPolicy,
    entries: RwLock<Entries>,
    /// Files skipped under [`ScanPolicy::SkipInvalid`], so they are logged once.
    rejected: Mutex<HashSet<String>>,
    events: EventsSender,
}

impl Catalog {
    /// Create an empty catalog over `storage_dir`.
    ///
    /// Artifact URIs are `<http_prefix>/<filename>`.
    #[must_use]
    pub fn new(storage_dir: impl Into<PathBuf>, http_prefix: &str, signer: Signer) -> Self {
        let (events, _) = create_event_channel();
        Self {
            storage_dir: storage_dir.into(),
            http_prefix: http_prefix.trim_end_matches('/').to_string(),
            signer,
            scan_policy: ScanPolicy::default(),
            entries: RwLock::new(Entries::default()),
            rejected: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Create a catalog from server configuration.
    #[must_use]
    pub fn from_config(config: &CatalogConfig, signer: Signer) -> Self {
        Self::new(config.storage_dir.clone(), &config.http_prefix, signer)
            .with_scan_policy(config.scan_policy)
    }

    /// Set the per-file scan error policy.
    #[must_use]
    pub fn with_scan_policy(mut self, policy: ScanPolicy) -> Self {
        self.scan_policy = policy;
        self
    }

    /// The scanned directory.
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Subscribe to catalog events.
    #[must_use]
    pub fn subscribe(&self) -> EventsChannel {
        self.events.subscribe()
    }

    /// Whether `filename` is already cataloged.
    #[must_use]
    pub fn check_file(&self, filename: &str) -> bool {
        self.entries.read().artifacts.contains_key(filename)
    }

    /// Look up a cataloged artifact.
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<Artifact> {
        self.entries.read().artifacts.get(filename).cloned()
    }

    /// The artifact with the greatest version, if any.
    #[must_use]
    pub fn newest(&self) -> Option<Artifact> {
        let entries = self.entries.read();
        entries
            .newest
            .as_ref()
            .and_then(|name| entries.artifacts.get(name))
            .cloned()
    }

    /// Number of cataloged artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().artifacts.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().artifacts.is_empty()
    }

    /// Catalog one file from the storage directory.
    ///
    /// Reads and digests the whole file and signs the digest before taking
    /// the write lock. If the filename is already present the existing entry
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Version`] if the name has no version marker (the
    /// catalog is left untouched), or an I/O or signing error.
    pub fn add_artifact(&self, filename: &str) -> Result<Artifact> {
        let version = parse_version(filename)?;

        let content = fs::read(self.storage_dir.join(filename))?;
        let signed = self.signer.sign(&content)?;

        let artifact = Artifact {
            uri: format!("{}/{filename}", self.http_prefix),
            filename: filename.to_string(),
            created_at: Utc::now(),
            digest: signed.encoded_digest(),
            signature: signed.encoded_signature(),
            version,
        };

        let (previous, newest) = {
            let mut guard = self.entries.write();
            let entries = &mut *guard;
            if let Some(existing) = entries.artifacts.get(filename) {
                return Ok(existing.clone());
            }
            entries
                .artifacts
                .insert(filename.to_string(), artifact.clone());

            let newest = entries
                .artifacts
                .values()
                .max_by(|a, b| a.rank().cmp(&b.rank()))
                .map(|a| (a.filename.clone(), a.version.to_string()));
            let previous = std::mem::replace(
                &mut entries.newest,
                newest.as_ref().map(|(filename, _)| filename.clone()),
            );
            (previous, newest)
        };

        info!(
            filename,
            version = %artifact.version,
            digest = %hex::encode(&signed.digest[..8]),
            "Artifact cataloged"
        );
        let _ = self.events.send(Event::ArtifactAdded {
            filename: artifact.filename.clone(),
            version: artifact.version.to_string(),
        });

        if let Some((filename, version)) = newest {
            if previous.as_deref() != Some(filename.as_str()) {
                info!(%filename, %version, "Newest artifact changed");
                let _ = self.events.send(Event::NewestChanged { filename, version });
            }
        }

        Ok(artifact)
    }

    /// Catalog every executable in the storage directory not yet present.
    ///
    /// Entries are visited in filename order. Under [`ScanPolicy::FailFast`]
    /// the first failure ends the pass; artifacts added earlier in the same
    /// pass stay cataloged.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed, or the first
    /// per-file error under [`ScanPolicy::FailFast`].
    pub fn scan_directory(&self) -> Result<usize> {
        let mut dir_entries =
            fs::read_dir(&self.storage_dir)?.collect::<std::io::Result<Vec<_>>>()?;
        dir_entries.sort_by_key(fs::DirEntry::file_name);

        let mut added = 0;
        for entry in dir_entries {
            let Ok(filename) = entry.file_name().into_string() else {
                debug!("Skipping non UTF-8 filename: {}", entry.path().display());
                continue;
            };

            // Dangling symlinks and files removed since the listing are not candidates.
            let metadata = match fs::metadata(entry.path()) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Skipping vanished entry: {}", entry.path().display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() || !is_executable(&metadata) {
                continue;
            }

            if self.check_file(&filename) || self.rejected.lock().contains(&filename) {
                continue;
            }

            match self.add_artifact(&filename) {
                Ok(_) => added += 1,
                Err(e) => match self.scan_policy {
                    ScanPolicy::FailFast => return Err(e),
                    ScanPolicy::SkipInvalid => {
                        warn!(%filename, "Skipping file that cannot be cataloged: {e}");
                        self.rejected.lock().insert(filename);
                    }
                },
            }
        }

        if added > 0 {
            debug!("Scan of {} added {added} artifact(s)", self.storage_dir.display());
        }
        Ok(added)
    }

    /// Scan immediately, then every `cadence` until shutdown is requested.
    ///
    /// Each scan runs on the blocking pool. A scan already in progress
    /// completes before shutdown is honoured.
    ///
    /// # Errors
    ///
    /// Returns the first scan error; the caller is expected to shut the
    /// whole server down.
    pub async fn run_periodic(
        self: Arc<Self>,
        cadence: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        if cadence.is_zero() {
            return Err(Error::Config("scan cadence must be positive".to_string()));
        }

        info!(
            "Scanning {} every {:?}",
            self.storage_dir.display(),
            cadence
        );
        self.scan_blocking().await?;

        let mut ticker = interval_at(Instant::now() + cadence, cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown_requested(&mut shutdown) => {
                    debug!("Scan loop stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.scan_blocking().await?;
                }
            }
        }
    }

    async fn scan_blocking(self: &Arc<Self>) -> Result<usize> {
        let catalog = Arc::clone(self);
        tokio::task::spawn_blocking(move || catalog.scan_directory()).await?
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}
