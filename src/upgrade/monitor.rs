//! Distribution endpoint client for auto-upgrades.

use crate::catalog::Artifact;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Fetches release descriptors and artifacts from a distribution endpoint.
pub struct ReleaseMonitor {
    client: reqwest::Client,
    check_url: Url,
}

impl ReleaseMonitor {
    /// Create a new monitor for the endpoint at `check_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(check_url: &str, request_timeout: Duration) -> Result<Self> {
        let check_url = Url::parse(check_url)
            .map_err(|e| Error::Config(format!("invalid check_url {check_url:?}: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("handover/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, check_url })
    }

    /// Get the endpoint URL.
    #[must_use]
    pub fn check_url(&self) -> &Url {
        &self.check_url
    }

    /// Fetch the newest release descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] on transport failures and non-2xx statuses,
    /// and [`Error::Descriptor`] if the body is not a descriptor.
    pub async fn fetch_descriptor(&self) -> Result<Artifact> {
        debug!("Checking for updates from {}", self.check_url);

        let body = self
            .client
            .get(self.check_url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        serde_json::from_slice(&body)
            .map_err(|e| Error::Descriptor(format!("malformed release descriptor: {e}")))
    }

    /// Download the artifact a descriptor points at.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] on transport failures and non-2xx statuses.
    pub async fn fetch_artifact(&self, uri: &str) -> Result<Bytes> {
        let url = resolve_artifact_url(&self.check_url, uri)?;
        debug!("Downloading artifact from {url}");

        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        debug!("Downloaded {} bytes", bytes.len());
        Ok(bytes)
    }
}

/// Resolve a descriptor `uri` against the endpoint base URL.
///
/// Absolute URLs are used as they are. Anything else is appended to the base
/// path, so `/data/svc.v2` under `http://host/updates` becomes
/// `http://host/updates/data/svc.v2`.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] if the result is not a valid URL.
pub fn resolve_artifact_url(base: &Url, uri: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(uri) {
        return Ok(absolute);
    }

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(uri.trim_start_matches('/'))
        .map_err(|e| Error::Descriptor(format!("invalid artifact uri {uri:?}: {e}")))
}
