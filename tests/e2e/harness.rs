//! Test harness that runs a catalog server on an ephemeral port.

use handover::{Artifact, Catalog, CatalogConfig, CatalogServer, Signer};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Private key that is not the embedded release key.
pub const FOREIGN_SIGNING_KEY: &[u8] =
    include_bytes!("../../keys/testdata/foreign_signing_key.der");

/// Error type for test harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Library error
    #[error("Handover error: {0}")]
    Handover(#[from] handover::Error),

    /// Filesystem or socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// A catalog server over a temporary storage directory.
pub struct TestHarness {
    storage: TempDir,
    catalog: Arc<Catalog>,
    addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    server: JoinHandle<handover::Result<()>>,
}

impl TestHarness {
    /// Start a catalog server signing with the embedded release key.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to start.
    pub async fn setup() -> Result<Self> {
        Self::setup_with_signer(Signer::embedded()?).await
    }

    /// Start a catalog server signing with `signer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to start.
    pub async fn setup_with_signer(signer: Signer) -> Result<Self> {
        let storage = TempDir::new()?;
        let config = CatalogConfig {
            storage_dir: storage.path().to_path_buf(),
            scan_interval_secs: 1,
            ..CatalogConfig::default()
        };
        let server = CatalogServer::new(config, signer)?;
        let catalog = server.catalog();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(server.run_until(listener, stop_rx));
        info!("Test catalog server on {addr}");

        Ok(Self {
            storage,
            catalog,
            addr,
            stop_tx,
            server,
        })
    }

    /// Place an executable in the storage directory without scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_executable(&self, name: &str, content: &[u8]) -> Result<()> {
        let path = self.storage.path().join(name);
        std::fs::write(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    /// Place an executable in the storage directory and catalog it now.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or cataloged.
    pub fn publish(&self, name: &str, content: &[u8]) -> Result<Artifact> {
        self.write_executable(name, content)?;
        self.catalog.scan_directory()?;
        self.catalog
            .get(name)
            .ok_or_else(|| handover::Error::Version(format!("{name} was not cataloged")).into())
    }

    /// Base URL of the distribution endpoint.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The served catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Fetch the served descriptor; `None` while the catalog is empty.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or unexpected statuses.
    pub async fn newest_descriptor(&self) -> Result<Option<Artifact>> {
        let response = reqwest::get(self.base_url()).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }

    /// Wait for the server to stop on its own.
    ///
    /// # Errors
    ///
    /// Returns the error the server stopped with.
    pub async fn join(self) -> handover::Result<()> {
        self.server.await?
    }

    /// Stop the server and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the server failed.
    pub async fn teardown(self) -> Result<()> {
        info!("Tearing down test harness");
        self.stop_tx.send_replace(true);
        self.server.await.map_err(handover::Error::from)??;
        Ok(())
    }
}
