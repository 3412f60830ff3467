//! Catalog server: periodic directory scans plus the distribution endpoint.

use crate::catalog::Catalog;
use crate::config::CatalogConfig;
use crate::distribution::create_router;
use crate::error::Result;
use crate::signature::Signer;
use crate::tasks::{shutdown_requested, TaskGroup};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Serves a catalog of signed artifacts over HTTP.
///
/// A scan error under [`crate::config::ScanPolicy::FailFast`] ends the scan
/// task, which shuts the whole server down with that error.
pub struct CatalogServer {
    config: CatalogConfig,
    catalog: Arc<Catalog>,
}

impl CatalogServer {
    /// Create a new server.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: CatalogConfig, signer: Signer) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(Catalog::from_config(&config, signer));
        Ok(Self { config, catalog })
    }

    /// Get the served catalog.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// Bind the configured address and run until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails, a scan fails or the endpoint fails.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let mut group = self.spawn_tasks(listener)?;
        group.spawn_ctrl_c();
        group.wait().await
    }

    /// Run on an already bound `listener` until `stop` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if a scan fails or the endpoint fails.
    pub async fn run_until(self, listener: TcpListener, stop: watch::Receiver<bool>) -> Result<()> {
        let mut group = self.spawn_tasks(listener)?;
        group.spawn("stop", move |mut shutdown| async move {
            let mut stop = stop;
            tokio::select! {
                () = shutdown_requested(&mut stop) => info!("Stop requested"),
                () = shutdown_requested(&mut shutdown) => {}
            }
            Ok(())
        });
        group.wait().await
    }

    fn spawn_tasks(&self, listener: TcpListener) -> Result<TaskGroup> {
        let addr: SocketAddr = listener.local_addr()?;
        info!(
            "Catalog server on {addr}: serving {} under {}",
            self.config.storage_dir.display(),
            self.config.http_prefix
        );

        let mut group = TaskGroup::new();

        let catalog = Arc::clone(&self.catalog);
        let cadence = self.config.scan_interval();
        group.spawn("scan", move |shutdown| catalog.run_periodic(cadence, shutdown));

        let router = create_router(Arc::clone(&self.catalog), &self.config.http_prefix);
        group.spawn("http", move |shutdown| crate::listener::serve(listener, router, shutdown));

        Ok(group)
    }
}
