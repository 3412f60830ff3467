//! Self-updating node: a small HTTP service that replaces itself in place.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::event::{create_event_channel, EventsChannel, EventsSender};
use crate::listener::{bind_reuseport, serve};
use crate::signature::Verifier;
use crate::tasks::{shutdown_requested, TaskGroup};
use crate::upgrade::Updater;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use semver::Version;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Version this binary was built as.
///
/// `HANDOVER_BUILD_VERSION` at compile time overrides the package version,
/// so one source tree can produce a series of versioned artifacts.
#[must_use]
pub fn build_version() -> Version {
    let raw = option_env!("HANDOVER_BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    Version::parse(raw).unwrap_or_else(|_| Version::new(0, 0, 0))
}

/// Why a node stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExit {
    /// A newer generation was started and now owns the address.
    HandedOver,
    /// Shutdown was requested.
    Stopped,
}

/// Builder for constructing a node.
pub struct NodeBuilder {
    config: NodeConfig,
    version: Version,
}

impl NodeBuilder {
    /// Create a new node builder with the given configuration.
    #[must_use]
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            version: build_version(),
        }
    }

    /// Report `version` instead of the build version.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Bind the listener and prepare the updater.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the address cannot
    /// be bound or the updater cannot be created.
    pub async fn build(self) -> Result<RunningNode> {
        info!("Building handover-node with config: {:?}", self.config);
        self.config.validate()?;

        let listener = bind_reuseport(self.config.listen_addr)?;
        let (events_tx, _) = create_event_channel();

        let updater = if self.config.upgrade.enabled {
            let verifier = Arc::new(Verifier::embedded()?);
            Some(
                Updater::new(&self.config.upgrade, self.version.clone(), verifier)?
                    .with_events(events_tx.clone()),
            )
        } else {
            info!("Automatic upgrades disabled");
            None
        };

        Ok(RunningNode {
            version: self.version,
            listener,
            events_tx,
            updater,
        })
    }
}

/// A node bound to its address, ready to run.
pub struct RunningNode {
    version: Version,
    listener: TcpListener,
    events_tx: EventsSender,
    updater: Option<Updater>,
}

impl RunningNode {
    /// Get the bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get the version this node reports.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Subscribe to upgrade events.
    #[must_use]
    pub fn subscribe_events(&self) -> EventsChannel {
        self.events_tx.subscribe()
    }

    /// Replace the updater, e.g. with one using different collaborators.
    #[must_use]
    pub fn with_updater(mut self, updater: Updater) -> Self {
        self.updater = Some(updater.with_events(self.events_tx.clone()));
        self
    }

    /// Run until a new generation takes over or Ctrl-C is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails or the updater gives up.
    pub async fn run(self) -> Result<NodeExit> {
        self.run_with(|group| group.spawn_ctrl_c()).await
    }

    /// Run until a new generation takes over or `stop` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails or the updater gives up.
    pub async fn run_until(self, stop: watch::Receiver<bool>) -> Result<NodeExit> {
        self.run_with(move |group| {
            group.spawn("stop", move |mut shutdown| async move {
                let mut stop = stop;
                tokio::select! {
                    () = shutdown_requested(&mut stop) => info!("Stop requested"),
                    () = shutdown_requested(&mut shutdown) => {}
                }
                Ok(())
            });
        })
        .await
    }

    async fn run_with(self, add_stop_signal: impl FnOnce(&mut TaskGroup)) -> Result<NodeExit> {
        let pid = std::process::id();
        info!("Starting handover-node {} (pid {pid})", self.version);

        let handed_over = Arc::new(AtomicBool::new(false));
        let mut group = TaskGroup::new();

        let router = hello_router(self.version.clone(), pid);
        let listener = self.listener;
        group.spawn("server", move |shutdown| serve(listener, router, shutdown));

        if let Some(updater) = self.updater {
            let flag = Arc::clone(&handed_over);
            group.spawn("updater", move |shutdown| async move {
                if updater.run(shutdown).await? {
                    info!("New generation running, draining connections");
                    flag.store(true, Ordering::SeqCst);
                }
                Ok(())
            });
        } else {
            // Keep the group alive: the server is the only other task.
            group.spawn("updater", |mut shutdown| async move {
                shutdown_requested(&mut shutdown).await;
                Ok(())
            });
        }

        add_stop_signal(&mut group);

        match group.wait().await {
            Ok(()) if handed_over.load(Ordering::SeqCst) => {
                info!("Node {} handed over", self.version);
                Ok(NodeExit::HandedOver)
            }
            Ok(()) => {
                info!("Node {} stopped", self.version);
                Ok(NodeExit::Stopped)
            }
            Err(e) => {
                warn!("Node {} failed: {e}", self.version);
                Err(e)
            }
        }
    }
}

#[derive(Clone)]
struct HelloState {
    version: Version,
    pid: u32,
}

fn hello_router(version: Version, pid: u32) -> Router {
    Router::new()
        .route("/", get(hello))
        .with_state(HelloState { version, pid })
}

async fn hello(State(state): State<HelloState>) -> String {
    format!("Hello from PID {} and Version {}\n", state.pid, state.version)
}
