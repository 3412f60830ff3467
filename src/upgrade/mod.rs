//! Auto-upgrade system with signed release descriptors.
//!
//! This module handles:
//! - Polling the distribution endpoint for the newest release
//! - Verifying the release signature before downloading anything
//! - Atomically replacing the running binary after a checksum check
//! - Starting the new generation of the process
//!
//! ```text
//! Idle -> Polling -+-> NoUpdate -> (next tick) -> Polling
//!                  '-> UpdateAvailable -> Verifying -> Downloading
//!                        -> Applying -> Relaunching -> Done
//! ```
//!
//! A failed attempt is logged and retried on the next tick unless the
//! [`RetryPolicy`] says otherwise.

mod apply;
mod launch;
mod monitor;

pub use apply::{BinaryApplier, ExecutableReplacer};
pub use launch::{CommandLauncher, ProcessLauncher};
pub use monitor::{resolve_artifact_url, ReleaseMonitor};

use crate::config::UpgradeConfig;
use crate::error::{Error, FailureKind, Result};
use crate::event::{create_event_channel, Event, EventsChannel, EventsSender};
use crate::signature::{decode_digest, ReleaseVerifier};
use crate::tasks::shutdown_requested;
use semver::Version;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Where the updater is in its cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    /// Waiting for the next check.
    Idle,
    /// Fetching the release descriptor.
    Polling,
    /// The endpoint offers nothing newer.
    NoUpdate,
    /// A newer release was found.
    UpdateAvailable {
        /// Offered version.
        version: Version,
    },
    /// Checking the release signature.
    Verifying,
    /// Downloading the new binary.
    Downloading,
    /// Replacing the executable.
    Applying,
    /// Starting the new process.
    Relaunching,
    /// The new generation is running.
    Done {
        /// Installed version.
        version: Version,
        /// Process id of the new generation.
        pid: u32,
    },
    /// The retry policy gave up.
    Fatal {
        /// Last error.
        message: String,
    },
}

/// Result of a single update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Nothing newer than the running version.
    NoUpdate,
    /// A new version was installed and started.
    Launched {
        /// Installed version.
        version: Version,
        /// Process id of the new generation.
        pid: u32,
    },
}

/// What the update loop does about repeated failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Log every failure and try again on the next tick.
    #[default]
    Forever,
    /// Stop after `consecutive` failures of `kind` in a row.
    FatalAfter {
        /// Failure kind that counts.
        kind: FailureKind,
        /// Consecutive failures tolerated before giving up.
        consecutive: u32,
    },
}

/// Consecutive-failure bookkeeping for [`RetryPolicy::FatalAfter`].
#[derive(Debug, Default)]
struct FailureStreak {
    kind: Option<FailureKind>,
    count: u32,
}

impl FailureStreak {
    /// Record a failure; `true` if the policy now gives up.
    fn record(&mut self, kind: FailureKind, policy: RetryPolicy) -> bool {
        if self.kind == Some(kind) {
            self.count = self.count.saturating_add(1);
        } else {
            self.kind = Some(kind);
            self.count = 1;
        }

        match policy {
            RetryPolicy::Forever => false,
            RetryPolicy::FatalAfter {
                kind: fatal,
                consecutive,
            } => fatal == kind && self.count >= consecutive,
        }
    }

    fn reset(&mut self) {
        self.kind = None;
        self.count = 0;
    }
}

/// Polls for, verifies, installs and starts new releases.
pub struct Updater {
    monitor: ReleaseMonitor,
    verifier: Arc<dyn ReleaseVerifier>,
    applier: Arc<dyn BinaryApplier>,
    launcher: Arc<dyn ProcessLauncher>,
    current_version: Version,
    check_interval: Duration,
    retry_policy: RetryPolicy,
    state: watch::Sender<UpdateState>,
    events: EventsSender,
}

impl Updater {
    /// Create a new updater for the running executable.
    ///
    /// The executable path and launch arguments are captured here, before
    /// any replacement can happen.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the running
    /// executable cannot be located.
    pub fn new(
        config: &UpgradeConfig,
        current_version: Version,
        verifier: Arc<dyn ReleaseVerifier>,
    ) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(UpdateState::Idle);
        let (events, _) = create_event_channel();

        Ok(Self {
            monitor: ReleaseMonitor::new(&config.check_url, config.request_timeout())?,
            verifier,
            applier: Arc::new(ExecutableReplacer::current_executable()?),
            launcher: Arc::new(CommandLauncher::current_process()?),
            current_version,
            check_interval: config.check_interval(),
            retry_policy: RetryPolicy::default(),
            state,
            events,
        })
    }

    /// Install binaries with `applier`.
    #[must_use]
    pub fn with_applier(mut self, applier: Arc<dyn BinaryApplier>) -> Self {
        self.applier = applier;
        self
    }

    /// Start new generations with `launcher`.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Set the failure policy of [`Updater::run`].
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the configured check interval.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Publish events on `events` instead of a private channel.
    #[must_use]
    pub fn with_events(mut self, events: EventsSender) -> Self {
        self.events = events;
        self
    }

    /// Get the running version.
    #[must_use]
    pub fn current_version(&self) -> &Version {
        &self.current_version
    }

    /// Get the check interval.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Watch the updater state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<UpdateState> {
        self.state.subscribe()
    }

    /// Subscribe to upgrade events.
    #[must_use]
    pub fn subscribe(&self) -> EventsChannel {
        self.events.subscribe()
    }

    /// Check immediately, then every check interval, until a new generation
    /// has been started or shutdown is requested.
    ///
    /// Returns `true` once a new process is running and `false` on shutdown.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the check interval is zero, or the
    /// last error if the retry policy gives up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<bool> {
        if self.check_interval.is_zero() {
            return Err(Error::Config("check interval must be positive".to_string()));
        }

        info!(
            "Update loop started: version {}, checking {} every {:?}",
            self.current_version,
            self.monitor.check_url(),
            self.check_interval
        );

        let mut streak = FailureStreak::default();
        if self.attempt(&mut streak).await? {
            return Ok(true);
        }

        let mut ticker = interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown_requested(&mut shutdown) => {
                    info!("Update loop stopped");
                    self.state.send_replace(UpdateState::Idle);
                    return Ok(false);
                }
                _ = ticker.tick() => {
                    if self.attempt(&mut streak).await? {
                        return Ok(true);
                    }
                }
            }
        }
    }

    async fn attempt(&self, streak: &mut FailureStreak) -> Result<bool> {
        match self.check_and_run().await {
            Ok(AttemptOutcome::Launched { .. }) => Ok(true),
            Ok(AttemptOutcome::NoUpdate) => {
                streak.reset();
                Ok(false)
            }
            Err(e) => {
                let kind = e.kind();
                warn!(?kind, "Update attempt failed: {e}");
                let _ = self.events.send(Event::UpgradeFailed {
                    message: e.to_string(),
                });

                if streak.record(kind, self.retry_policy) {
                    error!(?kind, "Giving up after {} consecutive failures", streak.count);
                    self.state.send_replace(UpdateState::Fatal {
                        message: e.to_string(),
                    });
                    return Err(e);
                }

                self.state.send_replace(UpdateState::Idle);
                Ok(false)
            }
        }
    }

    /// Run one update attempt.
    ///
    /// Nothing is downloaded unless the descriptor offers a strictly newer
    /// version with a valid signature, and nothing is started unless the
    /// downloaded binary matches the signed digest and was installed.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever step failed.
    pub async fn check_and_run(&self) -> Result<AttemptOutcome> {
        self.state.send_replace(UpdateState::Polling);
        let descriptor = self.monitor.fetch_descriptor().await?;

        if descriptor.version <= self.current_version {
            debug!(
                "No update: offered {} is not newer than {}",
                descriptor.version, self.current_version
            );
            self.state.send_replace(UpdateState::NoUpdate);
            return Ok(AttemptOutcome::NoUpdate);
        }

        let version = descriptor.version.clone();
        info!(
            "Update available: {} -> {} ({})",
            self.current_version, version, descriptor.filename
        );
        self.state.send_replace(UpdateState::UpdateAvailable {
            version: version.clone(),
        });

        self.state.send_replace(UpdateState::Verifying);
        self.verifier
            .verify_release(&descriptor.digest, &descriptor.signature)?;
        let expected_digest = decode_digest(&descriptor.digest)?;
        let _ = self.events.send(Event::UpgradeAvailable {
            version: version.to_string(),
        });

        self.state.send_replace(UpdateState::Downloading);
        let binary = self.monitor.fetch_artifact(&descriptor.uri).await?;

        self.state.send_replace(UpdateState::Applying);
        let applier = Arc::clone(&self.applier);
        tokio::task::spawn_blocking(move || applier.apply(&binary, &expected_digest)).await??;
        info!("Applied version {version}");
        let _ = self.events.send(Event::UpgradeApplied {
            version: version.to_string(),
        });

        self.state.send_replace(UpdateState::Relaunching);
        let pid = self.launcher.launch()?;
        info!("Version {version} running as pid {pid}");
        let _ = self.events.send(Event::ProcessLaunched {
            version: version.to_string(),
            pid,
        });

        self.state.send_replace(UpdateState::Done {
            version: version.clone(),
            pid,
        });
        Ok(AttemptOutcome::Launched { version, pid })
    }
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("check_url", &self.monitor.check_url().as_str())
            .field("current_version", &self.current_version)
            .field("check_interval", &self.check_interval)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
