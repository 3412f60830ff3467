//! Catalog and upgrade event system.

use tokio::sync::broadcast;

/// Events emitted by the catalog and the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new artifact was cataloged.
    ArtifactAdded {
        /// Artifact filename.
        filename: String,
        /// Parsed version.
        version: String,
    },

    /// The newest artifact changed.
    NewestChanged {
        /// Artifact filename.
        filename: String,
        /// Parsed version.
        version: String,
    },

    /// A newer, verified release is available.
    UpgradeAvailable {
        /// New version.
        version: String,
    },

    /// The new binary replaced the running executable.
    UpgradeApplied {
        /// New version.
        version: String,
    },

    /// The next generation of the process is running.
    ProcessLaunched {
        /// New version.
        version: String,
        /// Process id of the new process.
        pid: u32,
    },

    /// An update attempt failed and will be retried.
    UpgradeFailed {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving events.
pub type EventsChannel = broadcast::Receiver<Event>;

/// Sender for events.
pub type EventsSender = broadcast::Sender<Event>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (EventsSender, EventsChannel) {
    broadcast::channel(256)
}
