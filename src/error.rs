//! Error types for handover.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while cataloging, distributing or applying releases.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A filename does not carry a parseable version marker.
    #[error("Version error: {0}")]
    Version(String),

    /// A release descriptor could not be decoded or is unusable.
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    /// Transport failure talking to the distribution endpoint.
    #[error("Network error: {0}")]
    Network(String),

    /// Key loading or signing failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A digest/signature pair did not verify.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Replacing the executable failed, including checksum mismatch.
    #[error("Apply failed: {0}")]
    Apply(String),

    /// The replacement process could not be started.
    #[error("Launch failed: {0}")]
    Launch(String),

    /// A supervised task panicked or was aborted.
    #[error("Task failed: {0}")]
    Task(String),
}

/// Coarse classification of an error, used by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Transport-level failure.
    Network,
    /// The descriptor was malformed or its version unusable.
    VersionCheck,
    /// The signature did not verify.
    Verification,
    /// The new binary could not be applied.
    Apply,
    /// The new process could not be started.
    Run,
    /// Anything else (I/O, configuration, crypto setup).
    Other,
}

impl Error {
    /// Classify this error for retry decisions.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(_) => FailureKind::Network,
            Self::Descriptor(_) | Self::Version(_) => FailureKind::VersionCheck,
            Self::Verification(_) => FailureKind::Verification,
            Self::Apply(_) => FailureKind::Apply,
            Self::Launch(_) => FailureKind::Run,
            Self::Io(_) | Self::Config(_) | Self::Crypto(_) | Self::Task(_) => FailureKind::Other,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Descriptor(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
