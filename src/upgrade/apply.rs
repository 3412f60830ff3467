//! Replacing the executable on disk.

use crate::error::{Error, Result};
use crate::signature::content_digest;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Installs a downloaded binary.
pub trait BinaryApplier: Send + Sync {
    /// Check `binary` against `expected_digest` and install it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Apply`] on a checksum mismatch or if installation
    /// fails. A failed apply must leave the current installation intact.
    fn apply(&self, binary: &[u8], expected_digest: &[u8]) -> Result<()>;
}

/// Atomically replaces an executable file.
///
/// The new contents are staged in a temporary file next to the target,
/// flushed to disk and renamed over it, so readers see either the old or the
/// new file and never a partial one.
#[derive(Debug, Clone)]
pub struct ExecutableReplacer {
    target: PathBuf,
}

impl ExecutableReplacer {
    /// Create a replacer for `target`.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Create a replacer for the running executable.
    ///
    /// Resolve this before any replacement happens: afterwards the running
    /// image no longer names the file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable path cannot be determined.
    pub fn current_executable() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Get the replaced path.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    fn staging_dir(&self) -> &Path {
        match self.target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

impl BinaryApplier for ExecutableReplacer {
    fn apply(&self, binary: &[u8], expected_digest: &[u8]) -> Result<()> {
        let actual = content_digest(binary);
        if actual.as_slice() != expected_digest {
            return Err(Error::Apply(format!(
                "checksum mismatch: expected {}, got {}",
                hex::encode(expected_digest),
                hex::encode(actual)
            )));
        }

        let target = self.target.display();
        let apply_err =
            |what: &str, e: std::io::Error| Error::Apply(format!("{what} for {target}: {e}"));

        let mut staged = tempfile::Builder::new()
            .prefix(".handover-")
            .tempfile_in(self.staging_dir())
            .map_err(|e| apply_err("failed to stage binary", e))?;
        staged
            .write_all(binary)
            .map_err(|e| apply_err("failed to write binary", e))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| apply_err("failed to flush binary", e))?;

        let permissions = match fs::metadata(&self.target) {
            Ok(metadata) => metadata.permissions(),
            Err(_) => default_permissions(staged.path())?,
        };
        fs::set_permissions(staged.path(), permissions)
            .map_err(|e| apply_err("failed to set permissions", e))?;

        staged
            .persist(&self.target)
            .map_err(|e| apply_err("failed to replace executable", e.error))?;

        info!("Replaced {} ({} bytes)", target, binary.len());
        Ok(())
    }
}

#[cfg(unix)]
fn default_permissions(_staged: &Path) -> Result<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn default_permissions(staged: &Path) -> Result<fs::Permissions> {
    Ok(fs::metadata(staged)?.permissions())
}
