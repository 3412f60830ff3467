//! Starting the next generation of the process.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Starts a replacement process.
pub trait ProcessLauncher: Send + Sync {
    /// Start the process without waiting for it and return its pid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if the process could not be started.
    fn launch(&self) -> Result<u32>;
}

/// Re-executes a program with a fixed argument list.
///
/// The child inherits the environment and standard streams and runs in the
/// configured working directory. It is not waited on and outlives this
/// process.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: PathBuf,
}

impl CommandLauncher {
    /// Create a launcher for `program` with `args`, run from the current
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Result<Self> {
        Ok(Self {
            program: program.into(),
            args,
            working_dir: std::env::current_dir()?,
        })
    }

    /// Create a launcher that restarts the running executable with its
    /// original arguments.
    ///
    /// Resolve this at startup: once the executable has been replaced the
    /// running image no longer names the file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable path or current directory cannot be
    /// determined.
    pub fn current_process() -> Result<Self> {
        Self::new(std::env::current_exe()?, std::env::args_os().skip(1).collect())
    }

    /// Run the child from `dir` instead.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self) -> Result<u32> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::Launch(format!("failed to start {}: {e}", self.program.display()))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Launch("process exited before its pid was read".to_string()))?;

        info!("Started {} with pid {pid}", self.program.display());
        Ok(pid)
    }
}
