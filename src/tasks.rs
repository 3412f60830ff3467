//! Supervision of concurrent tasks under one shutdown signal.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

/// Resolve once shutdown has been requested or the signal's sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A group of tasks sharing one shutdown signal.
///
/// The first task to finish, cleanly or with an error, requests shutdown of
/// the rest. Tasks observe the signal only at their own wait points, so work
/// already in flight runs to completion.
pub struct TaskGroup {
    tasks: JoinSet<(&'static str, Result<()>)>,
    shutdown_tx: watch::Sender<bool>,
}

impl TaskGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            shutdown_tx,
        }
    }

    /// Spawn a task. `make` receives the group's shutdown signal.
    ///
    /// The task runs inside the caller's current span.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, make: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task = make(self.shutdown_tx.subscribe());
        self.tasks
            .spawn(async move { (name, task.await) }.in_current_span());
        debug!(task = name, "Task spawned");
    }

    /// Spawn a task that ends the group on Ctrl-C.
    pub fn spawn_ctrl_c(&mut self) {
        self.spawn("signal", |mut shutdown| async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Ctrl-C received, initiating shutdown");
                }
                () = shutdown_requested(&mut shutdown) => {}
            }
            Ok::<(), Error>(())
        });
    }

    /// Request shutdown of every task in the group.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for every task to finish.
    ///
    /// # Errors
    ///
    /// Returns the first error any task produced. A panicking task counts as
    /// an error.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error: Option<Error> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok((name, result)) => {
                    match &result {
                        Ok(()) => debug!(task = name, "Task finished"),
                        Err(e) => warn!(task = name, "Task failed: {e}"),
                    }
                    result
                }
                Err(e) => Err(Error::from(e)),
            };

            if let Err(e) = result {
                first_error.get_or_insert(e);
            }

            self.shutdown();
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}
