//! Shared listening sockets for process handover.
//!
//! Every generation of a service binds its address with `SO_REUSEADDR` and,
//! on Unix, `SO_REUSEPORT`. While an old and a new process overlap, both hold
//! a listener on the same address and the kernel spreads new connections
//! across them. The old process then stops accepting, drains in-flight
//! requests and exits.

use crate::error::Result;
use crate::tasks::shutdown_requested;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::info;

/// Pending-connection queue length for bound listeners.
const LISTEN_BACKLOG: u32 = 1024;

/// Bind a listener that a later process can bind again while this one lives.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the socket cannot be created, configured or bound.
pub fn bind_reuseport(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

/// Serve `router` on `listener` until shutdown is requested.
///
/// On shutdown the listener closes immediately and the call returns once
/// every in-flight request has completed.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
        .await?;

    info!("Stopped accepting on {addr}");
    Ok(())
}
