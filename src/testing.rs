//! Helpers shared by unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::catalog::Catalog;
use crate::distribution::create_router;
use crate::listener::{bind_reuseport, serve};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Write `content` to `dir/name` with the executable bits set.
pub fn write_executable(dir: &Path, name: &str, content: &[u8]) {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// A distribution endpoint on an ephemeral port. Stops when dropped.
pub struct TestEndpoint {
    pub addr: SocketAddr,
    _shutdown_tx: watch::Sender<bool>,
}

impl TestEndpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// Serve `catalog` under `/data` on an ephemeral port.
pub async fn spawn_endpoint(catalog: Arc<Catalog>) -> TestEndpoint {
    let listener = bind_reuseport("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve(listener, create_router(catalog, "/data"), shutdown_rx));
    TestEndpoint {
        addr,
        _shutdown_tx: shutdown_tx,
    }
}
