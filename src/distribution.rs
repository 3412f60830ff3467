//! HTTP distribution endpoint.
//!
//! - `GET /` returns the newest artifact descriptor as JSON, or 404 while
//!   the catalog is empty.
//! - `GET <prefix>/<filename>` streams the raw artifact bytes from the
//!   storage directory.

use crate::catalog::{Artifact, Catalog};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared state of the distribution handlers.
#[derive(Clone)]
pub struct DistributionState {
    catalog: Arc<Catalog>,
}

/// Build the distribution router over `catalog`.
///
/// `http_prefix` must be an absolute, non-root path; a trailing slash is
/// ignored.
#[must_use]
pub fn create_router(catalog: Arc<Catalog>, http_prefix: &str) -> Router {
    let prefix = http_prefix.trim_end_matches('/');
    let files = ServeDir::new(catalog.storage_dir());

    Router::new()
        .route("/", get(newest_artifact))
        .nest_service(prefix, files)
        .layer(TraceLayer::new_for_http())
        .with_state(DistributionState { catalog })
}

async fn newest_artifact(
    State(state): State<DistributionState>,
) -> Result<Json<Artifact>, StatusCode> {
    match state.catalog.newest() {
        Some(artifact) => Ok(Json(artifact)),
        None => {
            debug!("Descriptor requested while catalog is empty");
            Err(StatusCode::NOT_FOUND)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signature::{content_digest, decode_digest, Signer};
    use crate::testing::{spawn_endpoint, write_executable};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_catalog_is_not_found() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(Catalog::new(dir.path(), "/data", Signer::embedded().unwrap()));
        let endpoint = spawn_endpoint(catalog).await;

        let response = reqwest::get(endpoint.url("/")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serves_newest_descriptor() {
        let dir = TempDir::new().unwrap();
        write_executable(dir.path(), "svc.v1.0.0", b"one");
        write_executable(dir.path(), "svc.v1.2.0", b"one point two");
        let catalog = Arc::new(Catalog::new(dir.path(), "/data", Signer::embedded().unwrap()));
        catalog.scan_directory().unwrap();
        let endpoint = spawn_endpoint(Arc::clone(&catalog)).await;

        let response = reqwest::get(endpoint.url("/")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let descriptor: Artifact = response.json().await.unwrap();

        assert_eq!(descriptor.filename, "svc.v1.2.0");
        assert_eq!(descriptor.uri, "/data/svc.v1.2.0");
        assert_eq!(descriptor, catalog.newest().unwrap());
    }

    #[tokio::test]
    async fn test_serves_raw_artifact_bytes() {
        let dir = TempDir::new().unwrap();
        write_executable(dir.path(), "svc.v3", b"#!/bin/sh\necho three\n");
        let catalog = Arc::new(Catalog::new(dir.path(), "/data", Signer::embedded().unwrap()));
        catalog.scan_directory().unwrap();
        let endpoint = spawn_endpoint(Arc::clone(&catalog)).await;

        let descriptor = catalog.newest().unwrap();
        let bytes = reqwest::get(endpoint.url(&descriptor.uri))
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .bytes()
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"#!/bin/sh\necho three\n");
        assert_eq!(
            decode_digest(&descriptor.digest).unwrap(),
            content_digest(&bytes).to_vec()
        );
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(Catalog::new(dir.path(), "/data", Signer::embedded().unwrap()));
        let endpoint = spawn_endpoint(catalog).await;

        let response = reqwest::get(endpoint.url("/data/missing.v1")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
