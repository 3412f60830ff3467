//! End-to-end scenarios: publish, verify, apply and hand over.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::harness::FOREIGN_SIGNING_KEY;
use super::TestHarness;
use handover::signature::content_digest;
use handover::upgrade::{ExecutableReplacer, ProcessLauncher};
use handover::{
    AttemptOutcome, Event, FailureKind, NodeBuilder, NodeConfig, NodeExit, Signer, Updater,
    Verifier,
};
use parking_lot::Mutex;
use semver::Version;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn node_config(listen_addr: SocketAddr, check_url: &str) -> NodeConfig {
    let mut config = NodeConfig {
        listen_addr,
        ..NodeConfig::default()
    };
    config.upgrade.check_url = check_url.to_string();
    config.upgrade.request_timeout_secs = 5;
    config
}

fn installed_binary(dir: &TempDir, content: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join("handover-node");
    std::fs::write(&path, content).unwrap();
    path
}

fn updater_for(check_url: &str, current: Version, target: &Path) -> Updater {
    let config = node_config("127.0.0.1:0".parse().unwrap(), check_url);
    Updater::new(
        &config.upgrade,
        current,
        Arc::new(Verifier::embedded().unwrap()),
    )
    .unwrap()
    .with_applier(Arc::new(ExecutableReplacer::new(target)))
    .with_check_interval(Duration::from_millis(50))
}

/// Greeting served on `addr`, or `None` if nothing answered.
async fn greeting(addr: SocketAddr) -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .ok()?
        .text()
        .await
        .ok()
}

/// Poll `addr` until its greeting names `version`.
async fn wait_for_version(addr: SocketAddr, version: &str) -> String {
    let needle = format!("Version {version}");
    for _ in 0..100 {
        if let Some(body) = greeting(addr).await {
            if body.contains(&needle) {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{addr} never served version {version}");
}

/// Counts launches without starting anything.
#[derive(Default)]
struct CountingLauncher {
    launches: AtomicU32,
}

impl ProcessLauncher for CountingLauncher {
    fn launch(&self) -> handover::Result<u32> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(std::process::id())
    }
}

/// Starts the next generation as an in-process node on the same address.
struct InProcessGeneration {
    addr: SocketAddr,
    version: Version,
    stop: watch::Receiver<bool>,
    running: Mutex<Option<JoinHandle<handover::Result<NodeExit>>>>,
}

impl ProcessLauncher for InProcessGeneration {
    fn launch(&self) -> handover::Result<u32> {
        let mut config = node_config(self.addr, "http://127.0.0.1:1");
        config.upgrade.enabled = false;
        let version = self.version.clone();
        let stop = self.stop.clone();

        let handle = tokio::spawn(async move {
            let node = NodeBuilder::new(config).with_version(version).build().await?;
            node.run_until(stop).await
        });
        *self.running.lock() = Some(handle);
        Ok(std::process::id())
    }
}

#[tokio::test]
async fn test_catalog_serves_signed_newest_release() {
    let harness = TestHarness::setup().await.expect("Failed to setup harness");
    assert!(harness.newest_descriptor().await.unwrap().is_none());

    harness.publish("svc.v1.0.0", b"one").unwrap();
    harness.publish("svc.v1.1.0", b"one point one").unwrap();
    harness.publish("svc.v0.9.9", b"older").unwrap();

    let descriptor = harness.newest_descriptor().await.unwrap().unwrap();
    assert_eq!(descriptor.version, Version::new(1, 1, 0));
    assert_eq!(descriptor.uri, "/data/svc.v1.1.0");

    Verifier::embedded()
        .unwrap()
        .verify(&descriptor.digest, &descriptor.signature)
        .unwrap();

    let bytes = reqwest::get(format!("{}{}", harness.base_url(), descriptor.uri))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"one point one");

    harness.teardown().await.expect("Failed to teardown");
}

#[tokio::test]
async fn test_periodic_scan_picks_up_new_release() {
    let harness = TestHarness::setup().await.expect("Failed to setup harness");
    harness.write_executable("svc.v3.0.0", b"three").unwrap();

    let mut found = None;
    for _ in 0..60 {
        if let Some(descriptor) = harness.newest_descriptor().await.unwrap() {
            found = Some(descriptor);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(found.unwrap().filename, "svc.v3.0.0");

    harness.teardown().await.expect("Failed to teardown");
}

#[tokio::test]
async fn test_unversioned_executable_stops_catalog_server() {
    let harness = TestHarness::setup().await.expect("Failed to setup harness");
    harness.write_executable("notes", b"no version here").unwrap();

    let err = tokio::time::timeout(Duration::from_secs(10), harness.join())
        .await
        .expect("server should stop on its own")
        .unwrap_err();
    assert!(matches!(err, handover::Error::Version(_)), "got {err:?}");
}

#[tokio::test]
async fn test_same_version_is_left_alone() {
    let harness = TestHarness::setup().await.expect("Failed to setup harness");
    harness.publish("svc.v1.0.0", b"one").unwrap();

    let install = TempDir::new().unwrap();
    let target = installed_binary(&install, b"running build");
    let launcher = Arc::new(CountingLauncher::default());
    let updater = updater_for(&harness.base_url(), Version::new(1, 0, 0), &target)
        .with_launcher(Arc::clone(&launcher) as Arc<dyn ProcessLauncher>);

    assert_eq!(updater.check_and_run().await.unwrap(), AttemptOutcome::NoUpdate);
    assert_eq!(std::fs::read(&target).unwrap(), b"running build");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);

    harness.teardown().await.expect("Failed to teardown");
}

#[tokio::test]
async fn test_release_from_untrusted_signer_is_rejected() {
    let foreign = Signer::from_pkcs1_der(FOREIGN_SIGNING_KEY).unwrap();
    let harness = TestHarness::setup_with_signer(foreign)
        .await
        .expect("Failed to setup harness");
    harness.publish("svc.v9.0.0", b"not from us").unwrap();

    let install = TempDir::new().unwrap();
    let target = installed_binary(&install, b"running build");
    let launcher = Arc::new(CountingLauncher::default());
    let updater = updater_for(&harness.base_url(), Version::new(1, 0, 0), &target)
        .with_launcher(Arc::clone(&launcher) as Arc<dyn ProcessLauncher>);

    let err = updater.check_and_run().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Verification);
    assert_eq!(std::fs::read(&target).unwrap(), b"running build");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);

    harness.teardown().await.expect("Failed to teardown");
}

#[tokio::test]
async fn test_altered_artifact_is_not_installed() {
    let harness = TestHarness::setup().await.expect("Failed to setup harness");
    harness.publish("svc.v2.0.0", b"signed bytes").unwrap();
    // Cataloged entries are never re-signed, so the descriptor goes stale.
    harness.write_executable("svc.v2.0.0", b"swapped bytes").unwrap();

    let install = TempDir::new().unwrap();
    let target = installed_binary(&install, b"running build");
    let launcher = Arc::new(CountingLauncher::default());
    let updater = updater_for(&harness.base_url(), Version::new(1, 0, 0), &target)
        .with_launcher(Arc::clone(&launcher) as Arc<dyn ProcessLauncher>);

    let err = updater.check_and_run().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Apply);
    assert_eq!(std::fs::read(&target).unwrap(), b"running build");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);

    harness.teardown().await.expect("Failed to teardown");
}

#[cfg(unix)]
#[tokio::test]
async fn test_two_generations_share_listen_address() {
    let mut config = node_config("127.0.0.1:0".parse().unwrap(), "http://127.0.0.1:1");
    config.upgrade.enabled = false;

    let old = NodeBuilder::new(config.clone())
        .with_version(Version::new(1, 0, 0))
        .build()
        .await
        .unwrap();
    let addr = old.local_addr().unwrap();

    config.listen_addr = addr;
    let new = NodeBuilder::new(config)
        .with_version(Version::new(1, 0, 1))
        .build()
        .await
        .expect("second generation should bind the same address");

    let (old_stop, old_rx) = watch::channel(false);
    let (new_stop, new_rx) = watch::channel(false);
    let old_running = tokio::spawn(old.run_until(old_rx));
    let new_running = tokio::spawn(new.run_until(new_rx));

    old_stop.send_replace(true);
    assert_eq!(old_running.await.unwrap().unwrap(), NodeExit::Stopped);

    let body = wait_for_version(addr, "1.0.1").await;
    assert!(body.starts_with(&format!("Hello from PID {}", std::process::id())));

    new_stop.send_replace(true);
    assert_eq!(new_running.await.unwrap().unwrap(), NodeExit::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_node_upgrades_and_hands_over() {
    let harness = TestHarness::setup().await.expect("Failed to setup harness");
    harness.publish("svc.v1.0.0", b"version one").unwrap();

    let install = TempDir::new().unwrap();
    let target = installed_binary(&install, b"version one");

    let config = node_config("127.0.0.1:0".parse().unwrap(), &harness.base_url());
    let node = NodeBuilder::new(config)
        .with_version(Version::new(1, 0, 0))
        .build()
        .await
        .unwrap();
    let addr = node.local_addr().unwrap();

    let (next_stop, next_rx) = watch::channel(false);
    let next = Arc::new(InProcessGeneration {
        addr,
        version: Version::new(2, 0, 0),
        stop: next_rx,
        running: Mutex::new(None),
    });
    let updater = updater_for(&harness.base_url(), Version::new(1, 0, 0), &target)
        .with_launcher(Arc::clone(&next) as Arc<dyn ProcessLauncher>);
    let node = node.with_updater(updater);
    let mut events = node.subscribe_events();

    let (_stop, stop_rx) = watch::channel(false);
    let running = tokio::spawn(node.run_until(stop_rx));
    wait_for_version(addr, "1.0.0").await;

    harness.publish("svc.v2.0.0", b"version two").unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("old generation should exit")
        .unwrap()
        .unwrap();
    assert_eq!(exit, NodeExit::HandedOver);
    assert_eq!(std::fs::read(&target).unwrap(), b"version two");

    wait_for_version(addr, "2.0.0").await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&Event::UpgradeApplied {
        version: "2.0.0".to_string()
    }));
    assert!(seen.contains(&Event::ProcessLaunched {
        version: "2.0.0".to_string(),
        pid: std::process::id()
    }));

    next_stop.send_replace(true);
    let handle = next.running.lock().take().expect("next generation started");
    assert_eq!(handle.await.unwrap().unwrap(), NodeExit::Stopped);

    assert_eq!(
        handover::signature::decode_digest(&harness.catalog().newest().unwrap().digest).unwrap(),
        content_digest(b"version two").to_vec()
    );
    harness.teardown().await.expect("Failed to teardown");
}
