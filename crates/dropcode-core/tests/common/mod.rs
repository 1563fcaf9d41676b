//! Common test utilities for `Dropcode` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use dropcode_core::code::PeerId;
use dropcode_core::file::DownloadDir;
use dropcode_core::session::{Session, SessionConfig, SessionEvent};
use dropcode_core::transport::{MemoryEndpoint, MemoryHub, Transport};
use tokio::sync::broadcast;

/// Base port for tests, incremented for each test to avoid conflicts.
static TEST_PORT_COUNTER: AtomicU16 = AtomicU16::new(52600);

/// How long a test waits for something to happen before failing.
pub const WAIT: Duration = Duration::from_secs(5);

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &std::path::Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Get a unique discovery port so parallel tests don't answer each other.
pub fn get_test_port() -> u16 {
    TEST_PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Parse a peer ID that is known to be valid.
pub fn peer(id: &str) -> PeerId {
    PeerId::parse(id).expect("valid peer id")
}

/// Start an in-memory session registered under `id`.
pub fn memory_session(
    hub: &MemoryHub,
    id: &str,
    sink: Option<DownloadDir>,
) -> Session<MemoryEndpoint> {
    let endpoint = hub.register(peer(id)).expect("Failed to register endpoint");
    Session::start(endpoint, SessionConfig::default(), sink)
}

/// Poll `condition` until it holds, failing the test after [`WAIT`].
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not met in time");
}

/// Wait until `session` has `count` registered peers.
pub async fn wait_for_peers<T: Transport>(session: &Session<T>, count: usize) {
    eventually(|| async move { session.peer_count().await == count }).await;
}

/// Wait for the next event matching `matches`, skipping others.
pub async fn next_event<F>(events: &mut broadcast::Receiver<SessionEvent>, mut matches: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("Event channel closed"),
            }
        }
    })
    .await
    .expect("Event not received in time")
}

/// Wait for the next received file.
pub async fn next_received_file(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> (PeerId, std::sync::Arc<dropcode_core::transfer::ReceivedFile>, Option<PathBuf>) {
    match next_event(events, |e| matches!(e, SessionEvent::FileReceived { .. })).await {
        SessionEvent::FileReceived {
            from,
            file,
            saved_to,
        } => (from, file, saved_to),
        _ => unreachable!(),
    }
}
