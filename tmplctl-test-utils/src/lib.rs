//! Shared helpers for the tmplctl integration tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use nix::sys::signal::Signal;
use tracing_subscriber::{fmt, EnvFilter};

use tmplctl_core::Node;
use tmplctl_manager::TaskHooks;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Uses `with_test_writer()`, so output is only shown for failing tests.
/// Enable levels with e.g. `RUST_LOG=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A node with fixed identity, attributes and metadata.
pub fn mock_node() -> Node {
    Node {
        id: "2f8f3bc0-1f8c-4a47-9c5d-0c3c4a1d7e21".to_string(),
        name: "client-1".to_string(),
        datacenter: "dc1".to_string(),
        node_class: "linux-medium".to_string(),
        attributes: BTreeMap::from([
            ("kernel.name".to_string(), "linux".to_string()),
            ("arch".to_string(), "x86_64".to_string()),
        ]),
        meta: BTreeMap::from([("rack".to_string(), "r1".to_string())]),
    }
}

// ---------------------------------------------------------------------------
// MockTaskHooks
// ---------------------------------------------------------------------------

/// Everything the manager asked the task to do.
#[derive(Debug, Default, Clone)]
pub struct HookCalls {
    pub unblocks: usize,
    pub restarts: Vec<String>,
    pub signals: Vec<(Signal, String)>,
    pub kills: Vec<String>,
    pub sources: Vec<String>,
}

/// Records hook calls for later assertions.
#[derive(Debug, Default)]
pub struct MockTaskHooks {
    calls: Mutex<HookCalls>,
}

impl MockTaskHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> HookCalls {
        self.calls.lock().unwrap().clone()
    }

    pub fn unblocks(&self) -> usize {
        self.calls.lock().unwrap().unblocks
    }

    pub fn restarts(&self) -> usize {
        self.calls.lock().unwrap().restarts.len()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.calls
            .lock()
            .unwrap()
            .signals
            .iter()
            .map(|(signal, _)| *signal)
            .collect()
    }

    fn record(&self, source: &str, f: impl FnOnce(&mut HookCalls)) {
        let mut calls = self.calls.lock().unwrap();
        calls.sources.push(source.to_string());
        f(&mut calls);
    }
}

impl TaskHooks for MockTaskHooks {
    fn restart(&self, source: &str, reason: &str) {
        self.record(source, |c| c.restarts.push(reason.to_string()));
    }

    fn signal(&self, source: &str, reason: &str, signal: Signal) {
        self.record(source, |c| c.signals.push((signal, reason.to_string())));
    }

    fn kill(&self, source: &str, reason: &str) {
        self.record(source, |c| c.kills.push(reason.to_string()));
    }

    fn unblock_start(&self, source: &str) {
        self.record(source, |c| c.unblocks += 1);
    }
}
