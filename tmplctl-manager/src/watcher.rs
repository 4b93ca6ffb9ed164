//! One watcher task per dependency.
//!
//! Watchers run the blocking store reads on the blocking pool and forward
//! every answer to the session as an [`Update`]. Retryable failures are
//! retried after the retry interval; anything else is reported once and the
//! watcher exits, leaving its templates incomplete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use tmplctl_renderer::{Dependency, FetchedValue};
use tmplctl_store::{KvBackend, SecretBackend, StoreError};

use crate::error::{ErrorSink, RenderFailure};

/// A fresh answer from a store.
#[derive(Debug)]
pub(crate) struct Update {
    pub dependency: Dependency,
    pub value: FetchedValue,
    /// Lease held for this value, if the secrets service issued one.
    pub lease_id: Option<String>,
}

/// Timing shared by every watcher of a session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub retry_interval: Duration,
    pub secret_refresh_interval: Duration,
    pub block_wait: Duration,
}

/// Everything a watcher needs besides its backend.
pub(crate) struct WatchContext {
    pub dependency: Dependency,
    pub timing: Timing,
    pub updates: mpsc::UnboundedSender<Update>,
    pub shutdown: broadcast::Receiver<()>,
    pub errors: ErrorSink,
}

impl WatchContext {
    fn send(&self, value: FetchedValue, lease_id: Option<String>) -> bool {
        self.updates
            .send(Update {
                dependency: self.dependency.clone(),
                value,
                lease_id,
            })
            .is_ok()
    }

    /// Handle a failed read. Returns `false` when the watcher must exit.
    async fn on_error(&mut self, error: StoreError) -> bool {
        if error.is_retryable() {
            tracing::warn!(
                dependency = %self.dependency,
                error = %error,
                retry_in_ms = self.timing.retry_interval.as_millis() as u64,
                "store read failed, retrying"
            );
            self.sleep(self.timing.retry_interval).await
        } else {
            self.errors.report(RenderFailure::Store {
                dependency: self.dependency.clone(),
                error,
            });
            false
        }
    }

    /// Sleep unless shut down first. Returns `false` on shutdown.
    async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.recv() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Run `read` on the blocking pool unless shut down first.
async fn blocking<T, F>(shutdown: &mut broadcast::Receiver<()>, read: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let task = tokio::task::spawn_blocking(read);
    tokio::select! {
        biased;
        _ = shutdown.recv() => None,
        joined = task => match joined {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(error = %err, "store read panicked");
                None
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Key watcher
// ---------------------------------------------------------------------------

pub(crate) async fn watch_key(kv: Arc<dyn KvBackend>, key: String, mut ctx: WatchContext) {
    let mut index = 0;
    tracing::debug!(key = %key, "watching key");

    loop {
        let read = {
            let kv = Arc::clone(&kv);
            let key = key.clone();
            let wait = ctx.timing.block_wait;
            let wait_index = index;
            move || kv.get(&key, wait_index, wait)
        };
        let started = Instant::now();
        let Some(result) = blocking(&mut ctx.shutdown, read).await else {
            return;
        };

        match result {
            Ok(entry) => {
                // Index 0 would turn every following read into a
                // non-blocking one.
                let reported = entry.index.max(1);
                if reported == index {
                    tracing::debug!(key = %key, index, "blocking query timed out");
                    // The store answered without waiting; back off instead
                    // of spinning.
                    if started.elapsed() < ctx.timing.block_wait
                        && !ctx.sleep(ctx.timing.retry_interval).await
                    {
                        return;
                    }
                    continue;
                }
                // An index that moves backwards means the store was reset;
                // start over with a non-blocking read.
                index = if reported < index { 0 } else { reported };
                tracing::debug!(key = %key, index = entry.index, present = entry.value.is_some(), "key updated");
                if !ctx.send(FetchedValue::Key(entry.value), None) {
                    return;
                }
            }
            Err(err) => {
                if !ctx.on_error(err).await {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Secret watcher
// ---------------------------------------------------------------------------

pub(crate) async fn watch_secret(
    secrets: Arc<dyn SecretBackend>,
    path: String,
    mut ctx: WatchContext,
) {
    tracing::debug!(path = %path, "watching secret");

    loop {
        let read = {
            let secrets = Arc::clone(&secrets);
            let path = path.clone();
            move || secrets.read(&path)
        };
        let Some(result) = blocking(&mut ctx.shutdown, read).await else {
            return;
        };

        let delay = match result {
            Ok(Some(secret)) => {
                let delay = secret.refresh_after(ctx.timing.secret_refresh_interval);
                if !ctx.send(FetchedValue::Secret(Some(secret.data)), secret.lease_id) {
                    return;
                }
                delay
            }
            Ok(None) => {
                tracing::debug!(path = %path, "secret absent");
                if !ctx.send(FetchedValue::Secret(None), None) {
                    return;
                }
                ctx.timing.retry_interval
            }
            Err(err) => {
                if ctx.on_error(err).await {
                    continue;
                }
                return;
            }
        };

        if !ctx.sleep(delay).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tmplctl_store::{KvEntry, MemoryKv, MemorySecrets};

    fn context(
        dependency: Dependency,
    ) -> (
        WatchContext,
        mpsc::UnboundedReceiver<Update>,
        mpsc::UnboundedReceiver<RenderFailure>,
        broadcast::Sender<()>,
    ) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let ctx = WatchContext {
            dependency,
            timing: Timing {
                retry_interval: Duration::from_millis(10),
                secret_refresh_interval: Duration::from_millis(20),
                block_wait: Duration::from_millis(100),
            },
            updates,
            shutdown: shutdown_rx,
            errors: ErrorSink::new(errors),
        };
        (ctx, updates_rx, errors_rx, shutdown)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn key_watcher_reports_absent_then_value() {
        let kv = Arc::new(MemoryKv::new());
        let (ctx, mut updates, _errors, shutdown) = context(Dependency::key("foo"));
        let task = tokio::spawn(watch_key(kv.clone(), "foo".into(), ctx));

        let first = updates.recv().await.unwrap();
        assert_eq!(first.value, FetchedValue::Key(None));

        kv.set("foo", "barbaz");
        let second = updates.recv().await.unwrap();
        assert_eq!(second.value, FetchedValue::Key(Some("barbaz".into())));

        shutdown.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn key_watcher_retries_transient_errors() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("foo", "bar");
        kv.fail_next(StoreError::Unavailable {
            service: "consul",
            message: "connection refused".into(),
        });
        let (ctx, mut updates, mut errors, shutdown) = context(Dependency::key("foo"));
        let task = tokio::spawn(watch_key(kv.clone(), "foo".into(), ctx));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.value, FetchedValue::Key(Some("bar".into())));
        assert!(errors.try_recv().is_err(), "transient errors are not reported");
        assert!(kv.reads() >= 2);

        shutdown.send(()).unwrap();
        task.await.unwrap();
    }

    /// Answers every read at once with index 0, ignoring the wait.
    #[derive(Default)]
    struct NonBlockingKv {
        reads: AtomicUsize,
    }

    impl KvBackend for NonBlockingKv {
        fn get(&self, _key: &str, _wait_index: u64, _wait: Duration) -> Result<KvEntry, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(KvEntry {
                index: 0,
                value: Some("bar".into()),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn key_watcher_backs_off_on_store_that_does_not_block() {
        let kv = Arc::new(NonBlockingKv::default());
        let (ctx, mut updates, _errors, shutdown) = context(Dependency::key("foo"));
        let task = tokio::spawn(watch_key(kv.clone(), "foo".into(), ctx));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.value, FetchedValue::Key(Some("bar".into())));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.send(()).unwrap();
        task.await.unwrap();

        // 10 ms retry interval over 200 ms; a spinning loop does thousands.
        let reads = kv.reads.load(Ordering::SeqCst);
        assert!(reads < 50, "{reads} reads");
        assert!(updates.try_recv().is_err(), "same index is not a change");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn secret_watcher_reports_fatal_error_once_and_exits() {
        let secrets = Arc::new(MemorySecrets::new());
        secrets.deny("secret/password");
        let (ctx, _updates, mut errors, _shutdown) = context(Dependency::secret("secret/password"));

        watch_secret(secrets, "secret/password".into(), ctx).await;

        let failure = errors.recv().await.unwrap();
        assert!(matches!(failure, RenderFailure::Store { .. }));
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn secret_watcher_forwards_leases() {
        let secrets = Arc::new(MemorySecrets::new());
        secrets.write_leased("db/creds/app", [("username", "v-app")], Duration::from_secs(60));
        let (ctx, mut updates, _errors, shutdown) = context(Dependency::secret("db/creds/app"));
        let task = tokio::spawn(watch_secret(secrets, "db/creds/app".into(), ctx));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.lease_id.as_deref(), Some("db/creds/app/1"));

        shutdown.send(()).unwrap();
        task.await.unwrap();
    }
}
