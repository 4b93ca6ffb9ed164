//! [`TemplateManager`] and its builder.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use tmplctl_core::{
    register_templates, ControllerConfig, RegisteredTemplate, TaskEnv, TemplateSpec,
    ValidationError,
};
use tmplctl_store::{ConsulClient, KvBackend, SecretBackend, VaultClient};
use tmplctl_sync::{Tracker, WriteGate};

use crate::dispatcher;
use crate::error::{ErrorSink, ManagerError, RenderFailure};
use crate::hooks::TaskHooks;
use crate::session::{Backends, WatchSession};
use crate::watcher::Timing;

/// Capacity of the session → dispatcher event channel.
const EVENT_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the inputs of a [`TemplateManager`].
///
/// `build` checks the required inputs in a fixed order (hooks, config, task
/// directory, task environment) so the first missing one is reported, then
/// validates and registers the templates.
#[derive(Default)]
pub struct TemplateManagerBuilder {
    hooks: Option<Arc<dyn TaskHooks>>,
    templates: Vec<TemplateSpec>,
    already_rendered: bool,
    config: Option<ControllerConfig>,
    task_dir: Option<PathBuf>,
    task_env: Option<TaskEnv>,
    vault_token: Option<String>,
    kv: Option<Arc<dyn KvBackend>>,
    secrets: Option<Arc<dyn SecretBackend>>,
}

impl TemplateManagerBuilder {
    pub fn hooks(mut self, hooks: Arc<dyn TaskHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn templates(mut self, templates: impl IntoIterator<Item = TemplateSpec>) -> Self {
        self.templates = templates.into_iter().collect();
        self
    }

    /// The task was started by an earlier manager; never unblock it and
    /// treat first renders as changes.
    pub fn already_rendered(mut self, already_rendered: bool) -> Self {
        self.already_rendered = already_rendered;
        self
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn task_dir(mut self, task_dir: impl Into<PathBuf>) -> Self {
        self.task_dir = Some(task_dir.into());
        self
    }

    pub fn task_env(mut self, task_env: TaskEnv) -> Self {
        self.task_env = Some(task_env);
        self
    }

    /// Token for the secrets service. Overrides the token in the config.
    pub fn vault_token(mut self, token: impl Into<String>) -> Self {
        self.vault_token = Some(token.into());
        self
    }

    /// Read keys from `kv` instead of the configured key-value store.
    pub fn kv_backend(mut self, kv: Arc<dyn KvBackend>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Read secrets from `secrets` instead of the configured secrets service.
    pub fn secret_backend(mut self, secrets: Arc<dyn SecretBackend>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn build(self) -> Result<TemplateManager, ManagerError> {
        let hooks = self.hooks.ok_or(ValidationError::MissingHooks)?;
        let config = self.config.ok_or(ValidationError::MissingConfig)?;
        let task_dir = self
            .task_dir
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or(ValidationError::EmptyTaskDir)?;
        let task_env = self.task_env.ok_or(ValidationError::MissingTaskEnv)?;

        let templates = register_templates(&self.templates, &task_dir, &task_env)?;

        let kv = self.kv.or_else(|| {
            config.consul.as_ref().map(|consul| {
                Arc::new(ConsulClient::new(consul, config.block_wait())) as Arc<dyn KvBackend>
            })
        });
        let vault_token = self.vault_token;
        let secrets = self.secrets.or_else(|| {
            config.vault.as_ref().map(|vault| {
                let token = vault_token
                    .clone()
                    .or_else(|| vault.token.clone())
                    .unwrap_or_default();
                Arc::new(VaultClient::new(vault, token)) as Arc<dyn SecretBackend>
            })
        });

        tracing::debug!(
            templates = templates.len(),
            task_dir = %task_dir.display(),
            already_rendered = self.already_rendered,
            "template manager built"
        );

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Ok(TemplateManager {
            hooks,
            templates: templates.into(),
            already_rendered: self.already_rendered,
            backends: Backends { kv, secrets },
            timing: Timing {
                retry_interval: config.retry_interval(),
                secret_refresh_interval: config.secret_refresh_interval(),
                block_wait: config.block_wait(),
            },
            stop_timeout: config.stop_timeout(),
            errors: ErrorSink::new(errors_tx),
            errors_rx: Mutex::new(Some(errors_rx)),
            state: Mutex::new(Lifecycle::Created),
        })
    }
}

// ---------------------------------------------------------------------------
// TemplateManager
// ---------------------------------------------------------------------------

enum Lifecycle {
    Created,
    Running(Running),
    Stopped,
}

struct Running {
    shutdown: broadcast::Sender<()>,
    gate: WriteGate,
    session: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Renders a task's templates and keeps them current.
///
/// `Created → Running → Stopped`; a stopped manager cannot be started again.
pub struct TemplateManager {
    hooks: Arc<dyn TaskHooks>,
    templates: Arc<[RegisteredTemplate]>,
    already_rendered: bool,
    backends: Backends,
    timing: Timing,
    stop_timeout: std::time::Duration,
    errors: ErrorSink,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<RenderFailure>>>,
    state: Mutex<Lifecycle>,
}

impl TemplateManager {
    pub fn builder() -> TemplateManagerBuilder {
        TemplateManagerBuilder::default()
    }

    /// The validated templates, in registration order.
    pub fn templates(&self) -> &[RegisteredTemplate] {
        &self.templates
    }

    /// Take the receiving end of the failure channel. Returns `None` after
    /// the first call.
    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<RenderFailure>> {
        lock(&self.errors_rx).take()
    }

    /// Launch the watch session and the dispatcher on the current tokio
    /// runtime. Returns without waiting for anything to render.
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut state = lock(&self.state);
        match *state {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => return Err(ManagerError::AlreadyStarted),
            Lifecycle::Stopped => return Err(ManagerError::AlreadyStopped),
        }
        let runtime =
            Handle::try_current().map_err(|err| ManagerError::NoRuntime(err.to_string()))?;

        let (shutdown, _) = broadcast::channel::<()>(4);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let gate = WriteGate::new();
        let tracker = Tracker::new(&self.templates, self.already_rendered);
        let dispatcher = runtime.spawn(dispatcher::run(
            tracker,
            Arc::clone(&self.hooks),
            events_rx,
            shutdown.subscribe(),
            gate.clone(),
            self.errors.clone(),
        ));

        let session = WatchSession::new(
            Arc::clone(&self.templates),
            self.backends.clone(),
            self.timing,
            events_tx,
            self.errors.clone(),
            shutdown.clone(),
        );
        let session = runtime.spawn(session.run());

        tracing::info!(templates = self.templates.len(), "template manager started");
        *state = Lifecycle::Running(Running {
            shutdown,
            gate,
            session,
            dispatcher,
        });
        Ok(())
    }

    /// Stop rendering. Once this returns no file is written and no hook is
    /// called by this manager. Calling it again is a no-op.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), Lifecycle::Stopped);
        let Lifecycle::Running(mut running) = previous else {
            return;
        };

        let _ = running.shutdown.send(());
        let joined = tokio::time::timeout(self.stop_timeout, async {
            handle_join("watch session", (&mut running.session).await);
            handle_join("dispatcher", (&mut running.dispatcher).await);
        })
        .await;

        if joined.is_err() {
            tracing::warn!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "background tasks did not stop in time, aborting"
            );
            running.session.abort();
            running.dispatcher.abort();
        }

        // An aborted dispatcher may still have a write running on the
        // blocking pool; wait it out and refuse anything after it.
        let gate = running.gate.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || gate.close()).await {
            tracing::error!(error = %err, "closing the write gate failed");
            running.gate.close();
        }
        tracing::info!("template manager stopped");
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.state), Lifecycle::Running(_))
    }
}

impl Drop for TemplateManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Running(running) = state {
            let _ = running.shutdown.send(());
            running.dispatcher.abort();
            running.gate.close();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn handle_join(task: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            tracing::error!(task, error = %err, "background task panicked");
        }
    }
}
