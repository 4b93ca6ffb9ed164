//! The watch session: renders templates, starts watchers for what they
//! read, and re-renders when watchers deliver new values.
//!
//! Updates are coalesced. After the first update arrives every update
//! already queued is applied too, and then all templates are rendered once;
//! the complete ones go out as a single [`RenderEvent`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use tmplctl_core::{RegisteredTemplate, TemplateId};
use tmplctl_renderer::{Dependency, RenderError, RenderOutcome, Snapshot, TemplateEngine};
use tmplctl_store::{KvBackend, SecretBackend};
use tmplctl_sync::{RenderEvent, RenderedTemplate};

use crate::error::{ErrorSink, RenderFailure};
use crate::watcher::{self, Timing, Update, WatchContext};

/// Store clients available to a session. A missing backend turns every
/// template that needs it into a reported failure.
#[derive(Clone, Default)]
pub(crate) struct Backends {
    pub kv: Option<Arc<dyn KvBackend>>,
    pub secrets: Option<Arc<dyn SecretBackend>>,
}

pub(crate) struct WatchSession {
    templates: Arc<[RegisteredTemplate]>,
    engine: TemplateEngine,
    snapshot: Arc<Snapshot>,
    backends: Backends,
    timing: Timing,
    watched: HashSet<Dependency>,
    leases: HashMap<Dependency, String>,
    reported: HashMap<TemplateId, RenderError>,
    watchers: JoinSet<()>,
    events: mpsc::Sender<RenderEvent>,
    errors: ErrorSink,
    shutdown: broadcast::Sender<()>,
}

impl WatchSession {
    pub(crate) fn new(
        templates: Arc<[RegisteredTemplate]>,
        backends: Backends,
        timing: Timing,
        events: mpsc::Sender<RenderEvent>,
        errors: ErrorSink,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let engine = TemplateEngine::new(&templates);
        Self {
            templates,
            engine,
            snapshot: Arc::new(Snapshot::default()),
            backends,
            timing,
            watched: HashSet::new(),
            leases: HashMap::new(),
            reported: HashMap::new(),
            watchers: JoinSet::new(),
            events,
            errors,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let (update_tx, mut update_rx) = mpsc::unbounded_channel::<Update>();

        if self.render_pass(&update_tx, &mut shutdown_rx).await {
            loop {
                let first = tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    update = update_rx.recv() => match update {
                        Some(update) => update,
                        None => break,
                    },
                };

                let mut changed = self.apply(first);
                let mut coalesced = 1;
                while let Ok(update) = update_rx.try_recv() {
                    changed |= self.apply(update);
                    coalesced += 1;
                }
                tracing::debug!(updates = coalesced, changed, "watch session woke up");

                if changed && !self.render_pass(&update_tx, &mut shutdown_rx).await {
                    break;
                }
            }
        }

        self.watchers.shutdown().await;
        self.revoke_leases().await;
        tracing::debug!("watch session stopped");
    }

    /// Fold one update into the snapshot. Returns `true` if the value changed.
    fn apply(&mut self, update: Update) -> bool {
        if let Some(lease_id) = update.lease_id {
            if let Some(previous) = self.leases.insert(update.dependency.clone(), lease_id) {
                tracing::debug!(dependency = %update.dependency, lease = %previous, "lease replaced");
            }
        }
        Arc::make_mut(&mut self.snapshot).insert(update.dependency, update.value)
    }

    /// Render every template and emit the complete ones. Returns `false`
    /// when the session must stop.
    async fn render_pass(
        &mut self,
        update_tx: &mpsc::UnboundedSender<Update>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        let mut event = RenderEvent::default();
        let mut incomplete = 0;
        let templates = Arc::clone(&self.templates);

        for template in templates.iter() {
            let outcome = self.engine.render(template.id, &self.snapshot);
            for dependency in outcome.dependencies() {
                self.ensure_watched(dependency, template, update_tx);
            }

            match outcome {
                RenderOutcome::Complete {
                    content,
                    uses_secrets,
                    ..
                } => {
                    self.reported.remove(&template.id);
                    event.templates.push(RenderedTemplate {
                        id: template.id,
                        content: content.into_bytes(),
                        uses_secrets,
                    });
                }
                RenderOutcome::Incomplete { missing, .. } => {
                    incomplete += 1;
                    tracing::debug!(
                        template = %template.destination.display(),
                        missing = missing.len(),
                        "template waiting on data"
                    );
                }
                RenderOutcome::Failed { error, .. } => {
                    incomplete += 1;
                    if self.reported.get(&template.id) != Some(&error) {
                        self.reported.insert(template.id, error.clone());
                        self.errors.report(RenderFailure::Template {
                            destination: template.destination.clone(),
                            error,
                        });
                    }
                }
            }
        }

        tracing::debug!(complete = event.templates.len(), incomplete, "render pass finished");
        if event.templates.is_empty() {
            return true;
        }

        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    fn ensure_watched(
        &mut self,
        dependency: &Dependency,
        template: &RegisteredTemplate,
        update_tx: &mpsc::UnboundedSender<Update>,
    ) {
        if !self.watched.insert(dependency.clone()) {
            return;
        }

        let ctx = WatchContext {
            dependency: dependency.clone(),
            timing: self.timing,
            updates: update_tx.clone(),
            shutdown: self.shutdown.subscribe(),
            errors: self.errors.clone(),
        };

        match dependency {
            Dependency::Key(key) => match &self.backends.kv {
                Some(kv) => {
                    self.watchers
                        .spawn(watcher::watch_key(Arc::clone(kv), key.clone(), ctx));
                }
                None => self.not_configured(dependency, template, "consul"),
            },
            Dependency::Secret(path) => match &self.backends.secrets {
                Some(secrets) => {
                    self.watchers
                        .spawn(watcher::watch_secret(Arc::clone(secrets), path.clone(), ctx));
                }
                None => self.not_configured(dependency, template, "vault"),
            },
        }
    }

    fn not_configured(
        &self,
        dependency: &Dependency,
        template: &RegisteredTemplate,
        service: &'static str,
    ) {
        self.errors.report(RenderFailure::BackendNotConfigured {
            destination: template.destination.clone(),
            dependency: dependency.clone(),
            service,
        });
    }

    async fn revoke_leases(&mut self) {
        let Some(secrets) = self.backends.secrets.clone() else {
            return;
        };
        let leases: Vec<String> = self.leases.drain().map(|(_, lease)| lease).collect();
        if leases.is_empty() {
            return;
        }

        let revoked = tokio::task::spawn_blocking(move || {
            for lease in &leases {
                match secrets.revoke(lease) {
                    Ok(()) => tracing::debug!(lease = %lease, "lease revoked"),
                    Err(err) => tracing::warn!(lease = %lease, error = %err, "failed to revoke lease"),
                }
            }
        })
        .await;
        if let Err(err) = revoked {
            tracing::error!(error = %err, "lease revocation panicked");
        }
    }
}
