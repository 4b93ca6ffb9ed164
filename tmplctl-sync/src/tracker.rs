//! Render state tracking and change-policy dispatch.
//!
//! [`Tracker`] owns one [`RenderRecord`] per template. Each
//! [`RenderEvent`] is applied as a unit:
//!
//! 1. Unchanged content of an already rendered template is dropped.
//! 2. Everything else is written. A write error leaves the record as it was.
//! 3. A first render counts towards the start gate. In reattach mode it also
//!    counts as a change when it altered the destination, since the task is
//!    already running on whatever the previous manager wrote.
//! 4. Changed templates are dispatched once the task has been unblocked:
//!    one restart for the whole batch if any of them restarts, otherwise one
//!    signal per signal-mode template. Noop templates never produce actions.
//!
//! `apply` is synchronous and does no I/O besides calling `write`.

use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;

use tmplctl_core::{ChangePolicy, RegisteredTemplate, TemplateId};

use crate::error::SyncError;
use crate::fingerprint::Fingerprint;
use crate::writer::{file_mode, WriteStatus};

// ---------------------------------------------------------------------------
// Events and actions
// ---------------------------------------------------------------------------

/// One finished render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub id: TemplateId,
    pub content: Vec<u8>,
    pub uses_secrets: bool,
}

impl RenderedTemplate {
    pub fn new(id: TemplateId, content: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            content: content.into(),
            uses_secrets: false,
        }
    }
}

/// Renders that completed in the same pass of the watch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderEvent {
    pub templates: Vec<RenderedTemplate>,
}

/// Something the task hooks must be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    UnblockStart,
    Restart { reason: String },
    Signal { signal: Signal, reason: String },
}

#[derive(Debug)]
pub struct WriteFailure {
    pub id: TemplateId,
    pub destination: PathBuf,
    pub error: SyncError,
}

/// What applying one [`RenderEvent`] did.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Actions to run, in order.
    pub actions: Vec<HookAction>,
    pub write_errors: Vec<WriteFailure>,
    pub written: Vec<TemplateId>,
    pub unchanged: Vec<TemplateId>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderRecord {
    /// Fingerprint of the last successfully written content.
    pub fingerprint: Option<Fingerprint>,
    pub rendered_once: bool,
}

#[derive(Debug)]
struct Tracked {
    destination: PathBuf,
    policy: ChangePolicy,
    perms: Option<u32>,
    record: RenderRecord,
}

#[derive(Debug)]
pub struct Tracker {
    templates: Vec<Tracked>,
    reattach: bool,
    all_rendered: bool,
}

impl Tracker {
    /// `reattach` means the task was started by an earlier manager and must
    /// never be unblocked again.
    pub fn new(templates: &[RegisteredTemplate], reattach: bool) -> Self {
        let templates = templates
            .iter()
            .map(|t| Tracked {
                destination: t.destination.clone(),
                policy: t.policy,
                perms: t.perms,
                record: RenderRecord::default(),
            })
            .collect();
        Self {
            templates,
            reattach,
            all_rendered: false,
        }
    }

    /// Actions due before any render arrives: with no templates there is
    /// nothing to wait for.
    pub fn on_start(&mut self) -> Vec<HookAction> {
        if !self.templates.is_empty() || self.all_rendered {
            return Vec::new();
        }
        self.all_rendered = true;
        if self.reattach {
            Vec::new()
        } else {
            vec![HookAction::UnblockStart]
        }
    }

    /// Whether every template has been written at least once.
    pub fn all_rendered(&self) -> bool {
        self.all_rendered
    }

    pub fn record(&self, id: TemplateId) -> Option<&RenderRecord> {
        self.templates.get(id.0).map(|t| &t.record)
    }

    /// Apply one batch of renders, writing through `write(path, content, mode)`.
    pub fn apply<W>(&mut self, event: &RenderEvent, mut write: W) -> BatchOutcome
    where
        W: FnMut(&Path, &[u8], u32) -> Result<WriteStatus, SyncError>,
    {
        let dispatch = self.reattach || self.all_rendered;
        let mut outcome = BatchOutcome::default();
        let mut changed: Vec<usize> = Vec::new();

        for rendered in &event.templates {
            let Some(tracked) = self.templates.get_mut(rendered.id.0) else {
                tracing::warn!(template = %rendered.id, "render for unknown template dropped");
                continue;
            };

            let fingerprint = Fingerprint::of(&rendered.content);
            let record = &mut tracked.record;
            if record.rendered_once && record.fingerprint.as_ref() == Some(&fingerprint) {
                tracing::debug!(template = %tracked.destination.display(), "render unchanged");
                outcome.unchanged.push(rendered.id);
                continue;
            }

            let mode = file_mode(tracked.perms, rendered.uses_secrets);
            let status = match write(&tracked.destination, &rendered.content, mode) {
                Ok(status) => status,
                Err(error) => {
                    tracing::error!(template = %tracked.destination.display(), error = %error, "write failed");
                    outcome.write_errors.push(WriteFailure {
                        id: rendered.id,
                        destination: tracked.destination.clone(),
                        error,
                    });
                    continue;
                }
            };

            let first = !record.rendered_once;
            record.rendered_once = true;
            record.fingerprint = Some(fingerprint);
            if status == WriteStatus::Unchanged {
                tracing::debug!(template = %tracked.destination.display(), "destination already current");
                outcome.unchanged.push(rendered.id);
                continue;
            }
            outcome.written.push(rendered.id);

            if !first || self.reattach {
                changed.push(rendered.id.0);
            }
        }

        if !self.all_rendered && self.templates.iter().all(|t| t.record.rendered_once) {
            self.all_rendered = true;
            if !self.reattach {
                tracing::info!("all templates rendered");
                outcome.actions.push(HookAction::UnblockStart);
            }
        }

        if dispatch {
            outcome.actions.extend(self.dispatch(&changed));
        } else if !changed.is_empty() {
            tracing::debug!(count = changed.len(), "task not started yet, change not dispatched");
        }

        outcome
    }

    fn dispatch(&self, changed: &[usize]) -> Vec<HookAction> {
        let restarts: Vec<String> = changed
            .iter()
            .map(|&i| &self.templates[i])
            .filter(|t| matches!(t.policy, ChangePolicy::Restart))
            .map(|t| t.destination.display().to_string())
            .collect();
        if !restarts.is_empty() {
            return vec![HookAction::Restart {
                reason: format!(
                    "template with change_mode restart re-rendered: {}",
                    restarts.join(", ")
                ),
            }];
        }

        changed
            .iter()
            .map(|&i| &self.templates[i])
            .filter_map(|t| match t.policy {
                ChangePolicy::Signal(signal) => Some(HookAction::Signal {
                    signal,
                    reason: format!("template re-rendered: {}", t.destination.display()),
                }),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
