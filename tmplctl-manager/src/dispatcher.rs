//! Applies render events to the task directory and calls the task hooks.
//!
//! Runs as a single task that owns the [`Tracker`]; each event is handled
//! completely, hook calls included, before the next one is received. Files
//! are written through a [`WriteGate`] the manager closes on stop.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;

use tmplctl_sync::{HookAction, RenderEvent, Tracker, WriteGate};

use crate::error::{ErrorSink, RenderFailure};
use crate::hooks::{TaskHooks, HOOK_SOURCE};

pub(crate) async fn run(
    mut tracker: Tracker,
    hooks: Arc<dyn TaskHooks>,
    mut events: mpsc::Receiver<RenderEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
    gate: WriteGate,
    errors: ErrorSink,
) {
    execute(hooks.as_ref(), tracker.on_start());

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let gate = gate.clone();
        let applied = tokio::task::spawn_blocking(move || {
            let write = |path: &Path, content: &[u8], mode: u32| gate.write(path, content, mode);
            let outcome = tracker.apply(&event, write);
            (tracker, outcome)
        })
        .await;
        let outcome = match applied {
            Ok((returned, outcome)) => {
                tracker = returned;
                outcome
            }
            Err(err) => {
                tracing::error!(error = %err, "render event handling panicked");
                break;
            }
        };

        // Files written while stopping are already on disk; the task must
        // not hear about them.
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        for failure in outcome.write_errors {
            errors.report(RenderFailure::Write {
                destination: failure.destination,
                message: failure.error.to_string(),
            });
        }
        execute(hooks.as_ref(), outcome.actions);
    }

    tracing::debug!("dispatcher stopped");
}

fn execute(hooks: &dyn TaskHooks, actions: Vec<HookAction>) {
    for action in actions {
        match action {
            HookAction::UnblockStart => {
                tracing::info!("unblocking task start");
                hooks.unblock_start(HOOK_SOURCE);
            }
            HookAction::Restart { reason } => {
                tracing::info!(reason = %reason, "restarting task");
                hooks.restart(HOOK_SOURCE, &reason);
            }
            HookAction::Signal { signal, reason } => {
                tracing::info!(signal = %signal, reason = %reason, "signalling task");
                hooks.signal(HOOK_SOURCE, &reason, signal);
            }
        }
    }
}
