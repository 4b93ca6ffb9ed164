//! Error types for tmplctl-manager.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;

use tmplctl_core::ValidationError;
use tmplctl_renderer::{Dependency, RenderError};
use tmplctl_store::StoreError;

/// Errors returned synchronously by the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("template manager already started")]
    AlreadyStarted,

    #[error("template manager already stopped")]
    AlreadyStopped,

    #[error("template manager must be started inside a tokio runtime: {0}")]
    NoRuntime(String),
}

/// A failure that stops one template or dependency from making progress.
///
/// Delivered on the channel returned by
/// [`crate::TemplateManager::take_errors`]. The manager keeps running; it is
/// up to the receiver to decide whether the task should be killed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderFailure {
    #[error("template {}: {error}", .destination.display())]
    Template {
        destination: PathBuf,
        error: RenderError,
    },

    #[error("{dependency}: {error}")]
    Store {
        dependency: Dependency,
        error: StoreError,
    },

    #[error("template {} reads {dependency} but no {service} is configured", .destination.display())]
    BackendNotConfigured {
        destination: PathBuf,
        dependency: Dependency,
        service: &'static str,
    },

    #[error("failed to write {}: {message}", .destination.display())]
    Write {
        destination: PathBuf,
        message: String,
    },
}

/// Sending half of the error channel. Every report is logged as well, so
/// nothing is lost when the receiver was never taken.
#[derive(Debug, Clone)]
pub(crate) struct ErrorSink {
    tx: mpsc::UnboundedSender<RenderFailure>,
}

impl ErrorSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RenderFailure>) -> Self {
        Self { tx }
    }

    pub(crate) fn report(&self, failure: RenderFailure) {
        tracing::error!(error = %failure, "template failure");
        let _ = self.tx.send(failure);
    }
}
