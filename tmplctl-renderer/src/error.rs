//! Error types for tmplctl-renderer.

use thiserror::Error;

use tmplctl_core::TemplateId;

/// Non-retryable template failures. Missing data is not an error; see
/// [`crate::RenderOutcome::Incomplete`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The template text does not parse.
    #[error("failed to parse {template}: {message}")]
    Parse { template: TemplateId, message: String },

    /// The template parsed but evaluation failed with all data present.
    #[error("failed to render {template}: {message}")]
    Execute { template: TemplateId, message: String },
}

/// Flatten a tera error and its sources into one line.
pub(crate) fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
