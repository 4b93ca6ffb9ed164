//! Error types for tmplctl-core.

use std::path::PathBuf;

use thiserror::Error;

/// Construction-time failures. The manager is never created when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid task hooks: missing task hook implementation")]
    MissingHooks,

    #[error("invalid config: missing controller config")]
    MissingConfig,

    #[error("invalid task directory: empty path")]
    EmptyTaskDir,

    #[error("invalid task environment: missing task environment")]
    MissingTaskEnv,

    #[error("failed to parse signal {signal:?}")]
    InvalidSignal { signal: String },

    #[error("template {dest:?} uses change mode signal but has no change signal")]
    MissingSignal { dest: String },

    #[error("template {dest:?} sets both an embedded template and a source path")]
    AmbiguousSource { dest: String },

    #[error("template {dest:?} has neither an embedded template nor a source path")]
    MissingSource { dest: String },

    #[error("template destination must not be empty")]
    EmptyDestination,

    #[error("template {dest:?} has invalid permissions {perms:?}")]
    InvalidPerms { dest: String, perms: String },

    #[error("unknown placeholder ${{{placeholder}}} in {input:?}")]
    UnknownPlaceholder { placeholder: String, input: String },

    #[error("unterminated placeholder in {input:?}")]
    UnterminatedPlaceholder { input: String },

    #[error("path {path:?} escapes the task directory")]
    EscapesTaskDir { path: String },

    #[error("multiple templates render to {path}")]
    DuplicateDestination { path: PathBuf },

    #[error("failed to read template source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures loading a [`crate::ControllerConfig`] from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
