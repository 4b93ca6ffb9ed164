//! # tmplctl-manager
//!
//! Renders a task's templates from static text, key-value store entries and
//! secrets into the task directory, gates the task's start on the first
//! complete render, and signals or restarts the task when rendered content
//! changes.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tmplctl_core::{ConsulConfig, ControllerConfig, TaskEnv, TemplateSpec};
//! use tmplctl_manager::{TaskHooks, TemplateManager};
//!
//! # async fn demo(hooks: Arc<dyn TaskHooks>) -> Result<(), tmplctl_manager::ManagerError> {
//! let manager = TemplateManager::builder()
//!     .hooks(hooks)
//!     .templates([TemplateSpec::embedded(r#"port={{ key(path="app/port") }}"#, "local/app.conf").signal("SIGHUP")])
//!     .config(ControllerConfig::default().with_consul(ConsulConfig::new("127.0.0.1:8500")))
//!     .task_dir("/alloc/web")
//!     .task_env(TaskEnv::new())
//!     .build()?;
//! manager.start()?;
//! // ...
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

mod dispatcher;
pub mod error;
pub mod hooks;
pub mod manager;
mod session;
mod watcher;

pub use error::{ManagerError, RenderFailure};
pub use hooks::{TaskHooks, HOOK_SOURCE};
pub use manager::{TemplateManager, TemplateManagerBuilder};

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
