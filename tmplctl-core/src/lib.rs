//! # tmplctl-core
//!
//! Domain types, task environment interpolation, configuration and
//! construction-time validation for the task template controller.

pub mod config;
pub mod env;
pub mod error;
pub mod types;
pub mod validate;

pub use config::{ConsulConfig, ControllerConfig, VaultConfig};
pub use env::TaskEnv;
pub use error::{ConfigError, ValidationError};
pub use types::{ChangeMode, ChangePolicy, Node, RegisteredTemplate, TemplateId, TemplateSpec};
pub use validate::{parse_signal, register_templates, resolve_destination};
