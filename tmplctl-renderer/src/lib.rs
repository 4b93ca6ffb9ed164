//! # tmplctl-renderer
//!
//! Tera-based template engine with store lookups.
//!
//! Templates call `key(path=...)`, `key_or_default(path=..., default=...)`
//! and `secret(path=..., field=...)`. Values come from a [`Snapshot`] of what
//! the watch session has fetched so far; every lookup is recorded as a
//! [`Dependency`] so the caller knows what to watch. A template that touches
//! a value not yet in the snapshot renders as [`RenderOutcome::Incomplete`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tmplctl_renderer::{Dependency, FetchedValue, RenderOutcome, Snapshot, TemplateEngine};
//! # fn demo(templates: &[tmplctl_core::RegisteredTemplate]) {
//! let mut engine = TemplateEngine::new(templates);
//! let mut snapshot = Snapshot::default();
//! snapshot.insert(Dependency::key("app/port"), FetchedValue::Key(Some("8080".into())));
//! let snapshot = Arc::new(snapshot);
//! for template in templates {
//!     if let RenderOutcome::Complete { content, .. } = engine.render(template.id, &snapshot) {
//!         println!("{}: {content}", template.destination.display());
//!     }
//! }
//! # }
//! ```

pub mod dependency;
pub mod engine;
pub mod error;

pub use dependency::{Dependency, FetchedValue, SecretData, Snapshot};
pub use engine::{RenderOutcome, TemplateEngine};
pub use error::RenderError;
