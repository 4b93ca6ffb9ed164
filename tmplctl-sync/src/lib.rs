//! # tmplctl-sync
//!
//! Everything between a finished render and the task: content
//! fingerprints, the atomic destination writer, and the [`Tracker`] that
//! turns batches of renders into hook actions.
//!
//! The tracker is synchronous and does no I/O of its own; the caller hands
//! it a write function (normally [`write_rendered`]) and executes the
//! returned [`HookAction`]s.

pub mod error;
pub mod fingerprint;
pub mod tracker;
pub mod writer;

pub use error::SyncError;
pub use fingerprint::Fingerprint;
pub use tracker::{
    BatchOutcome, HookAction, RenderEvent, RenderRecord, RenderedTemplate, Tracker, WriteFailure,
};
pub use writer::{
    file_mode, write_rendered, WriteGate, WriteStatus, DEFAULT_MODE, SECRET_MODE,
};
