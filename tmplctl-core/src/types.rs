//! Domain types for task templates.
//!
//! A [`TemplateSpec`] is what the caller declares; a [`RegisteredTemplate`] is
//! the validated form with its destination resolved and its change policy
//! parsed. All types in the declaration layer serialize via serde so they can
//! live in job files next to the rest of the task definition.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Change policy
// ---------------------------------------------------------------------------

/// What happens to the task when a template's rendered content changes after
/// the task has started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    /// Rewrite the file, leave the task alone.
    Noop,
    /// Rewrite the file and deliver `change_signal` to the task.
    Signal,
    /// Rewrite the file and restart the task.
    #[default]
    Restart,
}

impl fmt::Display for ChangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeMode::Noop => "noop",
            ChangeMode::Signal => "signal",
            ChangeMode::Restart => "restart",
        };
        f.write_str(s)
    }
}

/// Validated change policy. The signal variant carries a parsed OS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePolicy {
    Noop,
    Signal(Signal),
    Restart,
}

impl ChangePolicy {
    pub fn mode(&self) -> ChangeMode {
        match self {
            ChangePolicy::Noop => ChangeMode::Noop,
            ChangePolicy::Signal(_) => ChangeMode::Signal,
            ChangePolicy::Restart => ChangeMode::Restart,
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateSpec
// ---------------------------------------------------------------------------

/// A template declared on a task.
///
/// Exactly one of `embedded_tmpl` and `source_path` must be set. `dest_path`
/// may reference task environment placeholders such as `${node.unique.id}`;
/// it is interpolated once, at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_tmpl: Option<String>,
    /// Template file, relative to the task directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub dest_path: String,
    #[serde(default)]
    pub change_mode: ChangeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_signal: Option<String>,
    /// Octal file mode such as `"0640"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perms: Option<String>,
}

impl TemplateSpec {
    /// A template whose contents are given inline.
    pub fn embedded(contents: impl Into<String>, dest_path: impl Into<String>) -> Self {
        Self {
            embedded_tmpl: Some(contents.into()),
            source_path: None,
            dest_path: dest_path.into(),
            change_mode: ChangeMode::default(),
            change_signal: None,
            perms: None,
        }
    }

    /// A template read from a file inside the task directory.
    pub fn from_source(source_path: impl Into<PathBuf>, dest_path: impl Into<String>) -> Self {
        Self {
            embedded_tmpl: None,
            source_path: Some(source_path.into()),
            dest_path: dest_path.into(),
            change_mode: ChangeMode::default(),
            change_signal: None,
            perms: None,
        }
    }

    pub fn noop(mut self) -> Self {
        self.change_mode = ChangeMode::Noop;
        self.change_signal = None;
        self
    }

    pub fn restart(mut self) -> Self {
        self.change_mode = ChangeMode::Restart;
        self.change_signal = None;
        self
    }

    pub fn signal(mut self, signal: impl Into<String>) -> Self {
        self.change_mode = ChangeMode::Signal;
        self.change_signal = Some(signal.into());
        self
    }

    pub fn with_perms(mut self, perms: impl Into<String>) -> Self {
        self.perms = Some(perms.into());
        self
    }
}

// ---------------------------------------------------------------------------
// RegisteredTemplate
// ---------------------------------------------------------------------------

/// Stable index of a template within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub usize);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template-{}", self.0)
    }
}

/// A validated template: source loaded, destination resolved to an absolute
/// path under the task directory, change policy parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredTemplate {
    pub id: TemplateId,
    pub contents: String,
    pub destination: PathBuf,
    pub policy: ChangePolicy,
    pub perms: Option<u32>,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// The client node the task is placed on. Feeds the `node.*`, `attr.*` and
/// `meta.*` placeholders of the task environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub datacenter: String,
    #[serde(default)]
    pub node_class: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}
