//! The task lifecycle as seen by the template manager.

use nix::sys::signal::Signal;

/// `source` passed to every hook call made by the manager.
pub const HOOK_SOURCE: &str = "template";

/// Lifecycle operations of the task the templates belong to.
///
/// Called from the manager's dispatcher task, one batch at a time. Calls
/// should return quickly; anything slow belongs on the implementor's side of
/// a channel.
pub trait TaskHooks: Send + Sync {
    /// Restart the task so it re-reads every rendered file.
    fn restart(&self, source: &str, reason: &str);

    /// Deliver `signal` to the task.
    fn signal(&self, source: &str, reason: &str, signal: Signal);

    /// Kill the task. The manager never calls this itself; it is part of the
    /// interface for callers reacting to reported failures.
    fn kill(&self, source: &str, reason: &str);

    /// Let the task start. Called at most once per manager.
    fn unblock_start(&self, source: &str);
}
