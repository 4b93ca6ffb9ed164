//! Atomic destination writer.
//!
//! Rendered content goes to `<dest>.tmplctl.tmp` first and is renamed over
//! the destination, so the task never sees a half-written file. Missing
//! parent directories are created. A destination that already holds the
//! rendered bytes is left in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{io_err, SyncError};

/// Mode for rendered files that did not read any secret.
pub const DEFAULT_MODE: u32 = 0o644;
/// Mode for rendered files that read at least one secret.
pub const SECRET_MODE: u32 = 0o600;

/// Whether a write touched the destination's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    /// The destination already held exactly these bytes.
    Unchanged,
}

/// Mode to write a rendered file with. Explicit `perms` always win.
pub fn file_mode(perms: Option<u32>, uses_secrets: bool) -> u32 {
    match perms {
        Some(mode) => mode,
        None if uses_secrets => SECRET_MODE,
        None => DEFAULT_MODE,
    }
}

/// Replace `path` with `content`, creating parent directories as needed.
///
/// When `path` already holds `content` only its mode is updated and
/// [`WriteStatus::Unchanged`] is returned.
pub fn write_rendered(path: &Path, content: &[u8], mode: u32) -> Result<WriteStatus, SyncError> {
    if holds(path, content) {
        set_mode(path, mode).map_err(|e| io_err(path, e))?;
        tracing::debug!(path = %path.display(), "destination already up to date");
        return Ok(WriteStatus::Unchanged);
    }
    let tmp = PathBuf::from(format!("{}.tmplctl.tmp", path.display()));
    write_with_tmp(path, content, mode, &tmp)?;
    Ok(WriteStatus::Written)
}

/// Unreadable or missing destinations never match.
fn holds(path: &Path, content: &[u8]) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == content.len() as u64 => {
            std::fs::read(path).map(|existing| existing == content).unwrap_or(false)
        }
        _ => false,
    }
}

/// Lets writes through until closed.
///
/// Each write holds the gate open while it runs, so [`WriteGate::close`]
/// returns only after a write already in flight has landed.
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    closed: Arc<RwLock<bool>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// [`write_rendered`] unless the gate is closed.
    pub fn write(&self, path: &Path, content: &[u8], mode: u32) -> Result<WriteStatus, SyncError> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(SyncError::Closed {
                path: path.to_path_buf(),
            });
        }
        write_rendered(path, content, mode)
    }

    /// Refuse every later write. Blocks until a running write finishes.
    pub fn close(&self) {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_with_tmp(path: &Path, content: &[u8], mode: u32, tmp: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;
    if let Err(e) = set_mode(tmp, mode) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(tmp, e));
    }

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::info!(path = %path.display(), mode = format_args!("{mode:o}"), "wrote rendered template");
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
