//! The host-side collaborator interfaces named in §6: a load-time
//! [`Filter`], a [`Reloader`] for re-transform requests, and a debug-dump
//! helper for diffing before/after class bytes. None of these are
//! implemented by this crate — they are the seam a class-loader
//! interposer (out of scope here, per §1) plugs into.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PatchError;

/// Decides whether a given class load should be offered to the script
/// manager at all. The default accepts every class; a host wires this to
/// its own include/exclude package rules.
pub trait Filter: Send + Sync {
    fn should_transform(
        &self,
        loader: Option<&str>,
        name: &str,
        class_being_redefined: bool,
        bytes: &[u8],
    ) -> bool {
        let _ = (loader, name, class_being_redefined, bytes);
        true
    }
}

/// A filter that transforms everything — the manager's default when none
/// is configured.
pub struct AcceptAll;

impl Filter for AcceptAll {}

/// Asks the host runtime to redefine an already-loaded class, used when a
/// witness activates a script for a class that loaded before the witness
/// fired — §4.7.
pub trait Reloader: Send + Sync {
    /// Returns [`PatchError::ReloadUnsupported`] if the host cannot comply
    /// (e.g. the JVM was not started with `-javaagent` retransform
    /// capabilities, or the host has no redefinition API at all).
    fn reload(&self, class_name: &str) -> Result<(), PatchError>;
}

/// A [`Reloader`] for hosts that never support retransformation.
pub struct NoReload;

impl Reloader for NoReload {
    fn reload(&self, class_name: &str) -> Result<(), PatchError> {
        Err(PatchError::ReloadUnsupported(class_name.to_string()))
    }
}

/// Writes `before`/`after` class bytes to `dir` for offline diffing,
/// called by the script manager only when a dump directory was
/// configured. `internal_name`'s `/` separators become nested
/// directories, matching the internal name's own package structure.
pub fn debug_dump(dir: &Path, internal_name: &str, before: &[u8], after: &[u8]) -> std::io::Result<()> {
    let relative = PathBuf::from(internal_name);
    let target_dir = match relative.parent() {
        Some(parent) if parent != Path::new("") => dir.join(parent),
        _ => dir.to_path_buf(),
    };
    fs::create_dir_all(&target_dir)?;

    let file_name = relative
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| internal_name.to_string());

    fs::write(target_dir.join(format!("{file_name}.class")), after)?;
    fs::write(target_dir.join(format!("{file_name}_OLD.class")), before)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_all_transforms_everything() {
        let filter = AcceptAll;
        assert!(filter.should_transform(None, "com/example/Foo", false, &[]));
    }

    #[test]
    fn no_reload_reports_unsupported() {
        let reloader = NoReload;
        let err = reloader.reload("com/example/Foo").unwrap_err();
        assert!(matches!(err, PatchError::ReloadUnsupported(name) if name == "com/example/Foo"));
    }

    #[test]
    fn debug_dump_writes_before_and_after_under_package_directories() {
        let dir = std::env::temp_dir().join(format!("classgraft-debug-dump-test-{}", std::process::id()));
        debug_dump(&dir, "com/example/Foo", b"before", b"after").unwrap();
        assert_eq!(fs::read(dir.join("com/example/Foo.class")).unwrap(), b"after");
        assert_eq!(fs::read(dir.join("com/example/Foo_OLD.class")).unwrap(), b"before");
        let _ = fs::remove_dir_all(&dir);
    }
}
