//! Launcher binary lookup
//!
//! A missing launcher is a hard configuration failure: nothing is installed
//! on the node's behalf and no process is spawned.

use rendezvous_core::{Error, Result};
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Check if a file exists and has any executable bit set
pub fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && (metadata.permissions().mode() & 0o111) != 0,
        Err(_) => false,
    }
}

/// Resolve `program` to an executable path.
///
/// Programs containing a path separator are checked as given; bare names are
/// searched in `search_path` (a `PATH`-style list).
pub fn locate_launcher(program: &str, search_path: Option<&OsStr>) -> Result<PathBuf> {
    let found = if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        is_executable(&path).then_some(path)
    } else {
        search_path.and_then(|paths| {
            std::env::split_paths(paths)
                .map(|dir| dir.join(program))
                .find(|candidate| is_executable(candidate))
        })
    };

    match found {
        Some(path) => {
            debug!(program = %program, path = %path.display(), "Located launcher");
            Ok(path)
        }
        None => {
            error!(program = %program, "Launcher binary not found or not executable");
            Err(Error::LauncherNotFound {
                program: program.to_string(),
            })
        }
    }
}
