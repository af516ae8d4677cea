//! src/workers.rs
//!
//! Worker discovery and spawning. A worker is registered by name alone;
//! its source must exist as `<name>.rs` somewhere under the commands tree,
//! and its executable is resolved from the usual build output locations.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::table::Launcher;

/// Recursive search for `<name>.rs` under the commands tree.
pub fn find_worker_source(commands_dir: &Path, name: &str) -> Option<PathBuf> {
    let wanted = format!("{name}.rs");
    let mut stack = vec![commands_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().is_some_and(|f| f == wanted.as_str()) {
                return Some(path);
            }
        }
    }
    None
}

/// Candidate executable locations, probed in order: next to the supervisor
/// binary, then the workspace build directories.
pub fn resolve_worker_exe(name: &str) -> Option<PathBuf> {
    let exe_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    let mut candidates = Vec::new();
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            candidates.push(dir.join(&exe_name));
        }
    }
    candidates.push(PathBuf::from(format!("./target/release/{exe_name}")));
    candidates.push(PathBuf::from(format!("./target/debug/{exe_name}")));

    candidates.into_iter().find(|path| {
        let exists = path.exists();
        debug!("checking worker path: {:?} - exists: {}", path, exists);
        exists
    })
}

/// The production launcher: validates the source registration, resolves the
/// executable and passes the bus address through.
pub fn default_launcher(bus_addr: String, commands_dir: PathBuf) -> Launcher {
    Box::new(move |name| {
        if find_worker_source(&commands_dir, name).is_none() {
            warn!(
                "worker '{}' has no source file under {:?}",
                name, commands_dir
            );
            return None;
        }
        let exe = resolve_worker_exe(name)?;
        let mut command = Command::new(exe);
        command.arg("--bus").arg(&bus_addr);
        Some(command)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sources_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("gambling");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("gamble.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("top.rs"), "fn main() {}").unwrap();

        assert!(find_worker_source(dir.path(), "gamble").is_some());
        assert!(find_worker_source(dir.path(), "top").is_some());
        assert!(find_worker_source(dir.path(), "missing").is_none());
    }

    #[test]
    fn missing_commands_dir_is_not_found() {
        assert!(find_worker_source(Path::new("/nonexistent-dir"), "gamble").is_none());
    }
}
