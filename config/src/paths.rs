//! Path utilities used during configuration file discovery.

use std::path::{Path, PathBuf};

/// Returns an iterator that walks up the directory hierarchy towards the root.
///
/// The first item is `path` itself. If `stop_root_at` is given, iteration
/// ends after yielding it.
pub fn ancestors<'a>(path: &'a Path, stop_root_at: Option<&Path>) -> PathAncestors<'a> {
    PathAncestors {
        current: Some(path),
        stop_at: stop_root_at.map(Path::to_path_buf),
    }
}

/// An iterator over a path and its parents.
#[derive(Debug)]
pub struct PathAncestors<'a> {
    current: Option<&'a Path>,
    stop_at: Option<PathBuf>,
}

impl<'a> Iterator for PathAncestors<'a> {
    type Item = &'a Path;

    fn next(&mut self) -> Option<&'a Path> {
        let path = self.current?;
        self.current = match &self.stop_at {
            Some(stop_at) if path == stop_at => None,
            _ => path.parent(),
        };
        Some(path)
    }
}

/// The location of the project configuration file within `dir`.
pub fn project_config(dir: &Path) -> PathBuf {
    dir.join(".cbd").join("config.toml")
}
