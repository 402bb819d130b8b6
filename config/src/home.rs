//! Canonical definitions of [`home_dir`] and [`cbd_home_with_cwd`].

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// The environment variable that overrides the configuration home.
pub const HOME_VAR: &str = "CBD_HOME";

/// Returns the path of the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    #[allow(deprecated)]
    std::env::home_dir()
}

/// Returns the directory holding the user-wide `config.toml`.
///
/// It returns one of the following values, in this order of preference:
///
/// - The value of the `CBD_HOME` environment variable, if it is an
///   absolute path.
/// - `cwd` joined with `CBD_HOME`, if it is a relative path.
/// - The `.cbd` directory in the user's home directory.
///
/// # Errors
///
/// This function fails if the home directory cannot be determined.
pub fn cbd_home_with_cwd(cwd: &Path) -> io::Result<PathBuf> {
    resolve(std::env::var_os(HOME_VAR), cwd, home_dir())
}

pub(crate) fn resolve(
    var: Option<OsString>,
    cwd: &Path,
    home_dir: Option<PathBuf>,
) -> io::Result<PathBuf> {
    match var.filter(|h| !h.is_empty()) {
        Some(home) => {
            let home = PathBuf::from(home);
            if home.is_absolute() {
                Ok(home)
            } else {
                Ok(cwd.join(home))
            }
        }
        None => home_dir
            .map(|p| p.join(".cbd"))
            .ok_or_else(|| io::Error::other("could not find the cbd home directory")),
    }
}
