//! Directories the tool reads from and writes to.
//!
//! Every location can be overridden through a `KILN_*` environment variable,
//! otherwise the platform conventions apply (XDG on Unix, known folders on
//! Windows).

use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Overrides [`cache_dir`].
pub const CACHE_DIR_ENV: &str = "KILN_CACHE";

/// Overrides [`local_m2_repository_dir`].
pub const M2_REPOSITORY_ENV: &str = "KILN_M2_REPOSITORY";

fn env_path(name: &str) -> Option<PathBuf> {
  std::env::var_os(name).filter(|value| !value.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory, or the working directory when it is unknown
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_path("USERPROFILE").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory, or the working directory when it is unknown
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_path("HOME").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Some(path) = env_path(CACHE_DIR_ENV) {
    return path;
  }
  let local_appdata = env_path("LOCALAPPDATA").unwrap_or_else(|| home_dir().join("AppData").join("Local"));
  local_appdata.join(APP_NAME).join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Some(path) = env_path(CACHE_DIR_ENV) {
    return path;
  }
  let cache_home = env_path("XDG_CACHE_HOME").unwrap_or_else(|| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Where files of remote repositories without a cache repository are kept
pub fn artifact_cache_dir() -> PathBuf {
  cache_dir().join("artifacts")
}

/// Returns the local Maven repository
pub fn local_m2_repository_dir() -> PathBuf {
  env_path(M2_REPOSITORY_ENV).unwrap_or_else(|| home_dir().join(".m2").join("repository"))
}
