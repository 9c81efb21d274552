//! Transitive resolution of Maven-style library dependencies.
//!
//! [`resolve_dependencies`] walks the dependency graph depth first, looking
//! every dependency up in a [`Repository`] chain and collecting one
//! [`ResolvedDependency`] per visited id. Failures are recorded per node
//! instead of aborting the walk; cycles are logged and treated as satisfied.

pub mod lock;
pub mod m2;
pub mod pom;
pub mod repository;
pub mod resolve;
pub mod tree;
pub mod types;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use lock::{DirectoryLock, LockError};
pub use repository::{Checksum, Repository, create_repository_chain, default_repositories};
pub use resolve::{Resolution, resolve_dependencies, resolve_dependencies_with, resolve_dependency_artifacts};
pub use tree::{artifacts, dependency_tree, dependency_tree_with};
pub use types::{
  CoordinateError, Dependency, DependencyExclusion, DependencyId, DependencyMapper, ResolvedDependency,
};

/// Failure of one repository to provide a file.
#[derive(Debug, Error)]
pub enum RepositoryError {
  #[error("invalid repository url '{url}': {message}")]
  InvalidUrl { url: String, message: String },

  #[error("invalid repository directory: {0}")]
  InvalidPath(PathBuf),

  #[error("request to {url} failed: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("request to {url} failed with HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("invalid POM {path}: {message}")]
  Pom { path: PathBuf, message: String },

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}
