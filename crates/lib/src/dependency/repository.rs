//! Maven-layout repositories and the chain they are searched in.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use md5::Md5;
use reqwest::Url;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::dependency::RepositoryError;
use crate::platform::paths::local_m2_repository_dir;

/// Name of the local Maven repository.
pub const LOCAL_REPOSITORY_NAME: &str = "local";

/// Name of Maven Central.
pub const CENTRAL_REPOSITORY_NAME: &str = "central";

/// URL of Maven Central.
pub const CENTRAL_REPOSITORY_URL: &str = "https://repo1.maven.org/maven2/";

/// Checksum sidecar published next to every file of a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Checksum {
  /// Don't look for checksums.
  None,
  Md5,
  #[default]
  Sha1,
  Sha256,
}

impl Checksum {
  /// File name suffix of the sidecar.
  pub fn suffix(&self) -> &'static str {
    match self {
      Checksum::None => ".no-checksum",
      Checksum::Md5 => ".md5",
      Checksum::Sha1 => ".sha1",
      Checksum::Sha256 => ".sha256",
    }
  }

  /// Lowercase hex digest of `data`, `None` for [`Checksum::None`].
  pub fn compute(&self, data: &[u8]) -> Option<String> {
    match self {
      Checksum::None => None,
      Checksum::Md5 => Some(hex::encode(Md5::digest(data))),
      Checksum::Sha1 => Some(hex::encode(Sha1::digest(data))),
      Checksum::Sha256 => Some(hex::encode(Sha256::digest(data))),
    }
  }
}

/// A repository laid out the way Maven 2 lays them out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
  pub name: String,
  pub url: Url,
  /// Local repository that keeps the files downloaded from this one.
  pub cache: Option<Box<Repository>>,
  pub checksum: Checksum,
  pub releases: bool,
  pub snapshots: bool,
}

impl Repository {
  pub fn new(name: impl Into<String>, url: Url) -> Self {
    Self {
      name: name.into(),
      url,
      cache: None,
      checksum: Checksum::default(),
      releases: true,
      snapshots: true,
    }
  }

  /// Parse `url` and create a repository for it.
  pub fn parse(name: impl Into<String>, url: &str) -> Result<Self, RepositoryError> {
    let mut url = Url::parse(url).map_err(|e| RepositoryError::InvalidUrl {
      url: url.to_string(),
      message: e.to_string(),
    })?;
    if !url.path().ends_with('/') {
      let path = format!("{}/", url.path());
      url.set_path(&path);
    }
    Ok(Self::new(name, url))
  }

  /// Repository in a local directory.
  pub fn local(name: impl Into<String>, directory: &Path) -> Result<Self, RepositoryError> {
    let directory = if directory.is_absolute() {
      directory.to_path_buf()
    } else {
      std::env::current_dir()
        .map_err(|source| RepositoryError::Io {
          path: directory.to_path_buf(),
          source,
        })?
        .join(directory)
    };
    let url = Url::from_directory_path(&directory).map_err(|()| RepositoryError::InvalidPath(directory.clone()))?;
    Ok(Self::new(name, url))
  }

  /// Parse `name=url`, where a url without scheme is a local directory.
  pub fn parse_spec(spec: &str) -> Result<Self, RepositoryError> {
    let Some((name, location)) = spec.split_once('=') else {
      return Err(RepositoryError::InvalidUrl {
        url: spec.to_string(),
        message: "expected name=url".to_string(),
      });
    };
    let (name, location) = (name.trim(), location.trim());
    if location.contains("://") {
      Self::parse(name, location)
    } else {
      Self::local(name, Path::new(location))
    }
  }

  pub fn with_cache(mut self, cache: Repository) -> Self {
    self.cache = Some(Box::new(cache));
    self
  }

  pub fn with_checksum(mut self, checksum: Checksum) -> Self {
    self.checksum = checksum;
    self
  }

  pub fn releases(mut self, releases: bool) -> Self {
    self.releases = releases;
    self
  }

  pub fn snapshots(mut self, snapshots: bool) -> Self {
    self.snapshots = snapshots;
    self
  }

  /// Whether the repository lives on this machine.
  pub fn is_local(&self) -> bool {
    self.url.scheme() == "file"
  }

  /// Directory of a local repository.
  pub fn directory(&self) -> Option<PathBuf> {
    if self.is_local() {
      self.url.to_file_path().ok()
    } else {
      None
    }
  }

  /// Whether the repository serves `version`, given its release/snapshot flags.
  pub fn serves(&self, snapshot: bool) -> bool {
    if snapshot { self.snapshots } else { self.releases }
  }
}

impl fmt::Display for Repository {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "M2: {} at {}", self.name, self.url)?;
    if let Some(cache) = &self.cache {
      write!(f, " (cached by {})", cache.name)?;
    }
    Ok(())
  }
}

/// Search order: repositories without cache (locals and caches) first, then by name.
pub fn repository_order(a: &Repository, b: &Repository) -> Ordering {
  a.cache
    .is_some()
    .cmp(&b.cache.is_some())
    .then_with(|| a.name.cmp(&b.name))
}

/// Inline caches, put local repositories first and drop duplicates.
pub fn create_repository_chain(repositories: &[Repository]) -> Vec<Repository> {
  let mut chain: Vec<Repository> = repositories.to_vec();
  for repository in repositories {
    let mut cache = repository.cache.as_deref();
    while let Some(repository) = cache {
      chain.push(repository.clone());
      cache = repository.cache.as_deref();
    }
  }
  chain.sort_by_key(|repository| !repository.is_local());

  let mut unique: Vec<Repository> = Vec::with_capacity(chain.len());
  for repository in chain {
    if !unique.contains(&repository) {
      unique.push(repository);
    }
  }
  unique
}

/// The user's local Maven repository.
pub fn local_m2_repository() -> Result<Repository, RepositoryError> {
  Repository::local(LOCAL_REPOSITORY_NAME, &local_m2_repository_dir())
}

/// Maven Central, cached by the local Maven repository. Snapshots are not served.
pub fn maven_central() -> Result<Repository, RepositoryError> {
  Ok(
    Repository::parse(CENTRAL_REPOSITORY_NAME, CENTRAL_REPOSITORY_URL)?
      .with_cache(local_m2_repository()?)
      .snapshots(false),
  )
}

/// Repositories used when none are configured.
pub fn default_repositories() -> Result<Vec<Repository>, RepositoryError> {
  Ok(vec![maven_central()?])
}
