//! Retrieval of artifacts from Maven 2 repositories.
//!
//! Files are addressed by their path in the Maven layout,
//! `group/with/slashes/name/version/name-version[-classifier].type`. Local
//! repositories are read in place. Remote repositories are downloaded over
//! HTTP into their cache repository (or the tool's artifact cache when they
//! have none), verifying the published checksum sidecar on the way.

use std::fs;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::consts::{APP_NAME, MAX_PARENT_DEPTH};
use crate::dependency::RepositoryError;
use crate::dependency::pom::{Pom, PomParent, effective_dependencies};
use crate::dependency::repository::{Checksum, Repository};
use crate::dependency::types::{DependencyId, ResolvedDependency};
use crate::platform::paths::artifact_cache_dir;

/// Path of the POM of `group:name:version`.
pub fn pom_path(group: &str, name: &str, version: &str) -> String {
  format!("{}/{}-{}.pom", version_directory(group, name, version), name, version)
}

/// Path of the artifact `id` points at.
pub fn artifact_path(id: &DependencyId) -> String {
  let mut file = format!("{}-{}", id.name, id.version);
  if let Some(classifier) = &id.classifier {
    file.push('-');
    file.push_str(classifier);
  }
  format!("{}/{}.{}", version_directory(&id.group, &id.name, &id.version), file, id.kind)
}

fn version_directory(group: &str, name: &str, version: &str) -> String {
  format!("{}/{}/{}", group.replace('.', "/"), name, version)
}

/// Downloads files of remote repositories, reusing one HTTP client.
#[derive(Debug)]
pub struct Retriever {
  client: Option<Client>,
  cache_root: PathBuf,
}

impl Default for Retriever {
  fn default() -> Self {
    Self::new(artifact_cache_dir())
  }
}

impl Retriever {
  /// `cache_root` keeps files of remote repositories that have no cache repository.
  pub fn new(cache_root: PathBuf) -> Self {
    Self {
      client: None,
      cache_root,
    }
  }

  /// Directory that receives the files downloaded from `repository`.
  pub fn cache_directory(&self, repository: &Repository) -> Option<PathBuf> {
    if repository.is_local() {
      return None;
    }
    Some(
      repository
        .cache
        .as_deref()
        .and_then(Repository::directory)
        .unwrap_or_else(|| self.cache_root.join(&repository.name)),
    )
  }

  fn client(&mut self) -> Result<&Client, RepositoryError> {
    let client = match self.client.take() {
      Some(client) => client,
      None => Client::builder()
        .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| RepositoryError::Http {
          url: String::new(),
          source,
        })?,
    };
    Ok(self.client.insert(client))
  }

  /// Local path of `path` in `repository`, `None` when the repository doesn't have it.
  pub fn retrieve(&mut self, repository: &Repository, path: &str) -> Result<Option<PathBuf>, RepositoryError> {
    if let Some(directory) = repository.directory() {
      let file = directory.join(path);
      return Ok(file.is_file().then_some(file));
    }

    let Some(cache) = self.cache_directory(repository) else {
      return Ok(None);
    };
    let cached = cache.join(path);
    if cached.is_file() {
      debug!(repository = %repository.name, path = %cached.display(), "using cached file");
      return Ok(Some(cached));
    }

    let url = repository.url.join(path).map_err(|e| RepositoryError::InvalidUrl {
      url: format!("{}{}", repository.url, path),
      message: e.to_string(),
    })?;
    let Some(bytes) = self.download(url.as_str())? else {
      debug!(url = %url, "not found");
      return Ok(None);
    };

    let checksum = self.verify(repository.checksum, url.as_str(), &bytes)?;
    write_file(&cached, &bytes)?;
    if let Some(checksum) = checksum {
      let sidecar = PathBuf::from(format!("{}{}", cached.display(), repository.checksum.suffix()));
      write_file(&sidecar, checksum.as_bytes())?;
    }
    info!(url = %url, path = %cached.display(), size = bytes.len(), "download complete");
    Ok(Some(cached))
  }

  fn download(&mut self, url: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
    let http = |source| RepositoryError::Http {
      url: url.to_string(),
      source,
    };
    let response = self.client()?.get(url).send().map_err(http)?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
      return Ok(None);
    }
    if !status.is_success() {
      return Err(RepositoryError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }
    Ok(Some(response.bytes().map_err(http)?.to_vec()))
  }

  /// Check `bytes` against the sidecar of `url`, returning the verified checksum.
  fn verify(&mut self, checksum: Checksum, url: &str, bytes: &[u8]) -> Result<Option<String>, RepositoryError> {
    let Some(actual) = checksum.compute(bytes) else {
      return Ok(None);
    };
    let sidecar_url = format!("{}{}", url, checksum.suffix());
    let published = match self.download(&sidecar_url) {
      Ok(Some(published)) => published,
      Ok(None) => {
        warn!(url = %url, "no checksum published, accepting download unverified");
        return Ok(None);
      }
      Err(err) => {
        warn!(url = %url, error = %err, "checksum could not be retrieved, accepting download unverified");
        return Ok(None);
      }
    };

    let published = String::from_utf8_lossy(&published);
    let expected = published.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
    if expected != actual {
      return Err(RepositoryError::ChecksumMismatch {
        url: url.to_string(),
        expected,
        actual,
      });
    }
    Ok(Some(actual))
  }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
  let io = |source| RepositoryError::Io {
    path: path.to_path_buf(),
    source,
  };
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(io)?;
  }
  let partial = PathBuf::from(format!("{}.{}-partial", path.display(), APP_NAME));
  fs::write(&partial, bytes).map_err(io)?;
  fs::rename(&partial, path).map_err(io)
}

fn load_pom(path: &Path) -> Result<Pom, RepositoryError> {
  let xml = fs::read_to_string(path).map_err(|source| RepositoryError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  Pom::parse(&xml).map_err(|message| RepositoryError::Pom {
    path: path.to_path_buf(),
    message,
  })
}

/// Parents of `pom`, nearest first, looked up in `repository` and then in `chain`.
fn load_parents(
  retriever: &mut Retriever,
  pom: &Pom,
  repository: &Repository,
  chain: &[Repository],
) -> Result<Vec<Pom>, RepositoryError> {
  let mut parents: Vec<Pom> = Vec::new();
  let mut next: Option<PomParent> = pom.parent.clone();
  while let Some(parent) = next.take() {
    if parents.len() >= MAX_PARENT_DEPTH {
      warn!(parent = %format!("{}:{}:{}", parent.group, parent.name, parent.version), "parent chain too deep, ignoring the rest");
      break;
    }
    let path = pom_path(&parent.group, &parent.name, &parent.version);
    let mut found = None;
    for candidate in std::iter::once(repository).chain(chain.iter().filter(|r| *r != repository)) {
      if let Some(file) = retriever.retrieve(candidate, &path)? {
        found = Some(load_pom(&file)?);
        break;
      }
    }
    let Some(parent_pom) = found else {
      warn!(
        parent = %format!("{}:{}:{}", parent.group, parent.name, parent.version),
        "parent POM not found, inherited properties are unavailable"
      );
      break;
    };
    next = parent_pom.parent.clone();
    parents.push(parent_pom);
  }
  Ok(parents)
}

/// Resolve `id` in `repository`. Parent POMs may come from anywhere in `chain`.
pub fn resolve_in_repository(
  id: &DependencyId,
  repository: &Repository,
  chain: &[Repository],
  retriever: &mut Retriever,
) -> ResolvedDependency {
  match try_resolve_in_repository(id, repository, chain, retriever) {
    Ok(resolved) => resolved,
    Err(err) => {
      debug!(dependency = %id, repository = %repository.name, error = %err, "retrieval failed");
      ResolvedDependency::failed(id.clone(), err.to_string())
    }
  }
}

fn try_resolve_in_repository(
  id: &DependencyId,
  repository: &Repository,
  chain: &[Repository],
  retriever: &mut Retriever,
) -> Result<ResolvedDependency, RepositoryError> {
  let snapshot = id.is_snapshot();
  if !repository.serves(snapshot) {
    let kind = if snapshot { "snapshots" } else { "releases" };
    return Ok(ResolvedDependency::failed(
      id.clone(),
      format!("{} does not serve {}", repository.name, kind),
    ));
  }

  let pom_file = retriever.retrieve(repository, &pom_path(&id.group, &id.name, &id.version))?;
  let (dependencies, packaging) = match &pom_file {
    Some(file) => {
      let pom = load_pom(file)?;
      let parents = load_parents(retriever, &pom, repository, chain)?;
      (effective_dependencies(&pom, &parents), pom.packaging().to_string())
    }
    None => (Vec::new(), String::new()),
  };

  if id.kind == "pom" {
    return Ok(match pom_file {
      Some(file) => ResolvedDependency::resolved(id.clone(), dependencies, Some(file), repository),
      None => ResolvedDependency::failed(id.clone(), format!("not found in {}", repository.name)),
    });
  }

  match retriever.retrieve(repository, &artifact_path(id))? {
    Some(artifact) => {
      if pom_file.is_none() {
        warn!(dependency = %id, repository = %repository.name, "artifact has no POM, assuming no dependencies");
      }
      Ok(ResolvedDependency::resolved(id.clone(), dependencies, Some(artifact), repository))
    }
    None if packaging == "pom" => Ok(ResolvedDependency::resolved(id.clone(), dependencies, None, repository)),
    None => Ok(ResolvedDependency::failed(
      id.clone(),
      format!("not found in {}", repository.name),
    )),
  }
}
