//! Dependency coordinates, exclusion rules and resolution results.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::consts::{DEFAULT_SCOPE, DEFAULT_TYPE, SNAPSHOT_SUFFIX};
use crate::dependency::repository::Repository;

/// A `group:name:version` string could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinateError {
  #[error("invalid dependency coordinate '{0}': expected group:name:version")]
  WrongPartCount(String),

  #[error("invalid dependency coordinate '{0}': empty {1}")]
  EmptyPart(String, &'static str),
}

/// Identifies one artifact of a Maven-style repository.
///
/// Identity is `group`, `name`, `version`, `classifier` and `kind`. Scope,
/// optionality and the preferred repository are attributes that don't
/// distinguish two ids.
#[derive(Clone)]
pub struct DependencyId {
  pub group: String,
  pub name: String,
  pub version: String,
  pub classifier: Option<String>,
  /// Artifact type, `jar` unless stated otherwise.
  pub kind: String,
  pub scope: String,
  pub optional: bool,
  /// Repository to try before the regular chain.
  pub preferred_repository: Option<Rc<Repository>>,
}

impl DependencyId {
  pub fn new(group: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      group: group.into(),
      name: name.into(),
      version: version.into(),
      classifier: None,
      kind: DEFAULT_TYPE.to_string(),
      scope: DEFAULT_SCOPE.to_string(),
      optional: false,
      preferred_repository: None,
    }
  }

  /// Parse `group:name:version`.
  pub fn parse(coordinate: &str) -> Result<Self, CoordinateError> {
    let parts: Vec<&str> = coordinate.trim().split(':').collect();
    let [group, name, version] = parts.as_slice() else {
      return Err(CoordinateError::WrongPartCount(coordinate.to_string()));
    };
    for (part, what) in [(group, "group"), (name, "name"), (version, "version")] {
      if part.trim().is_empty() {
        return Err(CoordinateError::EmptyPart(coordinate.to_string(), what));
      }
    }
    Ok(Self::new(group.trim(), name.trim(), version.trim()))
  }

  pub fn classifier(mut self, classifier: impl Into<String>) -> Self {
    self.classifier = Some(classifier.into());
    self
  }

  pub fn kind(mut self, kind: impl Into<String>) -> Self {
    self.kind = kind.into();
    self
  }

  pub fn scope(mut self, scope: impl Into<String>) -> Self {
    self.scope = scope.into();
    self
  }

  pub fn optional(mut self, optional: bool) -> Self {
    self.optional = optional;
    self
  }

  pub fn preferred_repository(mut self, repository: Repository) -> Self {
    self.preferred_repository = Some(Rc::new(repository));
    self
  }

  pub fn is_snapshot(&self) -> bool {
    self.version.ends_with(SNAPSHOT_SUFFIX)
  }

  fn identity(&self) -> (&str, &str, &str, Option<&str>, &str) {
    (&self.group, &self.name, &self.version, self.classifier.as_deref(), &self.kind)
  }
}

impl FromStr for DependencyId {
  type Err = CoordinateError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl PartialEq for DependencyId {
  fn eq(&self, other: &Self) -> bool {
    self.identity() == other.identity()
  }
}

impl Eq for DependencyId {}

impl Hash for DependencyId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.identity().hash(state);
  }
}

impl PartialOrd for DependencyId {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for DependencyId {
  fn cmp(&self, other: &Self) -> Ordering {
    self.identity().cmp(&other.identity())
  }
}

impl fmt::Display for DependencyId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.group, self.name, self.version)?;
    if let Some(classifier) = &self.classifier {
      write!(f, ":{}", classifier)?;
    }
    if self.kind != DEFAULT_TYPE {
      write!(f, "@{}", self.kind)?;
    }
    Ok(())
  }
}

impl fmt::Debug for DependencyId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "DependencyId({}", self)?;
    if self.scope != DEFAULT_SCOPE {
      write!(f, ", scope={}", self.scope)?;
    }
    if self.optional {
      write!(f, ", optional")?;
    }
    if let Some(repository) = &self.preferred_repository {
      write!(f, ", preferred={}", repository.name)?;
    }
    write!(f, ")")
  }
}

impl Serialize for DependencyId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// Pattern matching dependency ids. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyExclusion {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub classifier: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scope: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub optional: Option<bool>,
}

impl DependencyExclusion {
  /// Exclude every version of `group:name`.
  pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      group: Some(group.into()),
      name: Some(name.into()),
      ..Self::default()
    }
  }

  /// Parse `group:name`, where `*` stands for any group or name.
  pub fn parse(pattern: &str) -> Result<Self, CoordinateError> {
    let Some((group, name)) = pattern.trim().split_once(':') else {
      return Err(CoordinateError::WrongPartCount(pattern.to_string()));
    };
    if name.contains(':') {
      return Err(CoordinateError::WrongPartCount(pattern.to_string()));
    }
    let part = |value: &str, what: &'static str| match value.trim() {
      "" => Err(CoordinateError::EmptyPart(pattern.to_string(), what)),
      "*" => Ok(None),
      value => Ok(Some(value.to_string())),
    };
    Ok(Self {
      group: part(group, "group")?,
      name: part(name, "name")?,
      ..Self::default()
    })
  }

  pub fn with_scope(scope: impl Into<String>) -> Self {
    Self {
      scope: Some(scope.into()),
      ..Self::default()
    }
  }

  pub fn with_optional(optional: bool) -> Self {
    Self {
      optional: Some(optional),
      ..Self::default()
    }
  }

  pub fn excludes(&self, id: &DependencyId) -> bool {
    fn matches(pattern: &Option<String>, value: &str) -> bool {
      pattern.as_deref().is_none_or(|p| p == value)
    }

    matches(&self.group, &id.group)
      && matches(&self.name, &id.name)
      && matches(&self.version, &id.version)
      && self
        .classifier
        .as_deref()
        .is_none_or(|c| id.classifier.as_deref() == Some(c))
      && matches(&self.kind, &id.kind)
      && matches(&self.scope, &id.scope)
      && self.optional.is_none_or(|o| o == id.optional)
  }
}

impl fmt::Display for DependencyExclusion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let part = |value: &Option<String>| value.clone().unwrap_or_else(|| "*".to_string());
    write!(f, "{}:{}:{}", part(&self.group), part(&self.name), part(&self.version))?;
    if let Some(classifier) = &self.classifier {
      write!(f, ":{}", classifier)?;
    }
    if let Some(kind) = &self.kind {
      write!(f, "@{}", kind)?;
    }
    if let Some(scope) = &self.scope {
      write!(f, " scope={}", scope)?;
    }
    if let Some(optional) = self.optional {
      write!(f, " optional={}", optional)?;
    }
    Ok(())
  }
}

/// Rules applied to the transitive dependencies of every dependency unless it
/// states its own.
pub fn default_exclusions() -> Vec<DependencyExclusion> {
  vec![
    DependencyExclusion::with_optional(true),
    DependencyExclusion::with_scope("test"),
    DependencyExclusion::with_scope("provided"),
    DependencyExclusion::with_scope("system"),
  ]
}

/// A dependency to resolve, with the exclusions that apply to its transitive
/// dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
  pub id: DependencyId,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub exclusions: Vec<DependencyExclusion>,
}

impl Dependency {
  /// A dependency with the [default exclusions](default_exclusions).
  pub fn new(id: DependencyId) -> Self {
    Self {
      id,
      exclusions: default_exclusions(),
    }
  }

  pub fn with_exclusions(id: DependencyId, exclusions: Vec<DependencyExclusion>) -> Self {
    Self { id, exclusions }
  }

  pub fn exclude(mut self, exclusion: DependencyExclusion) -> Self {
    self.exclusions.push(exclusion);
    self
  }
}

impl From<DependencyId> for Dependency {
  fn from(id: DependencyId) -> Self {
    Self::new(id)
  }
}

impl fmt::Display for Dependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.id, f)
  }
}

/// Outcome of resolving a single dependency id.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDependency {
  pub id: DependencyId,
  pub dependencies: Vec<Dependency>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub artifact: Option<PathBuf>,
  pub has_error: bool,
  /// Human readable account of what happened, mostly useful on error.
  #[serde(skip_serializing_if = "String::is_empty")]
  pub log: String,
  /// Name of the repository the dependency was found in.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub resolved_from: Option<String>,
}

impl ResolvedDependency {
  pub fn resolved(
    id: DependencyId,
    dependencies: Vec<Dependency>,
    artifact: Option<PathBuf>,
    repository: &Repository,
  ) -> Self {
    Self {
      id,
      dependencies,
      artifact,
      has_error: false,
      log: String::new(),
      resolved_from: Some(repository.name.clone()),
    }
  }

  pub fn failed(id: DependencyId, log: impl Into<String>) -> Self {
    Self {
      id,
      dependencies: Vec::new(),
      artifact: None,
      has_error: true,
      log: log.into(),
      resolved_from: None,
    }
  }
}

/// Rewrites a dependency before it is resolved, e.g. to force a version.
#[derive(Clone)]
pub struct DependencyMapper(Rc<dyn Fn(&Dependency) -> Dependency>);

impl DependencyMapper {
  pub fn new(mapper: impl Fn(&Dependency) -> Dependency + 'static) -> Self {
    Self(Rc::new(mapper))
  }

  pub fn identity() -> Self {
    Self::new(Dependency::clone)
  }

  /// Apply `next` after this mapper.
  pub fn then(self, next: impl Fn(&Dependency) -> Dependency + 'static) -> Self {
    Self::new(move |dependency| next(&(self.0)(dependency)))
  }

  pub fn apply(&self, dependency: &Dependency) -> Dependency {
    (self.0)(dependency)
  }
}

impl Default for DependencyMapper {
  fn default() -> Self {
    Self::identity()
  }
}

impl fmt::Debug for DependencyMapper {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("DependencyMapper")
  }
}
