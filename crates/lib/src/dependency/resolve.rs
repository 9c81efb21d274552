//! Depth-first walk over the dependency graph.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info};

use crate::consts::APP_NAME;
use crate::dependency::lock::{LockError, lock_directories};
use crate::dependency::m2::{Retriever, resolve_in_repository};
use crate::dependency::repository::{Repository, repository_order};
use crate::dependency::tree::artifacts;
use crate::dependency::types::{Dependency, DependencyExclusion, DependencyId, ResolvedDependency};

/// Everything a resolution visited.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
  pub resolved: BTreeMap<DependencyId, ResolvedDependency>,
  /// `false` when any visited dependency failed.
  pub ok: bool,
}

/// Resolve `dependencies` and everything they depend on.
///
/// `mapper` is applied to every dependency, direct or transitive, before it
/// is looked up. Cache directories of the repositories are locked for the
/// duration of the call.
pub fn resolve_dependencies(
  dependencies: &[Dependency],
  repositories: &[Repository],
  mapper: impl Fn(&Dependency) -> Dependency,
) -> Result<Resolution, LockError> {
  resolve_dependencies_with(dependencies, repositories, mapper, &mut Retriever::default())
}

/// [`resolve_dependencies`] with an explicit [`Retriever`].
pub fn resolve_dependencies_with(
  dependencies: &[Dependency],
  repositories: &[Repository],
  mapper: impl Fn(&Dependency) -> Dependency,
  retriever: &mut Retriever,
) -> Result<Resolution, LockError> {
  let started = Instant::now();
  let mut repositories = repositories.to_vec();
  repositories.sort_by(repository_order);

  let directories: Vec<PathBuf> = repositories
    .iter()
    .filter_map(|repository| retriever.cache_directory(repository))
    .collect();
  let _locks = lock_directories(directories, &format!("{} resolve", APP_NAME))?;

  info!(
    dependencies = dependencies.len(),
    repositories = repositories.len(),
    "resolving dependencies"
  );

  let mut resolved = BTreeMap::new();
  let mut resolver = Resolver {
    repositories: &repositories,
    mapper,
    retriever,
    resolved: &mut resolved,
    stack: Vec::new(),
    exclusions: Vec::new(),
  };
  let mut ok = true;
  for dependency in dependencies {
    ok &= resolver.resolve(dependency);
  }

  info!(
    ok,
    resolved = resolved.len(),
    elapsed_ms = started.elapsed().as_millis() as u64,
    "dependency resolution finished"
  );
  Ok(Resolution { resolved, ok })
}

/// Artifacts of `dependencies` and their transitive dependencies, `None` if
/// anything failed to resolve.
pub fn resolve_dependency_artifacts(
  dependencies: &[Dependency],
  repositories: &[Repository],
) -> Result<Option<Vec<PathBuf>>, LockError> {
  let resolution = resolve_dependencies(dependencies, repositories, Dependency::clone)?;
  Ok(resolution.ok.then(|| artifacts(&resolution.resolved)))
}

/// Look `id` up in its preferred repository, then in `repositories` in order.
///
/// The first successful lookup wins. `repositories` must already be sorted.
pub fn resolve_single_dependency(
  id: &DependencyId,
  repositories: &[Repository],
  retriever: &mut Retriever,
) -> ResolvedDependency {
  let started = Instant::now();
  let mut tried: Vec<&str> = Vec::new();

  let preferred = id.preferred_repository.as_deref();
  let candidates = preferred.into_iter().chain(repositories.iter().filter(|repository| {
    preferred.is_none_or(|preferred| {
      *repository != preferred && preferred.cache.as_deref().is_none_or(|cache| *repository != cache)
    })
  }));

  for repository in candidates {
    debug!(dependency = %id, repository = %repository.name, "trying repository");
    let resolved = resolve_in_repository(id, repository, repositories, retriever);
    if !resolved.has_error {
      debug!(
        dependency = %id,
        repository = %repository.name,
        "Resolution success {} ({} ms)",
        id,
        started.elapsed().as_millis()
      );
      return resolved;
    }
    debug!(dependency = %id, repository = %repository.name, reason = %resolved.log, "not resolved here");
    tried.push(&repository.name);
  }

  let log = if tried.is_empty() {
    "no repositories to search in".to_string()
  } else {
    format!("tried: {}", tried.join(", "))
  };
  debug!(dependency = %id, "Failed to resolve {} ({} ms)", id, started.elapsed().as_millis());
  ResolvedDependency::failed(id.clone(), log)
}

struct Resolver<'r, M> {
  repositories: &'r [Repository],
  mapper: M,
  retriever: &'r mut Retriever,
  resolved: &'r mut BTreeMap<DependencyId, ResolvedDependency>,
  /// Ids currently being resolved, outermost first.
  stack: Vec<DependencyId>,
  /// Active exclusion rules, with the dependency that declared them.
  exclusions: Vec<(DependencyExclusion, DependencyId)>,
}

impl<M: Fn(&Dependency) -> Dependency> Resolver<'_, M> {
  /// Resolve one dependency and, recursively, its dependencies.
  fn resolve(&mut self, dependency: &Dependency) -> bool {
    let dependency = (self.mapper)(dependency);
    let id = &dependency.id;

    if let Some(position) = self.stack.iter().position(|entry| entry == id) {
      info!("Circular dependency: {}", describe_cycle(&self.stack, position));
      return true;
    }

    let resolved = self.lookup(id);
    let ok = !resolved.has_error;
    self.with_frame(&dependency, |resolver| {
      let mut ok = ok;
      for child in &resolved.dependencies {
        if let Some((rule, owner)) = resolver.exclusions.iter().find(|(rule, _)| rule.excludes(&child.id)) {
          debug!("Excluded {} with rule {} (dependency of {})", child.id, rule, owner);
          continue;
        }
        ok &= resolver.resolve(child);
      }
      ok
    })
  }

  /// Memoized single resolution. A failure is retried only when the new id
  /// names a preferred repository and the failed one did not.
  fn lookup(&mut self, id: &DependencyId) -> ResolvedDependency {
    if let Some(existing) = self.resolved.get(id) {
      let retry = existing.has_error && existing.id.preferred_repository.is_none() && id.preferred_repository.is_some();
      if !retry {
        return existing.clone();
      }
      debug!(dependency = %id, "retrying with preferred repository");
    }
    let resolved = resolve_single_dependency(id, self.repositories, self.retriever);
    self.resolved.insert(id.clone(), resolved.clone());
    resolved
  }

  /// Run `f` with `dependency` on the stack and its exclusions active.
  fn with_frame<R>(&mut self, dependency: &Dependency, f: impl FnOnce(&mut Self) -> R) -> R {
    let (stack_len, exclusions_len) = (self.stack.len(), self.exclusions.len());
    self.stack.push(dependency.id.clone());
    self
      .exclusions
      .extend(dependency.exclusions.iter().map(|rule| (rule.clone(), dependency.id.clone())));

    let result = f(self);

    self.stack.truncate(stack_len);
    self.exclusions.truncate(exclusions_len);
    result
  }
}

/// `a → b → ↪ c → d ↩`, where `c` is the id found again on the stack.
fn describe_cycle(stack: &[DependencyId], position: usize) -> String {
  let mut description = String::new();
  for id in &stack[..position] {
    description.push_str(&format!("{} → ", id));
  }
  let cycle: Vec<String> = stack[position..].iter().map(ToString::to_string).collect();
  description.push_str(&format!("↪ {} ↩", cycle.join(" → ")));
  description
}
