//! Keys every build needs, and the archetype that binds them.
//!
//! A project created with [`StandardKeys::archetype`] only has to set
//! `library_dependencies` (and usually `repositories`) to get its
//! `external_classpath`.

use std::path::PathBuf;

use crate::dependency::{
  Dependency, DependencyMapper, Repository, Resolution, artifacts, create_repository_chain, default_repositories,
  dependency_tree_with, resolve_dependencies,
};
use crate::engine::Engine;
use crate::error::{DefinitionError, EvalError};
use crate::holder::ArchetypeId;
use crate::key::{Key, KeyDefinition};

/// Name of the archetype binding the standard keys.
pub const BASE_ARCHETYPE: &str = "base";

#[derive(Debug, Clone)]
pub struct StandardKeys {
  pub repositories: Key<Vec<Repository>>,
  pub repository_chain: Key<Vec<Repository>>,
  pub library_dependencies: Key<Vec<Dependency>>,
  pub library_dependency_mapper: Key<DependencyMapper>,
  pub resolved_library_dependencies: Key<Resolution>,
  pub external_classpath: Key<Vec<PathBuf>>,
  pub archetype: ArchetypeId,
}

impl StandardKeys {
  /// Define the keys in `engine` and bind them in the base archetype.
  pub fn register(engine: &mut Engine) -> Result<Self, DefinitionError> {
    let keys = Self {
      repositories: engine.key(KeyDefinition::new(
        "repositories",
        "Repositories to search for library dependencies",
      ))?,
      repository_chain: engine.key(KeyDefinition::new(
        "repositoryChain",
        "Repositories with their caches, in search order",
      ))?,
      library_dependencies: engine.key(
        KeyDefinition::new("libraryDependencies", "Libraries the project depends on").default_value(Vec::new()),
      )?,
      library_dependency_mapper: engine.key(
        KeyDefinition::new(
          "libraryDependencyMapper",
          "Rewrites every library dependency before it is resolved",
        )
        .default_value(DependencyMapper::identity()),
      )?,
      resolved_library_dependencies: engine.key(KeyDefinition::new(
        "resolvedLibraryDependencies",
        "Library dependencies and everything they depend on",
      ))?,
      external_classpath: engine.key(KeyDefinition::new(
        "externalClasspath",
        "Artifacts of all resolved library dependencies",
      ))?,
      archetype: engine.archetype(BASE_ARCHETYPE, None)?,
    };
    keys.bind(engine);
    Ok(keys)
  }

  fn bind(&self, engine: &mut Engine) {
    let mut holder = engine.holder(self.archetype);

    holder.set(&self.repositories, |_| default_repositories().map_err(EvalError::other));

    let repositories = self.repositories.clone();
    holder.set(&self.repository_chain, move |scope| {
      Ok(create_repository_chain(&scope.get(&repositories)?))
    });

    let (dependencies, chain, mapper) = (
      self.library_dependencies.clone(),
      self.repository_chain.clone(),
      self.library_dependency_mapper.clone(),
    );
    holder.set(&self.resolved_library_dependencies, move |scope| {
      let dependencies = scope.get(&dependencies)?;
      let chain = scope.get(&chain)?;
      let mapper = scope.get(&mapper)?;
      resolve_dependencies(&dependencies, &chain, |dependency| mapper.apply(dependency)).map_err(EvalError::other)
    });

    let (resolved, dependencies, mapper) = (
      self.resolved_library_dependencies.clone(),
      self.library_dependencies.clone(),
      self.library_dependency_mapper.clone(),
    );
    holder.set(&self.external_classpath, move |scope| {
      let resolution = scope.get(&resolved)?;
      if !resolution.ok {
        let roots = scope.get(&dependencies)?;
        let mapper = scope.get(&mapper)?;
        let tree = dependency_tree_with(&roots, &resolution.resolved, |dependency| mapper.apply(dependency));
        return Err(EvalError::msg(format!("failed to resolve library dependencies\n{}", tree)));
      }
      Ok(artifacts(&resolution.resolved))
    });
  }
}
