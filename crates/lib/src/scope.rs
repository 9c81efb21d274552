//! The scope graph.
//!
//! A [`Scope`] is a project plus an ordered stack of layered configurations.
//! Scopes are canonical: deriving the same stack twice yields the same
//! [`ScopeId`], so each scope's key binding cache is shared by every path that
//! reaches it.
//!
//! Layering a configuration `C` onto scope `S` creates a child scope whose
//! holders are, for `C` and then each of its parents: the extensions of that
//! configuration found in `S`'s holders (and the holders of `S`'s ancestors,
//! nearest first), followed by the configuration's own holder. Lookups visit a
//! scope's holders in order and then continue in the parent scope.
//!
//! Layering a configuration that is already on the stack is not deduplicated:
//! it produces a distinct, longer stack.

use std::collections::HashMap;
use std::fmt;

use crate::binding::BindingId;
use crate::holder::{ConfigurationId, Definitions, HolderId, ProjectId};
use crate::key::KeyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub(crate) usize);

/// A project with a stack of layered configurations.
#[derive(Debug)]
pub struct Scope {
  id: ScopeId,
  project: ProjectId,
  configurations: Vec<ConfigurationId>,
  holders: Vec<HolderId>,
  parent: Option<ScopeId>,
  name: String,
  pub(crate) key_binding_cache: HashMap<KeyId, BindingId>,
}

impl Scope {
  pub fn id(&self) -> ScopeId {
    self.id
  }

  pub fn project(&self) -> ProjectId {
    self.project
  }

  /// Layered configurations, first layered first.
  pub fn configurations(&self) -> &[ConfigurationId] {
    &self.configurations
  }

  /// Holders contributed by this scope, in lookup order.
  pub fn holders(&self) -> &[HolderId] {
    &self.holders
  }

  /// Scope this one was layered on; `None` for a project's base scope.
  pub fn parent(&self) -> Option<ScopeId> {
    self.parent
  }

  /// Number of cached key bindings.
  pub fn cached_bindings(&self) -> usize {
    self.key_binding_cache.len()
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

/// Canonical table of derived scopes.
#[derive(Debug, Default)]
pub(crate) struct ScopeGraph {
  scopes: Vec<Scope>,
  index: HashMap<(ProjectId, Vec<ConfigurationId>), ScopeId>,
}

impl ScopeGraph {
  pub fn get(&self, id: ScopeId) -> &Scope {
    &self.scopes[id.0]
  }

  pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
    &mut self.scopes[id.0]
  }

  pub fn len(&self) -> usize {
    self.scopes.len()
  }

  /// Base scope of a project.
  pub fn project_scope(&mut self, definitions: &Definitions, project: ProjectId) -> ScopeId {
    if let Some(&id) = self.index.get(&(project, Vec::new())) {
      return id;
    }
    let name = format!("{}/", definitions.project(project).name);
    let holders = definitions.project_holders(project);
    self.insert(project, Vec::new(), holders, None, name)
  }

  /// Scope created by layering `configuration` over `scope`.
  pub fn scope_for(&mut self, definitions: &Definitions, scope: ScopeId, configuration: ConfigurationId) -> ScopeId {
    let base = &self.scopes[scope.0];
    let project = base.project;
    let mut stack = base.configurations.clone();
    stack.push(configuration);
    if let Some(&id) = self.index.get(&(project, stack.clone())) {
      return id;
    }

    let holders = self.layer_holders(definitions, scope, configuration);
    let name = format!("{}{}:", self.scopes[scope.0].name, definitions.configuration(configuration).name);
    self.insert(project, stack, holders, Some(scope), name)
  }

  /// Holders contributed by layering `configuration` over `scope`.
  fn layer_holders(&self, definitions: &Definitions, scope: ScopeId, configuration: ConfigurationId) -> Vec<HolderId> {
    let mut holders = Vec::new();
    for conf in definitions.configuration_chain(configuration) {
      for outer in self.ancestry(scope) {
        for holder in &outer.holders {
          if let Some(&extension) = definitions.holder(*holder).extensions.get(&conf)
            && !holders.contains(&extension)
          {
            holders.push(extension);
          }
        }
      }
      holders.push(definitions.configuration(conf).holder);
    }
    holders
  }

  /// Recompute the holders of every derived scope, picking up extensions
  /// added since the scopes were derived.
  pub fn refresh_holders(&mut self, definitions: &Definitions) {
    // parents always precede their children
    for index in 0..self.scopes.len() {
      let scope = &self.scopes[index];
      let holders = match (scope.parent, scope.configurations.last()) {
        (Some(parent), Some(&configuration)) => self.layer_holders(definitions, parent, configuration),
        _ => definitions.project_holders(scope.project),
      };
      self.scopes[index].holders = holders;
    }
  }

  fn insert(
    &mut self,
    project: ProjectId,
    configurations: Vec<ConfigurationId>,
    holders: Vec<HolderId>,
    parent: Option<ScopeId>,
    name: String,
  ) -> ScopeId {
    let id = ScopeId(self.scopes.len());
    self.index.insert((project, configurations.clone()), id);
    self.scopes.push(Scope {
      id,
      project,
      configurations,
      holders,
      parent,
      name,
      key_binding_cache: HashMap::new(),
    });
    id
  }

  /// Scope followed by its ancestors.
  pub fn ancestry(&self, scope: ScopeId) -> impl Iterator<Item = &Scope> {
    let mut current = Some(scope);
    std::iter::from_fn(move || {
      let scope = &self.scopes[current?.0];
      current = scope.parent;
      Some(scope)
    })
  }

  pub fn clear_binding_caches(&mut self) {
    for scope in &mut self.scopes {
      scope.key_binding_cache.clear();
    }
  }
}
