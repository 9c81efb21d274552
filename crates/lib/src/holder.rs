//! Binding holders and the definitions they belong to.
//!
//! Projects, configurations, archetypes and configuration extensions all own a
//! [`BindingHolder`]: a store mapping keys to a value function and to a list of
//! value modifiers. [`Definitions`] is the arena all of them live in.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{DefinitionError, EvalError};
use crate::eval::EvalScope;
use crate::key::{Key, KeyDefinition, KeyId, KeyInfo, KeyValue};

pub(crate) type ErasedValue = Rc<dyn Fn(&mut EvalScope<'_>) -> Result<Rc<dyn Any>, EvalError>>;
pub(crate) type ErasedModifier = Rc<dyn Fn(&mut EvalScope<'_>, Rc<dyn Any>) -> Result<Rc<dyn Any>, EvalError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HolderId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigurationId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchetypeId(pub(crate) usize);

/// What a binding holder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderKind {
  Project(ProjectId),
  Configuration(ConfigurationId),
  Archetype(ArchetypeId),
  /// Bindings of `owner` that apply only when `configuration` is layered over it.
  Extension {
    owner: HolderId,
    configuration: ConfigurationId,
  },
}

/// Mutable store of key bindings.
pub struct BindingHolder {
  name: String,
  kind: HolderKind,
  pub(crate) values: HashMap<KeyId, ErasedValue>,
  pub(crate) modifiers: HashMap<KeyId, Vec<ErasedModifier>>,
  pub(crate) extensions: HashMap<ConfigurationId, HolderId>,
}

impl BindingHolder {
  fn new(name: String, kind: HolderKind) -> Self {
    Self {
      name,
      kind,
      values: HashMap::new(),
      modifiers: HashMap::new(),
      extensions: HashMap::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> HolderKind {
    self.kind
  }

  /// Whether a value function is bound to `key` here.
  pub fn binds(&self, key: KeyId) -> bool {
    self.values.contains_key(&key)
  }

  /// Number of modifiers registered for `key` here.
  pub fn modifier_count(&self, key: KeyId) -> usize {
    self.modifiers.get(&key).map(Vec::len).unwrap_or(0)
  }
}

impl fmt::Debug for BindingHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BindingHolder")
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("values", &self.values.len())
      .field("modifiers", &self.modifiers.len())
      .finish()
  }
}

impl fmt::Display for BindingHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

/// Root namespace owning its own default bindings.
#[derive(Debug, Clone)]
pub struct Project {
  pub name: String,
  pub holder: HolderId,
  /// Archetypes in declaration order; later ones take precedence.
  pub archetypes: Vec<ArchetypeId>,
}

/// Named overlay that alters key bindings when layered onto a scope.
#[derive(Debug, Clone)]
pub struct Configuration {
  pub name: String,
  pub description: String,
  pub parent: Option<ConfigurationId>,
  pub holder: HolderId,
}

/// Reusable set of bindings shared by projects.
#[derive(Debug, Clone)]
pub struct Archetype {
  pub name: String,
  pub parent: Option<ArchetypeId>,
  pub holder: HolderId,
}

/// Anything owning a binding holder.
pub trait HolderOwner {
  fn holder_id(self, definitions: &Definitions) -> HolderId;
}

impl HolderOwner for HolderId {
  fn holder_id(self, _definitions: &Definitions) -> HolderId {
    self
  }
}

impl HolderOwner for ProjectId {
  fn holder_id(self, definitions: &Definitions) -> HolderId {
    definitions.projects[self.0].holder
  }
}

impl HolderOwner for ConfigurationId {
  fn holder_id(self, definitions: &Definitions) -> HolderId {
    definitions.configurations[self.0].holder
  }
}

impl HolderOwner for ArchetypeId {
  fn holder_id(self, definitions: &Definitions) -> HolderId {
    definitions.archetypes[self.0].holder
  }
}

/// Arena of every key, holder, project, configuration and archetype.
#[derive(Default)]
pub struct Definitions {
  pub(crate) keys: Vec<Rc<KeyInfo>>,
  pub(crate) holders: Vec<BindingHolder>,
  pub(crate) projects: Vec<Project>,
  pub(crate) configurations: Vec<Configuration>,
  pub(crate) archetypes: Vec<Archetype>,
  key_names: HashMap<String, KeyId>,
}

impl Definitions {
  pub(crate) fn add_key<V: KeyValue>(&mut self, definition: KeyDefinition<V>) -> Result<Key<V>, DefinitionError> {
    if self.key_names.contains_key(definition.name()) {
      return Err(DefinitionError::DuplicateKey(definition.name().to_string()));
    }
    let id = KeyId(self.keys.len());
    let key = definition.into_key(id);
    self.key_names.insert(key.name().to_string(), id);
    self.keys.push(Rc::clone(key.info()));
    Ok(key)
  }

  pub(crate) fn add_project(&mut self, name: &str, archetypes: &[ArchetypeId]) -> Result<ProjectId, DefinitionError> {
    if self.projects.iter().any(|p| p.name == name) {
      return Err(DefinitionError::DuplicateProject(name.to_string()));
    }
    let id = ProjectId(self.projects.len());
    let holder = self.add_holder(name.to_string(), HolderKind::Project(id));
    self.projects.push(Project {
      name: name.to_string(),
      holder,
      archetypes: archetypes.to_vec(),
    });
    Ok(id)
  }

  pub(crate) fn add_configuration(
    &mut self,
    name: &str,
    description: &str,
    parent: Option<ConfigurationId>,
  ) -> Result<ConfigurationId, DefinitionError> {
    if self.configurations.iter().any(|c| c.name == name) {
      return Err(DefinitionError::DuplicateConfiguration(name.to_string()));
    }
    let id = ConfigurationId(self.configurations.len());
    let holder = self.add_holder(format!("{}:", name), HolderKind::Configuration(id));
    self.configurations.push(Configuration {
      name: name.to_string(),
      description: description.to_string(),
      parent,
      holder,
    });
    Ok(id)
  }

  pub(crate) fn add_archetype(&mut self, name: &str, parent: Option<ArchetypeId>) -> Result<ArchetypeId, DefinitionError> {
    if self.archetypes.iter().any(|a| a.name == name) {
      return Err(DefinitionError::DuplicateArchetype(name.to_string()));
    }
    let id = ArchetypeId(self.archetypes.len());
    let holder = self.add_holder(format!("{}.archetype", name), HolderKind::Archetype(id));
    self.archetypes.push(Archetype {
      name: name.to_string(),
      parent,
      holder,
    });
    Ok(id)
  }

  fn add_holder(&mut self, name: String, kind: HolderKind) -> HolderId {
    let id = HolderId(self.holders.len());
    self.holders.push(BindingHolder::new(name, kind));
    id
  }

  pub fn key(&self, id: KeyId) -> &Rc<KeyInfo> {
    &self.keys[id.0]
  }

  pub fn holder(&self, id: HolderId) -> &BindingHolder {
    &self.holders[id.0]
  }

  pub fn project(&self, id: ProjectId) -> &Project {
    &self.projects[id.0]
  }

  pub fn configuration(&self, id: ConfigurationId) -> &Configuration {
    &self.configurations[id.0]
  }

  pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
    &self.archetypes[id.0]
  }

  pub fn keys(&self) -> impl Iterator<Item = &Rc<KeyInfo>> {
    self.keys.iter()
  }

  pub fn find_key(&self, name: &str) -> Option<&Rc<KeyInfo>> {
    if let Some(id) = self.key_names.get(name) {
      return Some(&self.keys[id.0]);
    }
    self.keys.iter().find(|k| k.name().eq_ignore_ascii_case(name))
  }

  pub fn find_project(&self, name: &str) -> Option<ProjectId> {
    find_case_insensitive(self.projects.iter().map(|p| p.name.as_str()), name).map(ProjectId)
  }

  pub fn find_configuration(&self, name: &str) -> Option<ConfigurationId> {
    find_case_insensitive(self.configurations.iter().map(|c| c.name.as_str()), name).map(ConfigurationId)
  }

  /// Holders of a project's base scope: the project, then its archetypes from
  /// the last declared to the first, each followed by its parent chain.
  pub(crate) fn project_holders(&self, project: ProjectId) -> Vec<HolderId> {
    let project = &self.projects[project.0];
    let mut holders = vec![project.holder];
    for &archetype in project.archetypes.iter().rev() {
      let mut current = Some(archetype);
      while let Some(id) = current {
        let archetype = &self.archetypes[id.0];
        if !holders.contains(&archetype.holder) {
          holders.push(archetype.holder);
        }
        current = archetype.parent;
      }
    }
    holders
  }

  /// The configuration followed by its parent chain.
  pub(crate) fn configuration_chain(&self, configuration: ConfigurationId) -> Vec<ConfigurationId> {
    let mut chain = Vec::new();
    let mut current = Some(configuration);
    while let Some(id) = current {
      if chain.contains(&id) {
        break;
      }
      chain.push(id);
      current = self.configurations[id.0].parent;
    }
    chain
  }
}

fn find_case_insensitive<'a>(names: impl Iterator<Item = &'a str> + Clone, name: &str) -> Option<usize> {
  names
    .clone()
    .position(|candidate| candidate == name)
    .or_else(|| names.into_iter().position(|candidate| candidate.eq_ignore_ascii_case(name)))
}

pub(crate) fn unwrap_any<V: KeyValue>(key: &str, value: Rc<dyn Any>) -> Result<V, EvalError> {
  match value.downcast::<V>() {
    Ok(value) => Ok(Rc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())),
    Err(_) => Err(EvalError::TypeMismatch {
      key: key.to_string(),
      expected: std::any::type_name::<V>(),
    }),
  }
}

/// Mutable view of one binding holder.
pub struct HolderMut<'a> {
  definitions: &'a mut Definitions,
  id: HolderId,
}

impl<'a> HolderMut<'a> {
  pub(crate) fn new(definitions: &'a mut Definitions, id: HolderId) -> Self {
    Self { definitions, id }
  }

  pub fn id(&self) -> HolderId {
    self.id
  }

  fn holder(&mut self) -> &mut BindingHolder {
    &mut self.definitions.holders[self.id.0]
  }

  /// Bind a value function to `key`, replacing any previous one in this holder.
  pub fn set<V, F>(&mut self, key: &Key<V>, value: F) -> &mut Self
  where
    V: KeyValue,
    F: Fn(&mut EvalScope<'_>) -> Result<V, EvalError> + 'static,
  {
    let erased: ErasedValue = Rc::new(move |scope: &mut EvalScope<'_>| value(scope).map(|v| Rc::new(v) as Rc<dyn Any>));
    self.holder().values.insert(key.id(), erased);
    self
  }

  /// Bind a constant.
  pub fn set_value<V: KeyValue>(&mut self, key: &Key<V>, value: V) -> &mut Self {
    self.set(key, move |_| Ok(value.clone()))
  }

  /// Add a modifier transforming the value of `key` found here or in a farther holder.
  pub fn modify<V, F>(&mut self, key: &Key<V>, modifier: F) -> &mut Self
  where
    V: KeyValue,
    F: Fn(&mut EvalScope<'_>, V) -> Result<V, EvalError> + 'static,
  {
    let name = key.name().to_string();
    let erased: ErasedModifier = Rc::new(move |scope: &mut EvalScope<'_>, original: Rc<dyn Any>| {
      let original = unwrap_any::<V>(&name, original)?;
      modifier(scope, original).map(|v| Rc::new(v) as Rc<dyn Any>)
    });
    self.holder().modifiers.entry(key.id()).or_default().push(erased);
    self
  }

  /// Add a modifier appending one element to a list key.
  pub fn add<T, F>(&mut self, key: &Key<Vec<T>>, item: F) -> &mut Self
  where
    T: KeyValue,
    F: Fn(&mut EvalScope<'_>) -> Result<T, EvalError> + 'static,
  {
    self.modify(key, move |scope, mut list: Vec<T>| {
      list.push(item(scope)?);
      Ok(list)
    })
  }

  /// Remove the value function and all modifiers of `key` from this holder.
  pub fn unset<V>(&mut self, key: &Key<V>) -> &mut Self {
    let holder = self.holder();
    holder.values.remove(&key.id());
    holder.modifiers.remove(&key.id());
    self
  }

  /// Bindings that apply only when `configuration` is layered over this holder's scope.
  pub fn extend(&mut self, configuration: ConfigurationId) -> HolderMut<'_> {
    let owner = self.id;
    let existing = self.definitions.holders[owner.0].extensions.get(&configuration).copied();
    let id = match existing {
      Some(id) => id,
      None => {
        let name = format!(
          "{}.extend({}:)",
          self.definitions.holders[owner.0].name, self.definitions.configurations[configuration.0].name
        );
        let id = self
          .definitions
          .add_holder(name, HolderKind::Extension { owner, configuration });
        self.definitions.holders[owner.0].extensions.insert(configuration, id);
        id
      }
    };
    HolderMut::new(self.definitions, id)
  }
}
