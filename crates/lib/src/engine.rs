//! The evaluation engine.
//!
//! [`Engine`] owns every definition, the scope graph, the bindings and the
//! global tick. Each top-level call ([`Engine::run`], [`Engine::evaluate`],
//! [`Engine::evaluate_task`]) advances the tick exactly once, so values read
//! repeatedly within one call are computed once.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::binding::{Binding, BindingId};
use crate::error::{DefinitionError, EvalError};
use crate::eval::EvalScope;
use crate::eval::input::{InputPrompter, input_pairs};
use crate::holder::{ArchetypeId, ConfigurationId, Definitions, HolderId, HolderMut, HolderOwner, ProjectId, unwrap_any};
use crate::key::{Key, KeyDefinition, KeyId, KeyInfo, KeyValue};
use crate::listener::{KeyEvaluationListener, ListenerSplitter};
use crate::scope::{Scope, ScopeGraph, ScopeId};

/// Definitions plus all evaluation state.
#[derive(Default)]
pub struct Engine {
  pub(crate) definitions: Definitions,
  pub(crate) scopes: ScopeGraph,
  pub(crate) bindings: Vec<Binding>,
  tick: u64,
  pub(crate) listener: Option<Rc<dyn KeyEvaluationListener>>,
  pub(crate) prompter: Option<Rc<dyn InputPrompter>>,
  /// (scope, key) pairs currently being evaluated, outermost first.
  pub(crate) evaluation_stack: Vec<(ScopeId, KeyId)>,
  /// A holder was edited since derived scopes last collected their holders.
  holders_changed: bool,
}

impl Engine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn key<V: KeyValue>(&mut self, definition: KeyDefinition<V>) -> Result<Key<V>, DefinitionError> {
    self.definitions.add_key(definition)
  }

  /// Declare a project. Later archetypes take precedence over earlier ones.
  pub fn project(&mut self, name: &str, archetypes: &[ArchetypeId]) -> Result<ProjectId, DefinitionError> {
    self.definitions.add_project(name, archetypes)
  }

  pub fn configuration(
    &mut self,
    name: &str,
    description: &str,
    parent: Option<ConfigurationId>,
  ) -> Result<ConfigurationId, DefinitionError> {
    self.definitions.add_configuration(name, description, parent)
  }

  pub fn archetype(&mut self, name: &str, parent: Option<ArchetypeId>) -> Result<ArchetypeId, DefinitionError> {
    self.definitions.add_archetype(name, parent)
  }

  /// Edit the bindings of a project, configuration, archetype or holder.
  ///
  /// Drops every cached binding, since lookups may now resolve differently.
  /// Derived scopes collect their holders again before the next lookup.
  pub fn holder(&mut self, owner: impl HolderOwner) -> HolderMut<'_> {
    self.clear_caches();
    self.holders_changed = true;
    let id = owner.holder_id(&self.definitions);
    HolderMut::new(&mut self.definitions, id)
  }

  pub fn definitions(&self) -> &Definitions {
    &self.definitions
  }

  pub fn scope(&self, id: ScopeId) -> &Scope {
    self.scopes.get(id)
  }

  pub fn project_scope(&mut self, project: ProjectId) -> ScopeId {
    self.refresh_scopes();
    self.scopes.project_scope(&self.definitions, project)
  }

  pub fn scope_for(&mut self, scope: ScopeId, configuration: ConfigurationId) -> ScopeId {
    self.refresh_scopes();
    self.scopes.scope_for(&self.definitions, scope, configuration)
  }

  fn refresh_scopes(&mut self) {
    if std::mem::take(&mut self.holders_changed) {
      trace!(scopes = self.scopes.len(), "refreshing scope holders");
      self.scopes.refresh_holders(&self.definitions);
    }
  }

  /// Scope of `project` with `configurations` layered in order.
  pub fn scope_with(&mut self, project: ProjectId, configurations: &[ConfigurationId]) -> ScopeId {
    let mut scope = self.project_scope(project);
    for &configuration in configurations {
      scope = self.scope_for(scope, configuration);
    }
    scope
  }

  pub fn binding(&self, id: BindingId) -> &Binding {
    &self.bindings[id.0]
  }

  /// Binding of `key` in `scope`, if one was looked up since the last cache clear.
  pub fn cached_binding(&self, scope: ScopeId, key: KeyId) -> Option<&Binding> {
    let id = self.scopes.get(scope).key_binding_cache.get(&key)?;
    Some(&self.bindings[id.0])
  }

  /// Current value of the global tick.
  pub fn tick(&self) -> u64 {
    self.tick
  }

  pub fn listener(&self) -> Option<&Rc<dyn KeyEvaluationListener>> {
    self.listener.as_ref()
  }

  pub fn set_listener(&mut self, listener: Option<Rc<dyn KeyEvaluationListener>>) {
    self.listener = listener;
  }

  /// Run `action` with `listener` receiving evaluation events, in addition to
  /// any listener already installed. The previous listener is restored after.
  pub fn with_listener<R>(
    &mut self,
    listener: Rc<dyn KeyEvaluationListener>,
    action: impl FnOnce(&mut Engine) -> R,
  ) -> R {
    let previous = self.listener.clone();
    self.listener = Some(match &previous {
      Some(active) => Rc::new(ListenerSplitter::new(vec![Rc::clone(active), listener])),
      None => listener,
    });
    let result = action(self);
    self.listener = previous;
    result
  }

  /// Source of interactive input; without one, missing inputs read as `None`.
  pub fn set_prompter(&mut self, prompter: Option<Rc<dyn InputPrompter>>) {
    self.prompter = prompter;
  }

  /// Forget all bindings and their cached values.
  pub fn clear_caches(&mut self) {
    if !self.bindings.is_empty() {
      debug!(bindings = self.bindings.len(), "clearing binding caches");
    }
    self.scopes.clear_binding_caches();
    self.bindings.clear();
  }

  /// Find the binding of `key` visible in `scope`, creating and caching it on first lookup.
  ///
  /// Holders of the scope are visited in order, then those of its parent
  /// scopes. The first value function found ends the search. Modifiers found
  /// on the way, including those of the holder with the value, are applied
  /// farthest first. Returns `None` when there is no value function and the
  /// key has no default.
  pub(crate) fn key_binding(&mut self, scope: ScopeId, key: KeyId) -> Option<BindingId> {
    self.refresh_scopes();
    if let Some(&id) = self.scopes.get(scope).key_binding_cache.get(&key) {
      return Some(id);
    }

    let mut groups = Vec::new();
    let mut sources = Vec::new();
    let mut found = None;
    'search: for visited in self.scopes.ancestry(scope) {
      for &holder_id in visited.holders() {
        let holder = self.definitions.holder(holder_id);
        if let Some(modifiers) = holder.modifiers.get(&key)
          && !modifiers.is_empty()
        {
          sources.push((visited.id(), holder_id, modifiers.len()));
          groups.push(modifiers.clone());
        }
        if let Some(value) = holder.values.get(&key) {
          found = Some((holder_id, Rc::clone(value)));
          break 'search;
        }
      }
    }

    if found.is_none() && !self.definitions.key(key).has_default() {
      self.report_modifiers(&sources);
      return None;
    }
    let modifiers = groups.into_iter().rev().flatten().collect();
    let (holder, value) = found.unzip();
    let id = BindingId(self.bindings.len());
    trace!(key = %self.definitions.key(key), scope = %self.scopes.get(scope), ?holder, "created binding");
    let mut binding = Binding::new(id, key, scope, holder, value, modifiers);
    binding.modifier_sources = sources;
    self.bindings.push(binding);
    self.scopes.get_mut(scope).key_binding_cache.insert(key, id);
    Some(id)
  }

  /// Tell the listener which holders contribute modifiers, as (scope, holder, amount).
  pub(crate) fn report_modifiers(&self, sources: &[(ScopeId, HolderId, usize)]) {
    if let Some(listener) = &self.listener {
      for &(scope, holder, amount) in sources {
        listener.key_evaluation_has_modifiers(self.scopes.get(scope), self.definitions.holder(holder), amount);
      }
    }
  }

  /// Run `action` in the scope of `project` with `configurations` layered, as one tick.
  pub fn run<R>(
    &mut self,
    project: ProjectId,
    configurations: &[ConfigurationId],
    action: impl FnOnce(&mut EvalScope<'_>) -> Result<R, EvalError>,
  ) -> Result<R, EvalError> {
    self.tick += 1;
    let scope = self.scope_with(project, configurations);
    let mut used_bindings = Vec::new();
    let mut expiration_triggers = Vec::new();
    let mut root = EvalScope::new(
      self,
      scope,
      configurations.to_vec(),
      &mut used_bindings,
      &mut expiration_triggers,
      Rc::from(Vec::new()),
    );
    let result = action(&mut root);
    root.close();
    result
  }

  /// Evaluate `key` with `input` in `project` with `configurations` layered.
  pub fn evaluate<V: KeyValue>(
    &mut self,
    project: ProjectId,
    configurations: &[ConfigurationId],
    key: &Key<V>,
    input: &[(&str, &str)],
  ) -> Result<V, EvalError> {
    let input = input_pairs(input);
    let value = self.run(project, configurations, |scope| scope.get_erased(key.id(), input))?;
    unwrap_any(key.name(), value)
  }

  /// Evaluate a task given by names.
  ///
  /// `default_project` is used when the task names none.
  pub fn evaluate_task(&mut self, task: &Task, default_project: Option<ProjectId>) -> TaskOutcome {
    let project = match &task.project {
      Some(name) => match self.definitions.find_project(name) {
        Some(project) => project,
        None => return TaskOutcome::NoProject(Some(name.clone())),
      },
      None => match default_project {
        Some(project) => project,
        None => return TaskOutcome::NoProject(None),
      },
    };

    let mut configurations = Vec::with_capacity(task.configurations.len());
    for name in &task.configurations {
      match self.definitions.find_configuration(name) {
        Some(configuration) => configurations.push(configuration),
        None => return TaskOutcome::NoConfiguration(name.clone()),
      }
    }

    let Some(key) = self.definitions.find_key(&task.key).cloned() else {
      return TaskOutcome::NoKey(task.key.clone());
    };

    let input = input_pairs(task.input.as_slice());
    match self.run(project, &configurations, |scope| scope.get_erased(key.id(), input)) {
      Ok(value) => TaskOutcome::Success { key, value },
      Err(error) if matches!(error, EvalError::KeyNotAssigned { .. }) => TaskOutcome::NotAssigned(error),
      Err(error) => TaskOutcome::Failed(error),
    }
  }
}

impl fmt::Debug for Engine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Engine")
      .field("keys", &self.definitions.keys.len())
      .field("projects", &self.definitions.projects.len())
      .field("scopes", &self.scopes.len())
      .field("bindings", &self.bindings.len())
      .field("tick", &self.tick)
      .finish()
  }
}

/// A key to evaluate, named by project, configurations and key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Task {
  pub project: Option<String>,
  pub configurations: Vec<String>,
  pub key: String,
  pub input: Vec<(String, String)>,
}

impl Task {
  pub fn new(key: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      ..Self::default()
    }
  }

  pub fn project(mut self, project: impl Into<String>) -> Self {
    self.project = Some(project.into());
    self
  }

  pub fn configuration(mut self, configuration: impl Into<String>) -> Self {
    self.configurations.push(configuration.into());
    self
  }

  pub fn input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.input.push((key.into(), value.into()));
    self
  }
}

impl fmt::Display for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(project) = &self.project {
      write!(f, "{}/", project)?;
    }
    for configuration in &self.configurations {
      write!(f, "{}:", configuration)?;
    }
    f.write_str(&self.key)
  }
}

/// Result of [`Engine::evaluate_task`].
pub enum TaskOutcome {
  Success { key: Rc<KeyInfo>, value: Rc<dyn Any> },
  /// The named project does not exist, or no project was named and there is no default.
  NoProject(Option<String>),
  NoConfiguration(String),
  NoKey(String),
  /// The requested key itself has no binding and no default.
  NotAssigned(EvalError),
  Failed(EvalError),
}

impl TaskOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, TaskOutcome::Success { .. })
  }

  /// The value formatted with its key's `Debug` representation.
  pub fn formatted_value(&self) -> Option<String> {
    match self {
      TaskOutcome::Success { key, value } => key.format_value(value.as_ref()),
      _ => None,
    }
  }

  /// The value, if evaluation succeeded and it is a `V`.
  pub fn value<V: KeyValue>(&self) -> Option<V> {
    match self {
      TaskOutcome::Success { value, .. } => value.downcast_ref::<V>().cloned(),
      _ => None,
    }
  }

  /// The outcome as an error, for callers that don't distinguish the cases.
  pub fn into_result(self) -> Result<Rc<dyn Any>, EvalError> {
    match self {
      TaskOutcome::Success { value, .. } => Ok(value),
      TaskOutcome::NoProject(name) => Err(EvalError::NoSuchProject(name.unwrap_or_default())),
      TaskOutcome::NoConfiguration(name) => Err(EvalError::NoSuchConfiguration(name)),
      TaskOutcome::NoKey(name) => Err(EvalError::NoSuchKey(name)),
      TaskOutcome::NotAssigned(error) | TaskOutcome::Failed(error) => Err(error),
    }
  }
}

impl fmt::Debug for TaskOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskOutcome::Success { key, .. } => f
        .debug_struct("Success")
        .field("key", &key.name())
        .field("value", &self.formatted_value())
        .finish(),
      TaskOutcome::NoProject(name) => f.debug_tuple("NoProject").field(name).finish(),
      TaskOutcome::NoConfiguration(name) => f.debug_tuple("NoConfiguration").field(name).finish(),
      TaskOutcome::NoKey(name) => f.debug_tuple("NoKey").field(name).finish(),
      TaskOutcome::NotAssigned(error) => f.debug_tuple("NotAssigned").field(error).finish(),
      TaskOutcome::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
    }
  }
}
