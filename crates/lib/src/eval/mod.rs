//! Evaluation scopes.
//!
//! An [`EvalScope`] is handed to every value function and modifier. All key
//! reads go through it, so it can record which bindings the running
//! evaluation depends on and which expiration triggers it registers. A scope
//! is only valid for the call it was created for; the borrow it holds on the
//! [`Engine`] keeps it from escaping, and [`EvalScope::close`] makes any
//! further use fail with [`EvalError::ScopeClosed`].

pub mod input;

use std::any::Any;
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;

use tracing::debug;

use crate::binding::{self, BindingId, ExpirationTrigger, LastEvaluated};
use crate::engine::Engine;
use crate::error::{EvalError, FailureOrigin};
use crate::holder::{ConfigurationId, Definitions, ErasedModifier, ProjectId, unwrap_any};
use crate::key::{Key, KeyId, KeyInfo, KeyValue};
use crate::listener::{FEATURE_EXPIRATION_TRIGGERS, KeyEvaluationListener};
use crate::scope::{Scope, ScopeId};

use input::{InputPairs, InputReader, Validator, prompt_until_valid};

/// Context of one value function or modifier call.
pub struct EvalScope<'e> {
  engine: &'e mut Engine,
  scope: ScopeId,
  configuration_prefix: Vec<ConfigurationId>,
  used_bindings: &'e mut Vec<BindingId>,
  expiration_triggers: &'e mut Vec<ExpirationTrigger>,
  input: InputReader,
  closed: bool,
}

fn empty_input() -> InputPairs {
  Rc::from(Vec::new())
}

impl<'e> EvalScope<'e> {
  pub(crate) fn new(
    engine: &'e mut Engine,
    scope: ScopeId,
    configuration_prefix: Vec<ConfigurationId>,
    used_bindings: &'e mut Vec<BindingId>,
    expiration_triggers: &'e mut Vec<ExpirationTrigger>,
    input: InputPairs,
  ) -> Self {
    Self {
      engine,
      scope,
      configuration_prefix,
      used_bindings,
      expiration_triggers,
      input: InputReader::new(input),
      closed: false,
    }
  }

  /// Make this scope unusable. Every later operation fails with [`EvalError::ScopeClosed`].
  pub fn close(&mut self) {
    self.closed = true;
  }

  pub fn is_closed(&self) -> bool {
    self.closed
  }

  fn ensure_open(&self) -> Result<(), EvalError> {
    if self.closed {
      return Err(EvalError::ScopeClosed);
    }
    Ok(())
  }

  pub fn scope(&self) -> &Scope {
    self.engine.scopes.get(self.scope)
  }

  pub fn scope_id(&self) -> ScopeId {
    self.scope
  }

  /// Configurations layered by the `using` calls that led here.
  pub fn configuration_prefix(&self) -> &[ConfigurationId] {
    &self.configuration_prefix
  }

  /// Input of the key being evaluated.
  pub fn input(&self) -> &[(String, String)] {
    self.input.pairs()
  }

  pub fn definitions(&self) -> &Definitions {
    &self.engine.definitions
  }

  /// Value of `key` in this scope.
  pub fn get<V: KeyValue>(&mut self, key: &Key<V>) -> Result<V, EvalError> {
    self.get_with_input(key, &[])
  }

  /// Value of `key` evaluated with `input`.
  pub fn get_with_input<V: KeyValue>(&mut self, key: &Key<V>, input: &[(&str, &str)]) -> Result<V, EvalError> {
    let value = self.get_erased(key.id(), input::input_pairs(input))?;
    unwrap_any(key.name(), value)
  }

  /// Value of `key`, or `fallback` when the key has neither a binding nor a default.
  pub fn get_or_else<V: KeyValue>(&mut self, key: &Key<V>, fallback: V) -> Result<V, EvalError> {
    match self.get_key_value(key.id(), empty_input(), true)? {
      Some(value) => unwrap_any(key.name(), value),
      None => Ok(fallback),
    }
  }

  /// Untyped read, for callers that only know the key by name.
  pub fn get_erased(&mut self, key: KeyId, input: InputPairs) -> Result<Rc<dyn Any>, EvalError> {
    match self.get_key_value(key, input, false)? {
      Some(value) => Ok(value),
      None => Err(self.not_assigned(key)),
    }
  }

  fn not_assigned(&self, key: KeyId) -> EvalError {
    EvalError::KeyNotAssigned {
      key: self.engine.definitions.key(key).name().to_string(),
      scope: self.scope().to_string(),
    }
  }

  fn get_key_value(&mut self, key: KeyId, input: InputPairs, use_fallback: bool) -> Result<Option<Rc<dyn Any>>, EvalError> {
    self.ensure_open()?;
    let info = Rc::clone(self.engine.definitions.key(key));
    let listener = self.engine.listener.clone();
    if let Some(listener) = &listener {
      listener.key_evaluation_started(self.scope(), &info);
    }

    let Some(binding) = self.engine.key_binding(self.scope, key) else {
      if let Some(listener) = &listener {
        listener.key_evaluation_failed_by_no_binding(&info, use_fallback);
      }
      if use_fallback {
        return Ok(None);
      }
      return Err(self.not_assigned(key));
    };
    self.used_bindings.push(binding);
    if listener.is_some() {
      self.engine.report_modifiers(&self.engine.bindings[binding.0].modifier_sources);
    }

    let freshness = binding::freshness(&self.engine.bindings, binding, &input, self.engine.tick());
    if let Some(listener) = &listener {
      listener.key_evaluation_feature(freshness.message());
    }

    let cached = if freshness.is_fresh() {
      self.engine.bindings[binding.0].state.value.clone()
    } else {
      None
    };
    let value = match cached {
      Some(value) => value,
      None => {
        debug!(key = %info, scope = %self.scope(), reason = %freshness, "evaluating binding");
        self.evaluate_binding(binding, &info, input, listener.as_deref())?
      }
    };

    if let Some(listener) = &listener {
      listener.key_evaluation_succeeded(&info, &self.engine.bindings[binding.0], value.as_ref());
    }
    Ok(Some(value))
  }

  fn evaluate_binding(
    &mut self,
    id: BindingId,
    info: &Rc<KeyInfo>,
    input: InputPairs,
    listener: Option<&dyn KeyEvaluationListener>,
  ) -> Result<Rc<dyn Any>, EvalError> {
    let frame = (self.scope, info.id());
    if let Some(start) = self.engine.evaluation_stack.iter().position(|f| *f == frame) {
      let mut path: Vec<&str> = self.engine.evaluation_stack[start..]
        .iter()
        .map(|(_, key)| self.engine.definitions.key(*key).name())
        .collect();
      path.push(info.name());
      let error = EvalError::CyclicEvaluation {
        path: path.join(" → "),
      };
      if let Some(listener) = listener {
        listener.key_evaluation_failed_by_error(info, &error, true);
      }
      return Err(error);
    }

    let mut depends_on = Vec::new();
    let mut triggers = Vec::new();
    self.engine.evaluation_stack.push(frame);
    let result = {
      let mut child = EvalScope::new(
        &mut *self.engine,
        self.scope,
        Vec::new(),
        &mut depends_on,
        &mut triggers,
        Rc::clone(&input),
      );
      let result = child.run_binding(id, info, listener);
      child.close();
      result
    };
    self.engine.evaluation_stack.pop();
    let value = result?;

    if !triggers.is_empty()
      && let Some(listener) = listener
    {
      listener.key_evaluation_feature(FEATURE_EXPIRATION_TRIGGERS);
    }

    let tick = self.engine.tick();
    let state = &mut self.engine.bindings[id.0].state;
    state.last_evaluated = LastEvaluated::Tick(tick);
    state.input = Some(input);
    state.value = Some(Rc::clone(&value));
    state.depends_on = depends_on;
    state.triggers = triggers;
    self.engine.scopes.get_mut(self.scope).key_binding_cache.insert(info.id(), id);
    Ok(value)
  }

  fn run_binding(
    &mut self,
    id: BindingId,
    info: &Rc<KeyInfo>,
    listener: Option<&dyn KeyEvaluationListener>,
  ) -> Result<Rc<dyn Any>, EvalError> {
    let binding = &self.engine.bindings[id.0];
    let value_fn = binding.value.clone();
    let modifiers: Vec<ErasedModifier> = binding.modifiers.clone();

    let mut value = match value_fn {
      Some(value_fn) => value_fn(self).map_err(|e| self.failure(info, e, FailureOrigin::Value, listener))?,
      None => match info.default_value() {
        Some(default) => default,
        None => return Err(self.not_assigned(info.id())),
      },
    };
    for modifier in &modifiers {
      value = modifier(self, value).map_err(|e| self.failure(info, e, FailureOrigin::Modifier, listener))?;
    }
    Ok(value)
  }

  fn failure(
    &self,
    info: &KeyInfo,
    error: EvalError,
    origin: FailureOrigin,
    listener: Option<&dyn KeyEvaluationListener>,
  ) -> EvalError {
    if let Some(listener) = listener {
      listener.key_evaluation_failed_by_error(info, &error, origin == FailureOrigin::Value);
    }
    EvalError::Evaluation {
      key: info.name().to_string(),
      scope: self.scope().to_string(),
      origin,
      source: Box::new(error),
    }
  }

  /// Run `action` in the scope created by layering `configurations` over this one.
  ///
  /// Keys read inside count as dependencies of the current evaluation.
  pub fn using<R>(
    &mut self,
    configurations: &[ConfigurationId],
    action: impl FnOnce(&mut EvalScope<'_>) -> Result<R, EvalError>,
  ) -> Result<R, EvalError> {
    self.ensure_open()?;
    let mut scope = self.scope;
    for &configuration in configurations {
      scope = self.engine.scopes.scope_for(&self.engine.definitions, scope, configuration);
    }
    let mut prefix = self.configuration_prefix.clone();
    prefix.extend_from_slice(configurations);

    let input = Rc::clone(self.input.pairs());
    let mut child = EvalScope::new(
      &mut *self.engine,
      scope,
      prefix,
      &mut *self.used_bindings,
      &mut *self.expiration_triggers,
      input,
    );
    let result = action(&mut child);
    child.close();
    result
  }

  /// Run `action` in `project` with `configurations` layered over its base scope.
  ///
  /// Reads in another project are not recorded as dependencies of the current
  /// evaluation, nor are triggers registered there.
  pub fn using_project<R>(
    &mut self,
    project: ProjectId,
    configurations: &[ConfigurationId],
    action: impl FnOnce(&mut EvalScope<'_>) -> Result<R, EvalError>,
  ) -> Result<R, EvalError> {
    self.ensure_open()?;
    let scope = self.engine.scope_with(project, configurations);
    let input = Rc::clone(self.input.pairs());

    if project == self.scope().project() {
      let mut child = EvalScope::new(
        &mut *self.engine,
        scope,
        Vec::new(),
        &mut *self.used_bindings,
        &mut *self.expiration_triggers,
        input,
      );
      let result = action(&mut child);
      child.close();
      return result;
    }

    let mut used_bindings = Vec::new();
    let mut expiration_triggers = Vec::new();
    let mut child = EvalScope::new(
      &mut *self.engine,
      scope,
      Vec::new(),
      &mut used_bindings,
      &mut expiration_triggers,
      input,
    );
    let result = action(&mut child);
    child.close();
    result
  }

  /// The value being computed expires once `trigger` returns true.
  pub fn expires_when(&mut self, trigger: impl Fn() -> bool + 'static) -> Result<(), EvalError> {
    self.ensure_open()?;
    self.expiration_triggers.push(Rc::new(trigger));
    Ok(())
  }

  /// The value being computed is reused only within the current tick.
  pub fn expires_now(&mut self) -> Result<(), EvalError> {
    self.expires_when(|| true)
  }

  /// The value being computed expires when `path` appears, disappears or is modified.
  pub fn expires_with(&mut self, path: impl AsRef<Path>) -> Result<(), EvalError> {
    let path = path.as_ref().to_path_buf();
    let seen = modified_time(&path);
    self.expires_when(move || modified_time(&path) != seen)
  }

  /// Mark the binding of `key` in this scope stale, even within the current tick.
  ///
  /// With `up_to`, every binding that `key`'s binding depends on, directly or
  /// transitively, on the way to a binding of `up_to` is marked as well. The
  /// binding of `up_to` may live in any scope. Does nothing when `key` has not
  /// been looked up in this scope.
  pub fn force_expire_now(&mut self, key: KeyId, up_to: Option<KeyId>) -> Result<(), EvalError> {
    self.ensure_open()?;
    let Some(&target) = self.engine.scopes.get(self.scope).key_binding_cache.get(&key) else {
      return Ok(());
    };
    let expired = binding::force_expire(&mut self.engine.bindings, target, up_to);
    debug!(key = %self.engine.definitions.key(key), expired = expired.len(), "forced expiry");
    Ok(())
  }

  /// Read an input value.
  ///
  /// Looks at explicit input pairs for `key` (case-insensitive), then at the
  /// next unclaimed free input, then asks the engine's prompter when one is
  /// installed. Returns `None` when nothing acceptable was found or the prompt
  /// was interrupted.
  pub fn read<V>(&mut self, key: &str, description: &str, validator: Validator<V>) -> Result<Option<V>, EvalError> {
    self.ensure_open()?;
    if let Some(value) = self.input.find(key, validator) {
      return Ok(Some(value));
    }
    match self.engine.prompter.clone() {
      Some(prompter) => Ok(prompt_until_valid(prompter.as_ref(), key, description, validator)),
      None => {
        debug!(key, description, "not asking for input, no prompter installed");
        Ok(None)
      }
    }
  }

  /// [`read`](Self::read) with the string validator.
  pub fn read_string(&mut self, key: &str, description: &str) -> Result<Option<String>, EvalError> {
    self.read(key, description, input::string_validator)
  }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
  std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
