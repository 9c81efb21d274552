//! Bindings and their freshness.
//!
//! A [`Binding`] is what a key resolves to in one scope: the value function of
//! the nearest holder binding the key, the modifiers collected on the way
//! there, and the state of its last successful evaluation. The freshness check
//! decides from that state whether the cached value may be reused.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::eval::input::InputPairs;
use crate::holder::{ErasedModifier, ErasedValue, HolderId};
use crate::key::KeyId;
use crate::scope::ScopeId;

/// Predicate registered by a value function; the binding is stale while it returns true.
pub type ExpirationTrigger = Rc<dyn Fn() -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingId(pub(crate) usize);

/// When a binding was last evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LastEvaluated {
  #[default]
  Never,
  /// Marked stale by [`EvalScope::force_expire_now`](crate::eval::EvalScope::force_expire_now).
  ForceExpired,
  Tick(u64),
}

/// Outcome of a freshness check, in the order the conditions are tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  FirstEvaluation,
  ForceExpired,
  DifferentInput,
  FreshThisTick,
  ExplicitlyExpired,
  ChildNotFresh,
  Fresh,
}

impl Freshness {
  pub fn is_fresh(self) -> bool {
    matches!(self, Freshness::FreshThisTick | Freshness::Fresh)
  }

  /// Short description reported to listeners.
  pub fn message(self) -> &'static str {
    match self {
      Freshness::FirstEvaluation => "first evaluation",
      Freshness::ForceExpired => "re-evaluated (same-tick forced expiry)",
      Freshness::DifferentInput => "re-evaluated (different input)",
      Freshness::FreshThisTick => "from cache (already evaluated)",
      Freshness::ExplicitlyExpired => "re-evaluated (explicit expiry)",
      Freshness::ChildNotFresh => "re-evaluated (child expired)",
      Freshness::Fresh => "from cache",
    }
  }
}

impl fmt::Display for Freshness {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.message())
  }
}

/// Identity of a binding: its value function and modifiers, nothing else.
///
/// Two bindings reached through different scopes or holders are equal when
/// they share these functions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingSignature {
  value: Option<usize>,
  modifiers: Vec<usize>,
}

fn fn_address<T: ?Sized>(f: &Rc<T>) -> usize {
  Rc::as_ptr(f) as *const () as usize
}

/// State of the last successful evaluation.
#[derive(Default)]
pub(crate) struct EvaluationState {
  pub last_evaluated: LastEvaluated,
  pub input: Option<InputPairs>,
  pub value: Option<Rc<dyn Any>>,
  pub depends_on: Vec<BindingId>,
  pub triggers: Vec<ExpirationTrigger>,
}

/// A key resolved in a scope.
pub struct Binding {
  id: BindingId,
  key: KeyId,
  scope: ScopeId,
  holder: Option<HolderId>,
  pub(crate) value: Option<ErasedValue>,
  /// In application order.
  pub(crate) modifiers: Vec<ErasedModifier>,
  /// Holders the modifiers came from, in lookup order, with the scope they
  /// were found through and how many each holds.
  pub(crate) modifier_sources: Vec<(ScopeId, HolderId, usize)>,
  pub(crate) state: EvaluationState,
}

impl Binding {
  pub(crate) fn new(
    id: BindingId,
    key: KeyId,
    scope: ScopeId,
    holder: Option<HolderId>,
    value: Option<ErasedValue>,
    modifiers: Vec<ErasedModifier>,
  ) -> Self {
    Self {
      id,
      key,
      scope,
      holder,
      value,
      modifiers,
      modifier_sources: Vec::new(),
      state: EvaluationState::default(),
    }
  }

  pub fn id(&self) -> BindingId {
    self.id
  }

  pub fn key(&self) -> KeyId {
    self.key
  }

  /// Scope the binding was looked up in.
  pub fn scope(&self) -> ScopeId {
    self.scope
  }

  /// Holder of the value function; `None` when the key's default is used.
  pub fn holder(&self) -> Option<HolderId> {
    self.holder
  }

  pub fn modifier_count(&self) -> usize {
    self.modifiers.len()
  }

  pub fn last_evaluated(&self) -> LastEvaluated {
    self.state.last_evaluated
  }

  /// Bindings read during the last successful evaluation.
  pub fn depends_on(&self) -> &[BindingId] {
    &self.state.depends_on
  }

  pub fn expiration_trigger_count(&self) -> usize {
    self.state.triggers.len()
  }

  pub fn signature(&self) -> BindingSignature {
    BindingSignature {
      value: self.value.as_ref().map(fn_address),
      modifiers: self.modifiers.iter().map(fn_address).collect(),
    }
  }
}

impl PartialEq for Binding {
  fn eq(&self, other: &Self) -> bool {
    self.signature() == other.signature()
  }
}

impl Eq for Binding {}

impl fmt::Debug for Binding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Binding")
      .field("id", &self.id)
      .field("key", &self.key)
      .field("scope", &self.scope)
      .field("holder", &self.holder)
      .field("modifiers", &self.modifiers.len())
      .field("last_evaluated", &self.state.last_evaluated)
      .finish()
  }
}

/// Decide whether the cached value of `id` may be reused for `input` at `tick`.
///
/// Conditions are tested in order and the first one that applies wins.
/// Dependencies are checked against the input they were last evaluated with.
pub(crate) fn freshness(bindings: &[Binding], id: BindingId, input: &[(String, String)], tick: u64) -> Freshness {
  let mut checked = HashMap::new();
  check(bindings, id, Some(input), tick, &mut checked)
}

fn check(
  bindings: &[Binding],
  id: BindingId,
  input: Option<&[(String, String)]>,
  tick: u64,
  checked: &mut HashMap<BindingId, Freshness>,
) -> Freshness {
  if let Some(&known) = checked.get(&id) {
    return known;
  }
  // Provisional entry, a dependency loop left over from earlier ticks ends here.
  checked.insert(id, Freshness::Fresh);

  let binding = &bindings[id.0];
  let state = &binding.state;
  let input = input.or(state.input.as_deref());
  let result = match state.last_evaluated {
    LastEvaluated::Never => Freshness::FirstEvaluation,
    LastEvaluated::ForceExpired => Freshness::ForceExpired,
    LastEvaluated::Tick(last) => {
      if state.input.as_deref() != input {
        Freshness::DifferentInput
      } else if last == tick {
        Freshness::FreshThisTick
      } else if state.triggers.iter().any(|trigger| trigger()) {
        Freshness::ExplicitlyExpired
      } else if state
        .depends_on
        .iter()
        .any(|&child| !check(bindings, child, None, tick, checked).is_fresh())
      {
        Freshness::ChildNotFresh
      } else {
        Freshness::Fresh
      }
    }
  };
  checked.insert(id, result);
  result
}

/// Mark `target` stale. When `up_to` is given, every binding on a dependency
/// path from `target` to a binding of `up_to` (in any scope) is marked as well.
pub(crate) fn force_expire(bindings: &mut [Binding], target: BindingId, up_to: Option<KeyId>) -> Vec<BindingId> {
  let mut expired = vec![target];
  if let Some(up_to) = up_to {
    let mut on_path = HashMap::new();
    leads_to_key(bindings, target, up_to, &mut on_path);
    expired.extend(
      on_path
        .into_iter()
        .filter(|&(id, on_path)| on_path && id != target)
        .map(|(id, _)| id),
    );
    expired.sort();
  }
  for id in &expired {
    bindings[id.0].state.last_evaluated = LastEvaluated::ForceExpired;
  }
  expired
}

fn leads_to_key(bindings: &[Binding], id: BindingId, key: KeyId, on_path: &mut HashMap<BindingId, bool>) -> bool {
  if let Some(&known) = on_path.get(&id) {
    return known;
  }
  // cycles count as not reaching
  on_path.insert(id, false);
  let mut found = bindings[id.0].key() == key;
  for &child in &bindings[id.0].state.depends_on {
    if leads_to_key(bindings, child, key, on_path) {
      found = true;
    }
  }
  on_path.insert(id, found);
  found
}
