//! Observers of key evaluation.
//!
//! Every `get` reports `started`, then any number of `has_modifiers` and
//! `feature` events, then exactly one of `succeeded`, `failed_by_no_binding`
//! or `failed_by_error`. Evaluations nest: a value function reading another
//! key produces a complete inner sequence between the outer `started` and its
//! end event.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::binding::Binding;
use crate::error::EvalError;
use crate::holder::BindingHolder;
use crate::key::KeyInfo;
use crate::scope::Scope;

/// Feature reported after an evaluation that registered expiration triggers.
pub const FEATURE_EXPIRATION_TRIGGERS: &str = "has expiration triggers";

pub trait KeyEvaluationListener {
  fn key_evaluation_started(&self, _scope: &Scope, _key: &KeyInfo) {}

  /// `holder`, visited while looking up the binding, contributes `amount` modifiers.
  fn key_evaluation_has_modifiers(&self, _scope: &Scope, _holder: &BindingHolder, _amount: usize) {}

  fn key_evaluation_feature(&self, _feature: &str) {}

  fn key_evaluation_succeeded(&self, _key: &KeyInfo, _binding: &Binding, _result: &dyn Any) {}

  /// No binding and no default; `used_fallback` tells whether the caller supplied one.
  fn key_evaluation_failed_by_no_binding(&self, _key: &KeyInfo, _used_fallback: bool) {}

  /// `from_value` is true when the value function failed, false for a modifier.
  fn key_evaluation_failed_by_error(&self, _key: &KeyInfo, _error: &EvalError, _from_value: bool) {}
}

/// Forwards every event to all of its listeners, in order.
#[derive(Clone, Default)]
pub struct ListenerSplitter {
  listeners: Vec<Rc<dyn KeyEvaluationListener>>,
}

impl ListenerSplitter {
  pub fn new(listeners: Vec<Rc<dyn KeyEvaluationListener>>) -> Self {
    Self { listeners }
  }

  pub fn push(&mut self, listener: Rc<dyn KeyEvaluationListener>) {
    self.listeners.push(listener);
  }

  pub fn len(&self) -> usize {
    self.listeners.len()
  }

  pub fn is_empty(&self) -> bool {
    self.listeners.is_empty()
  }
}

impl KeyEvaluationListener for ListenerSplitter {
  fn key_evaluation_started(&self, scope: &Scope, key: &KeyInfo) {
    for listener in &self.listeners {
      listener.key_evaluation_started(scope, key);
    }
  }

  fn key_evaluation_has_modifiers(&self, scope: &Scope, holder: &BindingHolder, amount: usize) {
    for listener in &self.listeners {
      listener.key_evaluation_has_modifiers(scope, holder, amount);
    }
  }

  fn key_evaluation_feature(&self, feature: &str) {
    for listener in &self.listeners {
      listener.key_evaluation_feature(feature);
    }
  }

  fn key_evaluation_succeeded(&self, key: &KeyInfo, binding: &Binding, result: &dyn Any) {
    for listener in &self.listeners {
      listener.key_evaluation_succeeded(key, binding, result);
    }
  }

  fn key_evaluation_failed_by_no_binding(&self, key: &KeyInfo, used_fallback: bool) {
    for listener in &self.listeners {
      listener.key_evaluation_failed_by_no_binding(key, used_fallback);
    }
  }

  fn key_evaluation_failed_by_error(&self, key: &KeyInfo, error: &EvalError, from_value: bool) {
    for listener in &self.listeners {
      listener.key_evaluation_failed_by_error(key, error, from_value);
    }
  }
}

/// Emits evaluation events as `tracing` debug events, with the nesting depth.
#[derive(Debug, Default)]
pub struct TracingListener {
  depth: Cell<usize>,
}

impl TracingListener {
  pub fn new() -> Self {
    Self::default()
  }

  fn leave(&self) -> usize {
    let depth = self.depth.get().saturating_sub(1);
    self.depth.set(depth);
    depth
  }
}

impl KeyEvaluationListener for TracingListener {
  fn key_evaluation_started(&self, scope: &Scope, key: &KeyInfo) {
    let depth = self.depth.get();
    debug!(depth, key = %key, scope = %scope, "evaluating key");
    self.depth.set(depth + 1);
  }

  fn key_evaluation_has_modifiers(&self, scope: &Scope, holder: &BindingHolder, amount: usize) {
    debug!(depth = self.depth.get(), scope = %scope, holder = %holder, amount, "found modifiers");
  }

  fn key_evaluation_feature(&self, feature: &str) {
    debug!(depth = self.depth.get(), feature, "evaluation feature");
  }

  fn key_evaluation_succeeded(&self, key: &KeyInfo, _binding: &Binding, result: &dyn Any) {
    let depth = self.leave();
    let value = key.format_value(result).unwrap_or_default();
    debug!(depth, key = %key, value = %value, "evaluated key");
  }

  fn key_evaluation_failed_by_no_binding(&self, key: &KeyInfo, used_fallback: bool) {
    let depth = self.leave();
    debug!(depth, key = %key, used_fallback, "key not assigned");
  }

  fn key_evaluation_failed_by_error(&self, key: &KeyInfo, error: &EvalError, from_value: bool) {
    let depth = self.leave();
    let origin = if from_value { "value" } else { "modifier" };
    debug!(depth, key = %key, origin, error = %error, "key evaluation failed");
  }
}

/// How a recorded evaluation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
  /// Still running, or ended abnormally.
  Pending,
  Succeeded(String),
  NoBinding { used_fallback: bool },
  Failed { message: String, from_value: bool },
}

/// One recorded key evaluation and the evaluations nested in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceNode {
  pub key: String,
  pub scope: String,
  pub modifiers: usize,
  pub features: Vec<String>,
  pub outcome: TraceOutcome,
  pub children: Vec<TraceNode>,
}

impl TraceNode {
  fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    write!(f, "{:indent$}{}{}", "", self.scope, self.key, indent = depth * 2)?;
    match &self.outcome {
      TraceOutcome::Pending => write!(f, " ...")?,
      TraceOutcome::Succeeded(value) => write!(f, " = {}", value)?,
      TraceOutcome::NoBinding { used_fallback: true } => write!(f, " (not assigned, fallback used)")?,
      TraceOutcome::NoBinding { used_fallback: false } => write!(f, " (not assigned)")?,
      TraceOutcome::Failed { message, from_value } => {
        let origin = if *from_value { "value" } else { "modifier" };
        write!(f, " FAILED in {}: {}", origin, message)?
      }
    }
    if !self.features.is_empty() {
      write!(f, " [{}]", self.features.join(", "))?;
    }
    writeln!(f)?;
    for child in &self.children {
      child.render(f, depth + 1)?;
    }
    Ok(())
  }
}

impl fmt::Display for TraceNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.render(f, 0)
  }
}

/// Records evaluations into a tree of [`TraceNode`]s.
#[derive(Debug, Default)]
pub struct TraceRecorder {
  open: RefCell<Vec<TraceNode>>,
  finished: RefCell<Vec<TraceNode>>,
}

impl TraceRecorder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Completed top-level evaluations, removing them from the recorder.
  pub fn take(&self) -> Vec<TraceNode> {
    std::mem::take(&mut *self.finished.borrow_mut())
  }

  fn with_current(&self, f: impl FnOnce(&mut TraceNode)) {
    if let Some(node) = self.open.borrow_mut().last_mut() {
      f(node);
    }
  }

  fn close(&self, outcome: TraceOutcome) {
    let mut open = self.open.borrow_mut();
    let Some(mut node) = open.pop() else {
      return;
    };
    node.outcome = outcome;
    match open.last_mut() {
      Some(parent) => parent.children.push(node),
      None => self.finished.borrow_mut().push(node),
    }
  }
}

impl KeyEvaluationListener for TraceRecorder {
  fn key_evaluation_started(&self, scope: &Scope, key: &KeyInfo) {
    self.open.borrow_mut().push(TraceNode {
      key: key.name().to_string(),
      scope: scope.to_string(),
      modifiers: 0,
      features: Vec::new(),
      outcome: TraceOutcome::Pending,
      children: Vec::new(),
    });
  }

  fn key_evaluation_has_modifiers(&self, _scope: &Scope, _holder: &BindingHolder, amount: usize) {
    self.with_current(|node| node.modifiers += amount);
  }

  fn key_evaluation_feature(&self, feature: &str) {
    self.with_current(|node| node.features.push(feature.to_string()));
  }

  fn key_evaluation_succeeded(&self, key: &KeyInfo, _binding: &Binding, result: &dyn Any) {
    self.close(TraceOutcome::Succeeded(key.format_value(result).unwrap_or_default()));
  }

  fn key_evaluation_failed_by_no_binding(&self, _key: &KeyInfo, used_fallback: bool) {
    self.close(TraceOutcome::NoBinding { used_fallback });
  }

  fn key_evaluation_failed_by_error(&self, _key: &KeyInfo, error: &EvalError, from_value: bool) {
    self.close(TraceOutcome::Failed {
      message: error.to_string(),
      from_value,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::Engine;
  use crate::key::KeyDefinition;

  fn engine_with_chain() -> (Engine, crate::holder::ProjectId, crate::key::Key<u32>) {
    let mut engine = Engine::new();
    let base = engine.key(KeyDefinition::<u32>::new("base", "")).unwrap();
    let total = engine.key(KeyDefinition::<u32>::new("total", "")).unwrap();
    let app = engine.project("app", &[]).unwrap();
    {
      let base = base.clone();
      engine
        .holder(app)
        .set_value(&base, 2)
        .set(&total, move |scope| Ok(scope.get(&base)? * 10));
    }
    (engine, app, total)
  }

  mod recorder {
    use super::*;

    #[test]
    fn records_nested_evaluations() {
      let (mut engine, app, total) = engine_with_chain();
      let recorder = Rc::new(TraceRecorder::new());
      let value = engine.with_listener(recorder.clone(), |engine| engine.evaluate(app, &[], &total, &[]));
      assert_eq!(value.unwrap(), 20);

      let trace = recorder.take();
      assert_eq!(trace.len(), 1);
      let root = &trace[0];
      assert_eq!(root.key, "total");
      assert_eq!(root.scope, "app/");
      assert_eq!(root.outcome, TraceOutcome::Succeeded("20".to_string()));
      assert_eq!(root.features, vec!["first evaluation"]);
      assert_eq!(root.children.len(), 1);
      assert_eq!(root.children[0].key, "base");
      assert!(root.to_string().contains("  app/base = 2"));
    }

    #[test]
    fn records_cache_hits_on_later_ticks() {
      let (mut engine, app, total) = engine_with_chain();
      engine.evaluate(app, &[], &total, &[]).unwrap();

      let recorder = Rc::new(TraceRecorder::new());
      engine.with_listener(recorder.clone(), |engine| {
        engine.evaluate(app, &[], &total, &[]).unwrap();
      });
      let trace = recorder.take();
      assert_eq!(trace[0].features, vec!["from cache"]);
      assert!(trace[0].children.is_empty());
    }
  }

  mod splitter {
    use super::*;

    #[derive(Default)]
    struct Counter {
      started: Cell<usize>,
      ended: Cell<usize>,
    }

    impl KeyEvaluationListener for Counter {
      fn key_evaluation_started(&self, _scope: &Scope, _key: &KeyInfo) {
        self.started.set(self.started.get() + 1);
      }

      fn key_evaluation_succeeded(&self, _key: &KeyInfo, _binding: &Binding, _result: &dyn Any) {
        self.ended.set(self.ended.get() + 1);
      }
    }

    #[test]
    fn nested_listeners_both_receive_events() {
      let (mut engine, app, total) = engine_with_chain();
      let outer = Rc::new(Counter::default());
      let inner = Rc::new(Counter::default());

      engine.with_listener(outer.clone(), |engine| {
        engine.with_listener(inner.clone(), |engine| {
          engine.evaluate(app, &[], &total, &[]).unwrap();
        });
        engine.evaluate(app, &[], &total, &[]).unwrap();
      });

      assert_eq!(inner.started.get(), 2);
      assert_eq!(inner.ended.get(), 2);
      // second evaluation is served from cache without reading `base`
      assert_eq!(outer.started.get(), 3);
      assert!(engine.listener().is_none());
    }
  }

  #[test]
  #[tracing_test::traced_test]
  fn tracing_listener_logs_values() {
    let (mut engine, app, total) = engine_with_chain();
    engine
      .with_listener(Rc::new(TracingListener::new()), |engine| {
        engine.evaluate(app, &[], &total, &[])
      })
      .unwrap();
    assert!(logs_contain("evaluated key"));
    assert!(logs_contain("value=20"));
  }
}
