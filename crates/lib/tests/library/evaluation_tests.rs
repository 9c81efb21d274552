use std::cell::Cell;
use std::rc::Rc;

use kiln_lib::eval::input::int_validator;
use kiln_lib::holder::{ConfigurationId, ProjectId};
use kiln_lib::listener::{TraceOutcome, TraceRecorder};
use kiln_lib::{Engine, EvalError, Key, KeyDefinition};

use super::common::Calls;

struct Fixture {
  engine: Engine,
  app: ProjectId,
  testing: ConfigurationId,
  calls: Calls,
}

/// `app` with a `testing` configuration and an evaluation counter.
fn fixture() -> Fixture {
  let mut engine = Engine::new();
  let app = engine.project("app", &[]).unwrap();
  let testing = engine.configuration("testing", "Test sources", None).unwrap();
  Fixture {
    engine,
    app,
    testing,
    calls: Calls::new(),
  }
}

fn counted(f: &mut Fixture, name: &str) -> Key<usize> {
  let key = f.engine.key(KeyDefinition::<usize>::new(name, "")).unwrap();
  let calls = f.calls.clone();
  f.engine.holder(f.app).set(&key, move |_| {
    calls.record();
    Ok(calls.get())
  });
  key
}

mod memoization {
  use super::*;

  #[test]
  fn same_tick_evaluates_once() {
    let mut f = fixture();
    let key = counted(&mut f, "counted");
    let values = f
      .engine
      .run(f.app, &[], |scope| Ok((scope.get(&key)?, scope.get(&key)?)))
      .unwrap();
    assert_eq!(values, (1, 1));
    assert_eq!(f.calls.get(), 1);
  }

  #[test]
  fn later_ticks_reuse_fresh_values() {
    let mut f = fixture();
    let key = counted(&mut f, "counted");
    f.engine.evaluate(f.app, &[], &key, &[]).unwrap();
    f.engine.evaluate(f.app, &[], &key, &[]).unwrap();
    assert_eq!(f.calls.get(), 1);
  }

  #[test]
  fn different_input_reevaluates_within_a_tick() {
    let mut f = fixture();
    let doubled = f.engine.key(KeyDefinition::<i64>::new("doubled", "").input_key("n", "A number")).unwrap();
    let calls = f.calls.clone();
    f.engine.holder(f.app).set(&doubled, move |scope| {
      calls.record();
      let n = scope.read("n", "A number", int_validator)?.unwrap_or_default();
      Ok(n * 2)
    });

    let values = f
      .engine
      .run(f.app, &[], |scope| {
        Ok((
          scope.get_with_input(&doubled, &[("n", "2")])?,
          scope.get_with_input(&doubled, &[("n", "5")])?,
          scope.get_with_input(&doubled, &[("n", "5")])?,
        ))
      })
      .unwrap();
    assert_eq!(values, (4, 10, 10));
    assert_eq!(f.calls.get(), 2);
  }

  #[test]
  fn free_input_is_consumed_positionally() {
    let mut f = fixture();
    let sum = f.engine.key(KeyDefinition::<i64>::new("sum", "")).unwrap();
    f.engine.holder(f.app).set(&sum, |scope| {
      let a = scope.read("a", "First", int_validator)?.unwrap_or_default();
      let b = scope.read("b", "Second", int_validator)?.unwrap_or_default();
      Ok(a + b)
    });
    assert_eq!(f.engine.evaluate(f.app, &[], &sum, &[("", "3"), ("", "4")]).unwrap(), 7);
    assert_eq!(f.engine.evaluate(f.app, &[], &sum, &[("b", "10"), ("", "1")]).unwrap(), 11);
  }
}

mod expiry {
  use super::*;

  #[test]
  fn trigger_makes_value_stale_on_later_ticks() {
    let mut f = fixture();
    let key = f.engine.key(KeyDefinition::<usize>::new("watched", "")).unwrap();
    let expired = Rc::new(Cell::new(false));
    let (calls, flag) = (f.calls.clone(), Rc::clone(&expired));
    f.engine.holder(f.app).set(&key, move |scope| {
      calls.record();
      let flag = Rc::clone(&flag);
      scope.expires_when(move || flag.get())?;
      Ok(calls.get())
    });

    assert_eq!(f.engine.evaluate(f.app, &[], &key, &[]).unwrap(), 1);
    assert_eq!(f.engine.evaluate(f.app, &[], &key, &[]).unwrap(), 1);
    expired.set(true);
    assert_eq!(f.engine.evaluate(f.app, &[], &key, &[]).unwrap(), 2);
  }

  #[test]
  fn expires_now_is_still_memoized_within_the_tick() {
    let mut f = fixture();
    let key = f.engine.key(KeyDefinition::<usize>::new("volatile", "")).unwrap();
    let calls = f.calls.clone();
    f.engine.holder(f.app).set(&key, move |scope| {
      calls.record();
      scope.expires_now()?;
      Ok(calls.get())
    });

    f.engine
      .run(f.app, &[], |scope| {
        scope.get(&key)?;
        scope.get(&key)
      })
      .unwrap();
    assert_eq!(f.calls.get(), 1);
    f.engine.evaluate(f.app, &[], &key, &[]).unwrap();
    assert_eq!(f.calls.get(), 2);
  }

  #[test]
  fn stale_child_propagates_to_parent() {
    let mut f = fixture();
    let child = counted(&mut f, "child");
    let parent = f.engine.key(KeyDefinition::<String>::new("parent", "")).unwrap();
    let parent_calls = Calls::new();
    let (calls, reads) = (parent_calls.clone(), child.clone());
    f.engine.holder(f.app).set(&parent, move |scope| {
      calls.record();
      Ok(format!("child={}", scope.get(&reads)?))
    });

    assert_eq!(f.engine.evaluate(f.app, &[], &parent, &[]).unwrap(), "child=1");
    let child_id = child.id();
    f.engine.run(f.app, &[], |scope| scope.force_expire_now(child_id, None)).unwrap();
    assert_eq!(f.engine.evaluate(f.app, &[], &parent, &[]).unwrap(), "child=2");
    assert_eq!(parent_calls.get(), 2);
  }

  #[test]
  fn forced_expiry_cascades_down_to_up_to_key() {
    let mut f = fixture();
    let c = counted(&mut f, "c");
    let b = f.engine.key(KeyDefinition::<usize>::new("b", "")).unwrap();
    let a = f.engine.key(KeyDefinition::<usize>::new("a", "")).unwrap();
    let (b_calls, a_calls) = (Calls::new(), Calls::new());
    let (calls, reads) = (b_calls.clone(), c.clone());
    f.engine.holder(f.app).set(&b, move |scope| {
      calls.record();
      scope.get(&reads)
    });
    let (calls, reads) = (a_calls.clone(), b.clone());
    f.engine.holder(f.app).set(&a, move |scope| {
      calls.record();
      scope.get(&reads)
    });

    assert_eq!(f.engine.evaluate(f.app, &[], &a, &[]).unwrap(), 1);
    let (a_id, c_id) = (a.id(), c.id());
    let value = f
      .engine
      .run(f.app, &[], |scope| {
        scope.force_expire_now(a_id, Some(c_id))?;
        scope.get(&a)
      })
      .unwrap();
    assert_eq!(value, 2);
    assert_eq!((a_calls.get(), b_calls.get(), f.calls.get()), (2, 2, 2));
  }

  #[test]
  fn forced_expiry_up_to_unrelated_key_expires_only_target() {
    let mut f = fixture();
    let child = counted(&mut f, "child");
    let unrelated = f.engine.key(KeyDefinition::<u32>::new("unrelated", "")).unwrap();
    let parent = f.engine.key(KeyDefinition::<usize>::new("parent", "")).unwrap();
    let parent_calls = Calls::new();
    let (calls, reads) = (parent_calls.clone(), child.clone());
    f.engine.holder(f.app).set(&parent, move |scope| {
      calls.record();
      scope.get(&reads)
    });

    f.engine.evaluate(f.app, &[], &parent, &[]).unwrap();
    let (parent_id, unrelated_id) = (parent.id(), unrelated.id());
    f.engine
      .run(f.app, &[], |scope| {
        scope.force_expire_now(parent_id, Some(unrelated_id))?;
        scope.get(&parent)
      })
      .unwrap();
    assert_eq!(parent_calls.get(), 2);
    assert_eq!(f.calls.get(), 1);
  }

  #[test]
  fn file_trigger_notices_changes() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("watched.txt");
    let mut f = fixture();
    let key = f.engine.key(KeyDefinition::<usize>::new("file", "")).unwrap();
    let (calls, watched) = (f.calls.clone(), path.clone());
    f.engine.holder(f.app).set(&key, move |scope| {
      calls.record();
      scope.expires_with(&watched)?;
      Ok(calls.get())
    });

    f.engine.evaluate(f.app, &[], &key, &[]).unwrap();
    f.engine.evaluate(f.app, &[], &key, &[]).unwrap();
    assert_eq!(f.calls.get(), 1);
    std::fs::write(&path, "now it exists").unwrap();
    f.engine.evaluate(f.app, &[], &key, &[]).unwrap();
    assert_eq!(f.calls.get(), 2);
  }
}

mod scopes {
  use super::*;

  #[test]
  fn modifiers_apply_farthest_first() {
    let mut f = fixture();
    let flags = f.engine.key(KeyDefinition::<Vec<String>>::new("flags", "")).unwrap();
    let strict = f.engine.configuration("strict", "", Some(f.testing)).unwrap();
    f.engine
      .holder(f.app)
      .set_value(&flags, vec!["base".to_string()])
      .add(&flags, |_| Ok("app".to_string()));
    f.engine.holder(f.testing).add(&flags, |_| Ok("testing".to_string()));
    f.engine.holder(strict).add(&flags, |_| Ok("strict".to_string()));

    let value = f.engine.evaluate(f.app, &[strict], &flags, &[]).unwrap();
    assert_eq!(value, ["base", "app", "testing", "strict"]);
  }

  #[test]
  fn nearest_value_wins() {
    let mut f = fixture();
    let mode = f.engine.key(KeyDefinition::<String>::new("mode", "").default_value("default".to_string())).unwrap();
    assert_eq!(f.engine.evaluate(f.app, &[], &mode, &[]).unwrap(), "default");

    f.engine.holder(f.app).set_value(&mode, "app".to_string());
    f.engine.holder(f.testing).set_value(&mode, "testing".to_string());
    f.engine.clear_caches();
    assert_eq!(f.engine.evaluate(f.app, &[], &mode, &[]).unwrap(), "app");
    assert_eq!(f.engine.evaluate(f.app, &[f.testing], &mode, &[]).unwrap(), "testing");
  }

  #[test]
  fn extension_added_after_scope_was_derived_is_visible() {
    let mut f = fixture();
    let name = f.engine.key(KeyDefinition::<String>::new("name", "")).unwrap();
    f.engine.holder(f.app).set_value(&name, "base".to_string());
    assert_eq!(f.engine.evaluate(f.app, &[f.testing], &name, &[]).unwrap(), "base");

    let testing = f.testing;
    f.engine
      .holder(f.app)
      .extend(testing)
      .set_value(&name, "extended".to_string());
    assert_eq!(f.engine.evaluate(f.app, &[testing], &name, &[]).unwrap(), "extended");
    assert_eq!(f.engine.evaluate(f.app, &[], &name, &[]).unwrap(), "base");

    let scope = f.engine.scope_with(f.app, &[testing]);
    assert_eq!(f.engine.scope(scope).holders().len(), 2);
  }

  #[test]
  fn using_reads_count_as_dependencies() {
    let mut f = fixture();
    let counter = counted(&mut f, "counter");
    let both = f.engine.key(KeyDefinition::<(usize, usize)>::new("both", "")).unwrap();
    let testing = f.testing;
    let reads = counter.clone();
    f.engine.holder(f.app).set(&both, move |scope| {
      let base = scope.get(&reads)?;
      let layered = scope.using(&[testing], |scope| scope.get(&reads))?;
      Ok((base, layered))
    });

    assert_eq!(f.engine.evaluate(f.app, &[], &both, &[]).unwrap(), (1, 2));
    let base = f.engine.scope_with(f.app, &[]);
    let binding = f.engine.cached_binding(base, both.id()).unwrap();
    assert_eq!(binding.depends_on().len(), 2);
  }

  #[test]
  fn relayering_builds_a_longer_scope() {
    let mut f = fixture();
    let once = f.engine.scope_with(f.app, &[f.testing]);
    let twice = f.engine.scope_with(f.app, &[f.testing, f.testing]);
    assert_ne!(once, twice);
    assert_eq!(twice, f.engine.scope_with(f.app, &[f.testing, f.testing]));
    assert_eq!(f.engine.scope(twice).parent(), Some(once));
  }

  #[test]
  fn unassigned_key_and_fallback() {
    let mut f = fixture();
    let missing = f.engine.key(KeyDefinition::<u32>::new("missing", "")).unwrap();
    let error = f.engine.evaluate(f.app, &[], &missing, &[]).unwrap_err();
    assert!(matches!(error, EvalError::KeyNotAssigned { .. }));

    let value = f.engine.run(f.app, &[], |scope| scope.get_or_else(&missing, 7)).unwrap();
    assert_eq!(value, 7);
  }

  #[test]
  fn closed_scope_rejects_reads() {
    let mut f = fixture();
    let key = counted(&mut f, "counted");
    let closed = f
      .engine
      .run(f.app, &[], |scope| {
        let mut leaked = None;
        scope.using(&[], |inner| {
          leaked = Some(inner.is_closed());
          Ok(())
        })?;
        Ok(leaked)
      })
      .unwrap();
    assert_eq!(closed, Some(false));

    let error = f
      .engine
      .run(f.app, &[], |scope| {
        scope.close();
        scope.get(&key)
      })
      .unwrap_err();
    assert!(matches!(error, EvalError::ScopeClosed));
  }
}

mod failures {
  use super::*;

  #[test]
  fn failing_value_is_wrapped_with_key_path() {
    let mut f = fixture();
    let inner = f.engine.key(KeyDefinition::<u32>::new("inner", "")).unwrap();
    let outer = f.engine.key(KeyDefinition::<u32>::new("outer", "")).unwrap();
    f.engine.holder(f.app).set(&inner, |_| Err(EvalError::msg("boom")));
    let reads = inner.clone();
    f.engine.holder(f.app).set(&outer, move |scope| scope.get(&reads));

    let error = f.engine.evaluate(f.app, &[], &outer, &[]).unwrap_err();
    assert_eq!(error.key_path(), vec!["outer", "inner"]);
    assert_eq!(error.root_cause().to_string(), "boom");
  }

  #[test]
  fn failure_keeps_previous_value_retryable() {
    let mut f = fixture();
    let key = f.engine.key(KeyDefinition::<usize>::new("flaky", "")).unwrap();
    let calls = f.calls.clone();
    f.engine.holder(f.app).set(&key, move |_| {
      calls.record();
      if calls.get() == 1 {
        Err(EvalError::msg("first attempt fails"))
      } else {
        Ok(calls.get())
      }
    });

    assert!(f.engine.evaluate(f.app, &[], &key, &[]).is_err());
    assert_eq!(f.engine.evaluate(f.app, &[], &key, &[]).unwrap(), 2);
  }

  #[test]
  fn cyclic_evaluation_is_reported() {
    let mut f = fixture();
    let a = f.engine.key(KeyDefinition::<u32>::new("a", "")).unwrap();
    let b = f.engine.key(KeyDefinition::<u32>::new("b", "")).unwrap();
    let (reads_a, reads_b) = (a.clone(), b.clone());
    f.engine.holder(f.app).set(&a, move |scope| scope.get(&reads_b));
    f.engine.holder(f.app).set(&b, move |scope| scope.get(&reads_a));

    let error = f.engine.evaluate(f.app, &[], &a, &[]).unwrap_err();
    assert!(matches!(error.root_cause(), EvalError::CyclicEvaluation { .. }));
  }
}

mod listeners {
  use super::*;

  #[test]
  fn recorder_builds_nested_trace() {
    let mut f = fixture();
    let child = counted(&mut f, "child");
    let parent = f.engine.key(KeyDefinition::<usize>::new("parent", "")).unwrap();
    let reads = child.clone();
    f.engine.holder(f.app).set(&parent, move |scope| Ok(scope.get(&reads)? + 10));

    let recorder = Rc::new(TraceRecorder::new());
    let app = f.app;
    f.engine
      .with_listener(recorder.clone(), |engine| engine.evaluate(app, &[], &parent, &[]))
      .unwrap();

    let trace = recorder.take();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].key, "parent");
    assert_eq!(trace[0].outcome, TraceOutcome::Succeeded("11".to_string()));
    assert_eq!(trace[0].children.len(), 1);
    assert_eq!(trace[0].children[0].key, "child");
    assert!(f.engine.listener().is_none());
  }

  #[test]
  fn cached_lookups_still_report_modifiers() {
    let mut f = fixture();
    let flags = f.engine.key(KeyDefinition::<Vec<String>>::new("flags", "")).unwrap();
    f.engine
      .holder(f.app)
      .set_value(&flags, Vec::new())
      .add(&flags, |_| Ok("app".to_string()));
    f.engine.holder(f.testing).add(&flags, |_| Ok("testing".to_string()));

    let (app, testing) = (f.app, f.testing);
    let mut traces = Vec::new();
    for _ in 0..2 {
      let recorder = Rc::new(TraceRecorder::new());
      f.engine
        .with_listener(recorder.clone(), |engine| engine.evaluate(app, &[testing], &flags, &[]))
        .unwrap();
      traces.push(recorder.take());
    }

    assert_eq!(traces[0][0].modifiers, 2);
    assert_eq!(traces[1][0].modifiers, 2);
    assert!(traces[1][0].features.iter().any(|feature| feature == "from cache"));
  }
}
