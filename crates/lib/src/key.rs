//! Typed, named keys.
//!
//! A [`Key<V>`] is an immutable descriptor of a build property or operation.
//! Keys are identified by name; an [`Engine`](crate::engine::Engine) refuses to
//! register two keys with the same name.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Bound for values stored under keys.
///
/// Values are cached and handed out by clone. `Debug` is used to display
/// results of untyped evaluations.
pub trait KeyValue: Clone + fmt::Debug + 'static {}

impl<T: Clone + fmt::Debug + 'static> KeyValue for T {}

/// Index of a key inside its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(pub(crate) usize);

/// Description of an input a key reads through [`EvalScope::read`](crate::eval::EvalScope::read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputKeyDescription {
  pub key: String,
  pub description: String,
}

/// Untyped information about a key.
pub struct KeyInfo {
  pub(crate) id: KeyId,
  name: String,
  description: String,
  default: Option<Rc<dyn Any>>,
  input_keys: Vec<InputKeyDescription>,
  type_name: &'static str,
  formatter: fn(&dyn Any) -> Option<String>,
}

impl KeyInfo {
  pub fn id(&self) -> KeyId {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn has_default(&self) -> bool {
    self.default.is_some()
  }

  pub fn input_keys(&self) -> &[InputKeyDescription] {
    &self.input_keys
  }

  /// Name of the value type, for diagnostics.
  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  /// Format a value of this key with its `Debug` representation.
  ///
  /// Returns `None` when `value` is not of the key's type.
  pub fn format_value(&self, value: &dyn Any) -> Option<String> {
    (self.formatter)(value)
  }

  pub(crate) fn default_value(&self) -> Option<Rc<dyn Any>> {
    self.default.clone()
  }
}

impl fmt::Debug for KeyInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyInfo")
      .field("name", &self.name)
      .field("type", &self.type_name)
      .field("has_default", &self.has_default())
      .finish()
  }
}

impl fmt::Display for KeyInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

impl PartialEq for KeyInfo {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name
  }
}

impl Eq for KeyInfo {}

fn format_value<V: KeyValue>(value: &dyn Any) -> Option<String> {
  value.downcast_ref::<V>().map(|v| format!("{:?}", v))
}

/// Declaration of a key, registered with [`Engine::key`](crate::engine::Engine::key).
pub struct KeyDefinition<V> {
  name: String,
  description: String,
  default: Option<V>,
  input_keys: Vec<InputKeyDescription>,
}

impl<V: KeyValue> KeyDefinition<V> {
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      default: None,
      input_keys: Vec::new(),
    }
  }

  /// Value used when no holder binds the key.
  ///
  /// The same value is handed out in every scope, it is not computed lazily.
  pub fn default_value(mut self, value: V) -> Self {
    self.default = Some(value);
    self
  }

  /// Document an input read by the key's value functions.
  pub fn input_key(mut self, key: impl Into<String>, description: impl Into<String>) -> Self {
    self.input_keys.push(InputKeyDescription {
      key: key.into(),
      description: description.into(),
    });
    self
  }

  pub(crate) fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn into_key(self, id: KeyId) -> Key<V> {
    let info = KeyInfo {
      id,
      name: self.name,
      description: self.description,
      default: self.default.map(|v| Rc::new(v) as Rc<dyn Any>),
      input_keys: self.input_keys,
      type_name: std::any::type_name::<V>(),
      formatter: format_value::<V>,
    };
    Key {
      info: Rc::new(info),
      _marker: PhantomData,
    }
  }
}

/// Typed handle of a registered key.
pub struct Key<V> {
  info: Rc<KeyInfo>,
  _marker: PhantomData<fn() -> V>,
}

impl<V> Key<V> {
  pub fn id(&self) -> KeyId {
    self.info.id
  }

  pub fn name(&self) -> &str {
    self.info.name()
  }

  pub fn description(&self) -> &str {
    self.info.description()
  }

  pub fn has_default(&self) -> bool {
    self.info.has_default()
  }

  pub fn info(&self) -> &Rc<KeyInfo> {
    &self.info
  }
}

impl<V: KeyValue> Key<V> {
  /// The key's default value, if it has one.
  pub fn default_value(&self) -> Option<V> {
    self.info.default.as_ref().and_then(|v| v.downcast_ref::<V>()).cloned()
  }
}

impl<V> Clone for Key<V> {
  fn clone(&self) -> Self {
    Self {
      info: Rc::clone(&self.info),
      _marker: PhantomData,
    }
  }
}

impl<V> PartialEq for Key<V> {
  fn eq(&self, other: &Self) -> bool {
    self.info == other.info
  }
}

impl<V> Eq for Key<V> {}

impl<V> fmt::Debug for Key<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Key({})", self.info.name())
  }
}

impl<V> fmt::Display for Key<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.info.name())
  }
}
