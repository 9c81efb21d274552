//! Error types of the evaluation core.
//!
//! [`EvalError`] is what every key read, value function and modifier returns.
//! Failures of a value function or modifier are wrapped in
//! [`EvalError::Evaluation`] with the key and scope they happened in, so a
//! failure deep inside a chain of nested reads carries the whole key path.

use std::fmt;

use thiserror::Error;

/// Which part of a binding failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
  /// The bound value function.
  Value,
  /// One of the value modifiers.
  Modifier,
}

impl fmt::Display for FailureOrigin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureOrigin::Value => write!(f, "value"),
      FailureOrigin::Modifier => write!(f, "modifier"),
    }
  }
}

/// Errors produced while evaluating keys.
#[derive(Debug, Error)]
pub enum EvalError {
  /// The key has no binding in the scope and no default value.
  #[error("key '{key}' is not assigned in {scope}")]
  KeyNotAssigned { key: String, scope: String },

  /// A project name could not be resolved.
  #[error("no such project: {0}")]
  NoSuchProject(String),

  /// A configuration name could not be resolved.
  #[error("no such configuration: {0}")]
  NoSuchConfiguration(String),

  /// A key name could not be resolved.
  #[error("no such key: {0}")]
  NoSuchKey(String),

  /// A value function or modifier failed.
  #[error("failed to evaluate '{key}' in {scope} ({origin}): {source}")]
  Evaluation {
    key: String,
    scope: String,
    origin: FailureOrigin,
    #[source]
    source: Box<EvalError>,
  },

  /// A key was requested again while it was still being evaluated in the same scope.
  #[error("cyclic evaluation: {path}")]
  CyclicEvaluation { path: String },

  /// The evaluation scope was used after the call it was created for returned.
  #[error("evaluation scope is closed, it was used outside of the call it was created for")]
  ScopeClosed,

  /// A cached or modified value did not have the type of its key.
  #[error("value of key '{key}' is not of type {expected}")]
  TypeMismatch { key: String, expected: &'static str },

  /// I/O failure inside a value function.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Free-form failure reported by a value function.
  #[error("{0}")]
  Message(String),

  /// Any other failure reported by a value function.
  #[error(transparent)]
  Other(Box<dyn std::error::Error + Send + Sync>),
}

impl EvalError {
  /// Create a free-form failure.
  pub fn msg(message: impl Into<String>) -> Self {
    EvalError::Message(message.into())
  }

  /// Wrap an arbitrary error.
  pub fn other(error: impl std::error::Error + Send + Sync + 'static) -> Self {
    EvalError::Other(Box::new(error))
  }

  /// Keys along a nested evaluation failure, outermost first.
  pub fn key_path(&self) -> Vec<&str> {
    let mut path = Vec::new();
    let mut current = self;
    while let EvalError::Evaluation { key, source, .. } = current {
      path.push(key.as_str());
      current = source;
    }
    path
  }

  /// The innermost error, with all evaluation wrappers removed.
  pub fn root_cause(&self) -> &EvalError {
    let mut current = self;
    while let EvalError::Evaluation { source, .. } = current {
      current = source;
    }
    current
  }

  /// Whether this error, possibly nested, comes from a key without binding.
  pub fn is_key_not_assigned(&self) -> bool {
    matches!(self.root_cause(), EvalError::KeyNotAssigned { .. })
  }
}

/// Errors produced while declaring keys, projects, configurations and archetypes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
  #[error("key '{0}' is already defined")]
  DuplicateKey(String),

  #[error("project '{0}' is already defined")]
  DuplicateProject(String),

  #[error("configuration '{0}' is already defined")]
  DuplicateConfiguration(String),

  #[error("archetype '{0}' is already defined")]
  DuplicateArchetype(String),
}
