//! kiln-lib: Core of the kiln build tool
//!
//! This crate provides:
//! - `Key`: typed, named build properties and operations
//! - `Engine`: projects, configurations and archetypes holding key bindings,
//!   and the memoizing evaluator over them
//! - `EvalScope`: the context a value function reads other keys through
//! - `dependency`: transitive resolution of Maven-style library dependencies

pub mod binding;
pub mod consts;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod eval;
pub mod holder;
pub mod key;
pub mod keys;
pub mod listener;
pub mod platform;
pub mod scope;

pub use engine::{Engine, Task, TaskOutcome};
pub use error::{DefinitionError, EvalError};
pub use eval::EvalScope;
pub use key::{Key, KeyDefinition};
