//! Platform conventions.

pub mod paths;
