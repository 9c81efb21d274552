//! Input pairs handed to a top-level evaluation.
//!
//! An input is a list of `(key, value)` pairs. Pairs with an empty key are
//! free inputs, consumed positionally by whichever read asks first.

use std::io::{BufRead, Write};
use std::rc::Rc;

/// Input of one top-level evaluation, compared structurally.
pub type InputPairs = Rc<[(String, String)]>;

/// Converts a raw input string, or explains why it can't.
pub type Validator<V> = fn(&str) -> Result<V, String>;

/// Build an input list from borrowed pairs.
pub fn input_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> InputPairs {
  pairs
    .iter()
    .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
    .collect::<Vec<_>>()
    .into()
}

/// Accepts anything.
pub fn string_validator(value: &str) -> Result<String, String> {
  Ok(value.to_string())
}

/// Accepts decimal integers.
pub fn int_validator(value: &str) -> Result<i64, String> {
  value.trim().parse().map_err(|_| "Integer expected".to_string())
}

/// Accepts `true/yes/1/y/on` and `false/no/0/n/off`.
pub fn bool_validator(value: &str) -> Result<bool, String> {
  match value.trim().to_ascii_lowercase().as_str() {
    "true" | "yes" | "1" | "y" | "on" => Ok(true),
    "false" | "no" | "0" | "n" | "off" => Ok(false),
    _ => Err("Boolean expected".to_string()),
  }
}

/// Accepts dotted identifiers such as `com.example.Main`.
pub fn class_name_validator(value: &str) -> Result<String, String> {
  let name = value.trim();
  let mut segment_start = true;
  for c in name.chars() {
    if segment_start {
      if !(c.is_alphabetic() || c == '_' || c == '$') {
        return Err(format!("Invalid character '{}' - class name expected", c));
      }
      segment_start = false;
    } else if c == '.' {
      segment_start = true;
    } else if !(c.is_alphanumeric() || c == '_' || c == '$') {
      return Err(format!("Invalid character '{}' - class name expected", c));
    }
  }
  if segment_start {
    return Err("Class name is incomplete".to_string());
  }
  Ok(name.to_string())
}

/// Interactive source of inputs that were not supplied up front.
pub trait InputPrompter {
  /// Ask for a line. `None` means the prompt was interrupted or input ended.
  fn prompt(&self, key: &str, description: &str) -> Option<String>;

  /// Report that the last answer was rejected by the validator.
  fn rejected(&self, _message: &str) {}
}

/// Prompts on standard error and reads lines from standard input.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl InputPrompter for StdinPrompter {
  fn prompt(&self, key: &str, description: &str) -> Option<String> {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{} ({}): ", description, key);
    let _ = stderr.flush();

    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
      Ok(0) | Err(_) => None,
      Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
  }

  fn rejected(&self, message: &str) {
    eprintln!("Invalid input: {}", message);
  }
}

/// Cursor over one evaluation's input.
#[derive(Debug, Clone)]
pub(crate) struct InputReader {
  pairs: InputPairs,
  next_free: usize,
}

impl InputReader {
  pub fn new(pairs: InputPairs) -> Self {
    Self { pairs, next_free: 0 }
  }

  pub fn pairs(&self) -> &InputPairs {
    &self.pairs
  }

  /// Value for `key` from explicit pairs, then from the next free input.
  ///
  /// A free input is consumed only when the validator accepts it.
  pub fn find<V>(&mut self, key: &str, validator: Validator<V>) -> Option<V> {
    for (candidate, value) in self.pairs.iter() {
      if !candidate.eq_ignore_ascii_case(key) {
        continue;
      }
      match validator(value) {
        Ok(value) => return Some(value),
        Err(reason) => tracing::info!(key, value = %value, reason = %reason, "input value rejected"),
      }
    }

    while self.next_free < self.pairs.len() && !self.pairs[self.next_free].0.is_empty() {
      self.next_free += 1;
    }
    if let Some((_, value)) = self.pairs.get(self.next_free) {
      match validator(value) {
        Ok(value) => {
          self.next_free += 1;
          return Some(value);
        }
        Err(reason) => tracing::info!(key, value = %value, reason = %reason, "free input rejected"),
      }
    }
    None
  }
}

/// Ask until the validator accepts an answer or the prompt is interrupted.
pub(crate) fn prompt_until_valid<V>(
  prompter: &dyn InputPrompter,
  key: &str,
  description: &str,
  validator: Validator<V>,
) -> Option<V> {
  loop {
    let line = prompter.prompt(key, description)?;
    match validator(&line) {
      Ok(value) => return Some(value),
      Err(message) => prompter.rejected(&message),
    }
  }
}
