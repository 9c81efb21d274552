//! Terminal output for kiln commands.
//!
//! Status lines, resolution summaries and listings share one set of symbols
//! and colors; JSON output bypasses all of it.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One-line outcome of a resolution: every entry resolved, or how many failed.
pub fn resolution_summary(resolved: usize, failed: usize) -> (bool, String) {
  if failed == 0 {
    (true, format!("Resolved {} dependencies", resolved))
  } else {
    (false, format!("{} of {} dependencies failed to resolve", failed, resolved))
  }
}

/// Summary of a finished resolution, with the repositories consulted and the time taken.
pub fn print_resolution(resolved: usize, failed: usize, repositories: usize, elapsed: Duration) {
  match resolution_summary(resolved, failed) {
    (true, message) => print_success(&message),
    (false, message) => print_error(&message),
  }
  print_stat("Repositories", &repositories.to_string());
  print_stat("Duration", &format_duration(elapsed));
}

/// Indented list under an optional heading.
pub fn print_list<T: Display>(heading: Option<&str>, items: impl IntoIterator<Item = T>) {
  if let Some(heading) = heading {
    println!("{}:", heading);
  }
  for item in items {
    println!("  {} {}", symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()), item);
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
