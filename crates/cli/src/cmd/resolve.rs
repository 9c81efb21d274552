//! Implementation of the `kiln resolve` command.
//!
//! Resolves the given coordinates against the selected repositories and
//! prints the annotated dependency tree, or every resolved entry as JSON.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::debug;

use kiln_lib::dependency::{
  Dependency, DependencyExclusion, DependencyId, artifacts, create_repository_chain, dependency_tree,
  resolve_dependencies,
};

use super::repositories::selected_repositories;
use crate::RepositoryArgs;
use crate::output::{OutputFormat, print_json, print_list, print_resolution};

/// Root dependencies from `group:name:version` arguments, each carrying `excludes`.
fn root_dependencies(coordinates: &[String], excludes: &[String]) -> Result<Vec<Dependency>> {
  let exclusions = excludes
    .iter()
    .map(|pattern| DependencyExclusion::parse(pattern).with_context(|| format!("Invalid exclusion: {}", pattern)))
    .collect::<Result<Vec<_>>>()?;

  coordinates
    .iter()
    .map(|coordinate| {
      let id = DependencyId::parse(coordinate).with_context(|| format!("Invalid coordinate: {}", coordinate))?;
      Ok(
        exclusions
          .iter()
          .cloned()
          .fold(Dependency::new(id), Dependency::exclude),
      )
    })
    .collect()
}

pub fn cmd_resolve(
  coordinates: &[String],
  repositories: &RepositoryArgs,
  excludes: &[String],
  output: OutputFormat,
  verbose: bool,
) -> Result<()> {
  let start = Instant::now();
  let roots = root_dependencies(coordinates, excludes)?;
  let chain = create_repository_chain(&selected_repositories(repositories)?);
  debug!(roots = roots.len(), repositories = chain.len(), "resolving from command line");

  let resolution =
    resolve_dependencies(&roots, &chain, Dependency::clone).context("Failed to lock repository caches")?;
  let failed = resolution.resolved.values().filter(|entry| entry.has_error).count();

  if output.is_json() {
    let entries: Vec<_> = resolution.resolved.values().collect();
    print_json(&serde_json::json!({ "ok": resolution.ok, "resolved": entries }))?;
  } else {
    print!("{}", dependency_tree(&roots, &resolution.resolved));
    println!();
    print_resolution(resolution.resolved.len(), failed, chain.len(), start.elapsed());

    if verbose && resolution.ok {
      println!();
      print_list(
        Some("Classpath"),
        artifacts(&resolution.resolved).iter().map(|artifact| artifact.display()),
      );
    }
  }

  if !resolution.ok {
    bail!("dependency resolution failed");
  }
  Ok(())
}
