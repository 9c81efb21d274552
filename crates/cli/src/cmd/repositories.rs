//! Implementation of the `kiln repositories` command.

use anyhow::{Context, Result};

use kiln_lib::dependency::{Repository, create_repository_chain, default_repositories};

use crate::RepositoryArgs;
use crate::output::{OutputFormat, print_info, print_json, print_list};

/// Repositories named on the command line, followed by the defaults unless disabled.
pub fn selected_repositories(args: &RepositoryArgs) -> Result<Vec<Repository>> {
  let mut repositories = args
    .repos
    .iter()
    .map(|spec| Repository::parse_spec(spec).with_context(|| format!("Invalid repository: {}", spec)))
    .collect::<Result<Vec<_>>>()?;
  if !args.no_default_repositories {
    repositories.extend(default_repositories().context("Failed to set up default repositories")?);
  }
  Ok(repositories)
}

pub fn cmd_repositories(args: &RepositoryArgs, output: OutputFormat) -> Result<()> {
  let chain = create_repository_chain(&selected_repositories(args)?);

  if output.is_json() {
    let entries: Vec<_> = chain
      .iter()
      .map(|repository| {
        serde_json::json!({
          "name": repository.name,
          "url": repository.url.as_str(),
          "local": repository.is_local(),
          "cache": repository.cache.as_ref().map(|cache| cache.name.clone()),
        })
      })
      .collect();
    return print_json(&entries);
  }

  if chain.is_empty() {
    print_info("No repositories configured.");
    return Ok(());
  }
  print_list(None, &chain);
  Ok(())
}
