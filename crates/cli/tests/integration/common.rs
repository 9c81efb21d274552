//! Shared test helpers for CLI integration tests.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory with an isolated cache, local
/// Maven repository and a scratch repository to publish fixtures into.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Cache path for downloads.
  pub fn cache_path(&self) -> PathBuf {
    self.dir("cache")
  }

  /// Stand-in for `~/.m2/repository`.
  pub fn m2_path(&self) -> PathBuf {
    self.dir("m2")
  }

  /// Scratch repository passed with `--repo`.
  pub fn repo_path(&self) -> PathBuf {
    self.dir("repo")
  }

  /// `--repo` argument for the scratch repository.
  pub fn repo_arg(&self) -> String {
    format!("disk={}", self.repo_path().display())
  }

  /// Publish `group:name:version` with a POM depending on `dependencies` and a jar.
  pub fn publish(&self, coordinate: &str, dependencies: &[&str]) {
    let [group, name, version] = parts(coordinate);
    let directory = self.repo_path().join(group.replace('.', "/")).join(name).join(version);
    fs::create_dir_all(&directory).unwrap();

    let dependencies: String = dependencies
      .iter()
      .map(|dependency| {
        let [group, name, version] = parts(dependency);
        format!(
          "<dependency><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></dependency>",
          group, name, version
        )
      })
      .collect();
    let pom = format!(
      "<project><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version><dependencies>{}</dependencies></project>",
      group, name, version, dependencies
    );
    fs::write(directory.join(format!("{}-{}.pom", name, version)), pom).unwrap();
    fs::write(directory.join(format!("{}-{}.jar", name, version)), coordinate).unwrap();
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `KILN_CACHE`: Isolated download cache
  /// - `KILN_M2_REPOSITORY`: Isolated local Maven repository
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.env("KILN_CACHE", self.cache_path());
    cmd.env("KILN_M2_REPOSITORY", self.m2_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

fn parts(coordinate: &str) -> [&str; 3] {
  let parts: Vec<&str> = coordinate.split(':').collect();
  [parts[0], parts[1], parts[2]]
}
