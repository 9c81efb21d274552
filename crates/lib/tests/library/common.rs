//! Shared helpers for library integration tests.

use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use kiln_lib::dependency::{Dependency, DependencyId, Repository};
use tempfile::TempDir;

/// Counts how often a value function ran.
#[derive(Debug, Clone, Default)]
pub struct Calls(Rc<Cell<usize>>);

impl Calls {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self) {
    self.0.set(self.0.get() + 1);
  }

  pub fn get(&self) -> usize {
    self.0.get()
  }
}

/// A scratch Maven repository in a temporary directory.
pub struct M2Fixture {
  pub temp: TempDir,
}

impl M2Fixture {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn repository(&self, name: &str) -> Repository {
    Repository::local(name, self.path()).unwrap()
  }

  /// Publish `coordinate` with a POM listing `dependencies` and a jar.
  pub fn publish(&self, coordinate: &str, dependencies: &[&str]) {
    let id = id(coordinate);
    let directory = self
      .path()
      .join(id.group.replace('.', "/"))
      .join(&id.name)
      .join(&id.version);
    fs::create_dir_all(&directory).unwrap();
    fs::write(directory.join(format!("{}-{}.pom", id.name, id.version)), pom(&id, dependencies)).unwrap();
    fs::write(directory.join(format!("{}-{}.jar", id.name, id.version)), coordinate).unwrap();
  }
}

pub fn id(coordinate: &str) -> DependencyId {
  DependencyId::parse(coordinate).unwrap()
}

pub fn dependency(coordinate: &str) -> Dependency {
  Dependency::new(id(coordinate))
}

/// Minimal POM of `id` depending on `dependencies`.
pub fn pom(id: &DependencyId, dependencies: &[&str]) -> String {
  let dependencies: String = dependencies
    .iter()
    .map(|coordinate| {
      let dependency = self::id(coordinate);
      format!(
        "    <dependency>\n      <groupId>{}</groupId>\n      <artifactId>{}</artifactId>\n      <version>{}</version>\n    </dependency>\n",
        dependency.group, dependency.name, dependency.version
      )
    })
    .collect();
  format!(
    "<?xml version=\"1.0\"?>\n<project>\n  <modelVersion>4.0.0</modelVersion>\n  <groupId>{}</groupId>\n  <artifactId>{}</artifactId>\n  <version>{}</version>\n  <dependencies>\n{}  </dependencies>\n</project>\n",
    id.group, id.name, id.version, dependencies
  )
}
