//! Reports over resolution results.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

use crate::dependency::types::{Dependency, DependencyExclusion, DependencyId, ResolvedDependency};

/// Artifact files of every successfully resolved dependency.
pub fn artifacts(resolved: &BTreeMap<DependencyId, ResolvedDependency>) -> Vec<PathBuf> {
  resolved
    .values()
    .filter_map(|dependency| dependency.artifact.clone())
    .collect()
}

/// Render the dependency graph below `roots` as an annotated tree.
///
/// Failed nodes show their log, repeated ids are marked as circular and
/// dependencies skipped by an exclusion rule are marked as excluded.
pub fn dependency_tree(roots: &[Dependency], resolved: &BTreeMap<DependencyId, ResolvedDependency>) -> String {
  dependency_tree_with(roots, resolved, Dependency::clone)
}

/// [`dependency_tree`] for a resolution that used `mapper`.
pub fn dependency_tree_with(
  roots: &[Dependency],
  resolved: &BTreeMap<DependencyId, ResolvedDependency>,
  mapper: impl Fn(&Dependency) -> Dependency,
) -> String {
  let mut printer = TreePrinter {
    resolved,
    mapper,
    out: String::new(),
    stack: Vec::new(),
    exclusions: Vec::new(),
  };
  for root in roots {
    printer.node(root, "", "");
  }
  printer.out
}

struct TreePrinter<'a, M> {
  resolved: &'a BTreeMap<DependencyId, ResolvedDependency>,
  mapper: M,
  out: String,
  stack: Vec<DependencyId>,
  exclusions: Vec<DependencyExclusion>,
}

impl<M: Fn(&Dependency) -> Dependency> TreePrinter<'_, M> {
  fn node(&mut self, dependency: &Dependency, lead: &str, indent: &str) {
    let dependency = (self.mapper)(dependency);
    let id = &dependency.id;
    self.out.push_str(lead);

    if self.stack.contains(id) {
      let _ = writeln!(self.out, "{} (circular)", id);
      return;
    }
    let resolved = self.resolved;
    let Some(node) = resolved.get(id) else {
      let _ = writeln!(self.out, "{} (not resolved)", id);
      return;
    };
    if node.has_error {
      let _ = writeln!(self.out, "{} FAILED: {}", id, node.log);
    } else {
      let _ = writeln!(self.out, "{}", id);
    }

    let (stack_len, exclusions_len) = (self.stack.len(), self.exclusions.len());
    self.stack.push(id.clone());
    self.exclusions.extend(dependency.exclusions.iter().cloned());

    let count = node.dependencies.len();
    for (index, child) in node.dependencies.iter().enumerate() {
      let (branch, continuation) = if index + 1 == count {
        ("└── ", "    ")
      } else {
        ("├── ", "│   ")
      };
      if self.exclusions.iter().any(|rule| rule.excludes(&child.id)) {
        let _ = writeln!(self.out, "{}{}{} (excluded)", indent, branch, child.id);
        continue;
      }
      self.node(child, &format!("{}{}", indent, branch), &format!("{}{}", indent, continuation));
    }

    self.stack.truncate(stack_len);
    self.exclusions.truncate(exclusions_len);
  }
}
