//! Reading the parts of a Maven POM needed to walk dependencies.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::consts::{DEFAULT_SCOPE, DEFAULT_TYPE, MAX_PROPERTY_DEPTH};
use crate::dependency::types::{Dependency, DependencyExclusion, DependencyId};

/// Coordinates of a parent POM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PomParent {
  pub group: String,
  pub name: String,
  pub version: String,
}

/// A `<dependency>` element, uninterpolated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PomDependency {
  pub group: Option<String>,
  pub name: Option<String>,
  pub version: Option<String>,
  pub classifier: Option<String>,
  pub kind: Option<String>,
  pub scope: Option<String>,
  pub optional: Option<String>,
  /// `(group, name)` pairs, `*` matching anything.
  pub exclusions: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pom {
  pub group: Option<String>,
  pub name: Option<String>,
  pub version: Option<String>,
  pub packaging: Option<String>,
  pub parent: Option<PomParent>,
  pub properties: HashMap<String, String>,
  pub dependencies: Vec<PomDependency>,
  pub managed_dependencies: Vec<PomDependency>,
}

impl Pom {
  /// Parse POM XML. Unknown elements are skipped.
  pub fn parse(xml: &str) -> Result<Self, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut pom = Pom::default();
    let mut parent = PomParent::default();
    let mut has_parent = false;
    let mut dependency = PomDependency::default();
    let mut exclusion = (String::new(), String::new());
    let mut path: Vec<String> = Vec::new();

    loop {
      let event = reader
        .read_event()
        .map_err(|e| format!("malformed XML at position {}: {}", reader.buffer_position(), e))?;
      match event {
        Event::Start(element) => {
          path.push(String::from_utf8_lossy(element.local_name().as_ref()).into_owned());
          if path_is(&path, &["project", "parent"]) {
            has_parent = true;
          }
        }
        Event::Empty(_) => {}
        Event::Text(text) => {
          let text = text.unescape().map_err(|e| e.to_string())?.into_owned();
          pom.accept_text(&path, text, &mut parent, &mut dependency, &mut exclusion);
        }
        Event::CData(data) => {
          let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
          pom.accept_text(&path, text, &mut parent, &mut dependency, &mut exclusion);
        }
        Event::End(_) => {
          if path_is(&path, &["project", "dependencies", "dependency"]) {
            pom.dependencies.push(std::mem::take(&mut dependency));
          } else if path_is(&path, &["project", "dependencyManagement", "dependencies", "dependency"]) {
            pom.managed_dependencies.push(std::mem::take(&mut dependency));
          } else if path.len() >= 2 && path[path.len() - 2..] == ["exclusions", "exclusion"] {
            let (group, name) = std::mem::take(&mut exclusion);
            if !group.is_empty() || !name.is_empty() {
              dependency.exclusions.push((or_wildcard(group), or_wildcard(name)));
            }
          }
          path.pop();
        }
        Event::Eof => break,
        _ => {}
      }
    }

    if !path.is_empty() {
      return Err(format!("unexpected end of document inside <{}>", path.join("/")));
    }
    if has_parent {
      pom.parent = Some(parent);
    }
    Ok(pom)
  }

  fn accept_text(
    &mut self,
    path: &[String],
    text: String,
    parent: &mut PomParent,
    dependency: &mut PomDependency,
    exclusion: &mut (String, String),
  ) {
    let path: Vec<&str> = path.iter().map(String::as_str).collect();
    match path.as_slice() {
      ["project", "groupId"] => self.group = Some(text),
      ["project", "artifactId"] => self.name = Some(text),
      ["project", "version"] => self.version = Some(text),
      ["project", "packaging"] => self.packaging = Some(text),
      ["project", "parent", "groupId"] => parent.group = text,
      ["project", "parent", "artifactId"] => parent.name = text,
      ["project", "parent", "version"] => parent.version = text,
      ["project", "properties", property] => {
        self.properties.insert(property.to_string(), text);
      }
      ["project", "dependencies", "dependency", rest @ ..]
      | ["project", "dependencyManagement", "dependencies", "dependency", rest @ ..] => match rest {
        ["exclusions", "exclusion", "groupId"] => exclusion.0 = text,
        ["exclusions", "exclusion", "artifactId"] => exclusion.1 = text,
        [field] => dependency.set(field, text),
        _ => {}
      },
      _ => {}
    }
  }

  /// Group, inherited from the parent when not declared.
  pub fn effective_group(&self) -> Option<&str> {
    self
      .group
      .as_deref()
      .or(self.parent.as_ref().map(|parent| parent.group.as_str()))
  }

  /// Version, inherited from the parent when not declared.
  pub fn effective_version(&self) -> Option<&str> {
    self
      .version
      .as_deref()
      .or(self.parent.as_ref().map(|parent| parent.version.as_str()))
  }

  /// Packaging, `jar` when not declared.
  pub fn packaging(&self) -> &str {
    self.packaging.as_deref().unwrap_or(DEFAULT_TYPE)
  }
}

impl PomDependency {
  fn set(&mut self, field: &str, text: String) {
    match field {
      "groupId" => self.group = Some(text),
      "artifactId" => self.name = Some(text),
      "version" => self.version = Some(text),
      "classifier" => self.classifier = Some(text),
      "type" => self.kind = Some(text),
      "scope" => self.scope = Some(text),
      "optional" => self.optional = Some(text),
      _ => {}
    }
  }

  fn interpolated(&self, properties: &HashMap<String, String>) -> PomDependency {
    let apply = |value: &Option<String>| value.as_deref().map(|v| interpolate(v, properties));
    PomDependency {
      group: apply(&self.group),
      name: apply(&self.name),
      version: apply(&self.version),
      classifier: apply(&self.classifier),
      kind: apply(&self.kind),
      scope: apply(&self.scope),
      optional: apply(&self.optional),
      exclusions: self
        .exclusions
        .iter()
        .map(|(group, name)| (interpolate(group, properties), interpolate(name, properties)))
        .collect(),
    }
  }

  fn management_key(&self) -> (Option<&str>, Option<&str>) {
    (self.group.as_deref(), self.name.as_deref())
  }
}

fn or_wildcard(value: String) -> String {
  if value.is_empty() { "*".to_string() } else { value }
}

fn path_is(path: &[String], expected: &[&str]) -> bool {
  path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

/// Replace `${name}` references with known properties.
///
/// Unknown references are left in place. Substitution is repeated so that
/// properties may refer to other properties, up to a fixed depth.
pub fn interpolate(value: &str, properties: &HashMap<String, String>) -> String {
  let mut current = value.to_string();
  for _ in 0..MAX_PROPERTY_DEPTH {
    if !current.contains("${") {
      break;
    }
    let mut next = String::with_capacity(current.len());
    let mut rest = current.as_str();
    let mut changed = false;
    while let Some(start) = rest.find("${") {
      next.push_str(&rest[..start]);
      let reference = &rest[start + 2..];
      match reference.find('}') {
        Some(end) => {
          let name = &reference[..end];
          match properties.get(name) {
            Some(replacement) => {
              next.push_str(replacement);
              changed = true;
            }
            None => {
              next.push_str("${");
              next.push_str(name);
              next.push('}');
            }
          }
          rest = &reference[end + 1..];
        }
        None => {
          next.push_str(&rest[start..]);
          rest = "";
        }
      }
    }
    next.push_str(rest);
    current = next;
    if !changed {
      break;
    }
  }
  current
}

/// Dependencies of `pom`, with `parents` listed nearest first.
///
/// Properties, managed versions and dependencies are inherited from the
/// parents; the nearest declaration wins.
pub fn effective_dependencies(pom: &Pom, parents: &[Pom]) -> Vec<Dependency> {
  let lineage: Vec<&Pom> = std::iter::once(pom).chain(parents).collect();

  let mut properties: HashMap<String, String> = HashMap::new();
  for ancestor in lineage.iter().rev() {
    properties.extend(ancestor.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
  }
  let mut builtin = |name: &str, value: Option<&str>| {
    if let Some(value) = value {
      for prefix in ["project.", "pom.", ""] {
        properties.insert(format!("{}{}", prefix, name), value.to_string());
      }
    }
  };
  builtin("groupId", pom.effective_group());
  builtin("artifactId", pom.name.as_deref());
  builtin("version", pom.effective_version());
  builtin("packaging", Some(pom.packaging()));
  if let Some(parent) = &pom.parent {
    for prefix in ["project.parent.", "parent."] {
      properties.insert(format!("{}groupId", prefix), parent.group.clone());
      properties.insert(format!("{}artifactId", prefix), parent.name.clone());
      properties.insert(format!("{}version", prefix), parent.version.clone());
    }
  }

  let mut managed: HashMap<(Option<String>, Option<String>), PomDependency> = HashMap::new();
  for ancestor in lineage.iter().rev() {
    for dependency in &ancestor.managed_dependencies {
      let dependency = dependency.interpolated(&properties);
      let (group, name) = dependency.management_key();
      managed.insert((group.map(str::to_string), name.map(str::to_string)), dependency);
    }
  }

  let mut declared: Vec<PomDependency> = Vec::new();
  for ancestor in &lineage {
    for dependency in &ancestor.dependencies {
      let dependency = dependency.interpolated(&properties);
      if !declared.iter().any(|d| d.management_key() == dependency.management_key()) {
        declared.push(dependency);
      }
    }
  }

  declared
    .into_iter()
    .filter_map(|mut dependency| {
      let key = (dependency.group.clone(), dependency.name.clone());
      if let Some(managed) = managed.get(&key) {
        dependency.version = dependency.version.or_else(|| managed.version.clone());
        dependency.scope = dependency.scope.or_else(|| managed.scope.clone());
        if dependency.exclusions.is_empty() {
          dependency.exclusions = managed.exclusions.clone();
        }
      }
      to_dependency(dependency)
    })
    .collect()
}

fn to_dependency(dependency: PomDependency) -> Option<Dependency> {
  let (Some(group), Some(name), Some(version)) = (dependency.group, dependency.name, dependency.version) else {
    return None;
  };
  let mut id = DependencyId::new(group, name, version)
    .kind(dependency.kind.unwrap_or_else(|| DEFAULT_TYPE.to_string()))
    .scope(dependency.scope.unwrap_or_else(|| DEFAULT_SCOPE.to_string()))
    .optional(dependency.optional.is_some_and(|o| o.trim().eq_ignore_ascii_case("true")));
  id.classifier = dependency.classifier;

  let exclusions = dependency
    .exclusions
    .into_iter()
    .map(|(group, name)| DependencyExclusion {
      group: (group != "*").then_some(group),
      name: (name != "*").then_some(name),
      ..DependencyExclusion::default()
    })
    .collect();
  Some(Dependency::with_exclusions(id, exclusions))
}
