use kiln_lib::dependency::m2::Retriever;
use kiln_lib::dependency::{
  Checksum, Dependency, DependencyExclusion, Repository, create_repository_chain, dependency_tree,
  resolve_dependencies, resolve_dependencies_with,
};
use kiln_lib::keys::StandardKeys;
use kiln_lib::{Engine, EvalError};
use tempfile::TempDir;

use super::common::{M2Fixture, dependency, id, pom};

#[test]
fn resolves_application_classpath() {
  let m2 = M2Fixture::new();
  m2.publish("com.example:x:1.0", &["com.example:y:2.0"]);
  m2.publish("com.example:y:2.0", &[]);

  let mut engine = Engine::new();
  let keys = StandardKeys::register(&mut engine).unwrap();
  let app = engine.project("app", &[keys.archetype]).unwrap();
  engine
    .holder(app)
    .set_value(&keys.repositories, vec![m2.repository("disk")])
    .add(&keys.library_dependencies, |_| Ok(dependency("com.example:x:1.0")));

  let resolution = engine.evaluate(app, &[], &keys.resolved_library_dependencies, &[]).unwrap();
  assert!(resolution.ok);
  assert_eq!(resolution.resolved.len(), 2);
  let x = &resolution.resolved[&id("com.example:x:1.0")];
  assert_eq!(x.resolved_from.as_deref(), Some("disk"));
  let children: Vec<String> = x.dependencies.iter().map(|child| child.id.to_string()).collect();
  assert_eq!(children, ["com.example:y:2.0"]);

  let classpath = engine.evaluate(app, &[], &keys.external_classpath, &[]).unwrap();
  assert_eq!(
    classpath,
    [
      m2.path().join("com/example/x/1.0/x-1.0.jar"),
      m2.path().join("com/example/y/2.0/y-2.0.jar"),
    ]
  );
}

#[test]
fn missing_transitive_dependency_fails_only_its_node() {
  let m2 = M2Fixture::new();
  m2.publish("com.example:x:1.0", &["com.example:y:2.0"]);

  let roots = [dependency("com.example:x:1.0")];
  let resolution = resolve_dependencies(&roots, &[m2.repository("disk")], Dependency::clone).unwrap();
  assert!(!resolution.ok);
  assert!(!resolution.resolved[&id("com.example:x:1.0")].has_error);
  let y = &resolution.resolved[&id("com.example:y:2.0")];
  assert!(y.has_error);
  assert_eq!(y.log, "tried: disk");

  assert_eq!(
    dependency_tree(&roots, &resolution.resolved),
    "com.example:x:1.0\n└── com.example:y:2.0 FAILED: tried: disk\n"
  );
}

#[test]
fn classpath_error_shows_failed_tree() {
  let m2 = M2Fixture::new();
  m2.publish("com.example:x:1.0", &["com.example:y:2.0"]);

  let mut engine = Engine::new();
  let keys = StandardKeys::register(&mut engine).unwrap();
  let app = engine.project("app", &[keys.archetype]).unwrap();
  engine
    .holder(app)
    .set_value(&keys.repositories, vec![m2.repository("disk")])
    .set_value(&keys.library_dependencies, vec![dependency("com.example:x:1.0")]);

  let error = engine.evaluate(app, &[], &keys.external_classpath, &[]).unwrap_err();
  let EvalError::Message(message) = error.root_cause() else {
    panic!("unexpected error: {}", error);
  };
  assert!(message.contains("└── com.example:y:2.0 FAILED: tried: disk"), "{}", message);
}

#[test]
fn cycles_resolve_successfully() {
  let m2 = M2Fixture::new();
  m2.publish("g:a:1", &["g:b:1"]);
  m2.publish("g:b:1", &["g:a:1"]);

  let resolution = resolve_dependencies(&[dependency("g:a:1")], &[m2.repository("disk")], Dependency::clone).unwrap();
  assert!(resolution.ok);
  assert_eq!(resolution.resolved.len(), 2);
  assert!(resolution.resolved.values().all(|node| node.artifact.is_some()));
}

#[test]
fn exclusions_apply_to_the_declaring_subtree_only() {
  let m2 = M2Fixture::new();
  m2.publish("g:a:1", &["g:shared:1"]);
  m2.publish("g:b:1", &["g:shared:1"]);
  m2.publish("g:shared:1", &[]);

  let roots = [
    dependency("g:a:1").exclude(DependencyExclusion::new("g", "shared")),
    dependency("g:b:1"),
  ];
  let resolution = resolve_dependencies(&roots, &[m2.repository("disk")], Dependency::clone).unwrap();
  assert!(resolution.ok);
  assert!(resolution.resolved.contains_key(&id("g:shared:1")));

  let only_a = resolve_dependencies(&roots[..1], &[m2.repository("disk")], Dependency::clone).unwrap();
  assert!(!only_a.resolved.contains_key(&id("g:shared:1")));
  assert_eq!(
    dependency_tree(&roots[..1], &only_a.resolved),
    "g:a:1\n└── g:shared:1 (excluded)\n"
  );
}

#[test]
fn preferred_repository_is_asked_once() {
  let mut server = mockito::Server::new();
  let body = pom(&id("g:remote:1"), &[]);
  let sha1 = Checksum::Sha1.compute(body.as_bytes()).unwrap();
  let pom_mock = server.mock("GET", "/g/remote/1/remote-1.pom").with_body(&body).expect(1).create();
  server.mock("GET", "/g/remote/1/remote-1.pom.sha1").with_body(&sha1).create();
  let jar_mock = server.mock("GET", "/g/remote/1/remote-1.jar").with_body("jar").expect(1).create();
  server
    .mock("GET", "/g/remote/1/remote-1.jar.sha1")
    .with_body(Checksum::Sha1.compute(b"jar").unwrap())
    .create();

  let m2 = M2Fixture::new();
  m2.publish("g:local:1", &[]);
  let cache = TempDir::new().unwrap();
  let remote = Repository::parse("remote", &server.url()).unwrap();
  let mut retriever = Retriever::new(cache.path().to_path_buf());

  let roots = [
    dependency("g:local:1"),
    Dependency::new(id("g:remote:1").preferred_repository(remote)),
  ];
  let resolution =
    resolve_dependencies_with(&roots, &[m2.repository("disk")], Dependency::clone, &mut retriever).unwrap();
  assert!(resolution.ok, "{:?}", resolution);
  let remote_node = &resolution.resolved[&id("g:remote:1")];
  assert_eq!(remote_node.resolved_from.as_deref(), Some("remote"));
  assert_eq!(
    remote_node.artifact.as_deref(),
    Some(cache.path().join("remote/g/remote/1/remote-1.jar").as_path())
  );

  // A second resolution is served from the download cache.
  let again = resolve_dependencies_with(&roots, &[m2.repository("disk")], Dependency::clone, &mut retriever).unwrap();
  assert!(again.ok);
  pom_mock.assert();
  jar_mock.assert();
}

#[test]
fn repository_chain_puts_caches_first() {
  let cache = M2Fixture::new();
  let cache_repository = cache.repository("cache");
  let remote = Repository::parse("remote", "https://repo.example.com/maven2")
    .unwrap()
    .with_cache(cache_repository);
  let other = Repository::parse("another", "https://other.example.com").unwrap();

  let chain = create_repository_chain(&[remote, other]);
  let names: Vec<&str> = chain.iter().map(|repository| repository.name.as_str()).collect();
  assert_eq!(names, ["cache", "remote", "another"]);
}
