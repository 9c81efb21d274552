use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn resolve_prints_tree() {
  let env = TestEnv::new();
  env.publish("com.example:app:1.0", &["com.example:lib:2.0"]);
  env.publish("com.example:lib:2.0", &[]);

  env
    .kiln_cmd()
    .args(["resolve", "com.example:app:1.0", "--no-default-repositories", "--repo", &env.repo_arg()])
    .assert()
    .success()
    .stdout(predicate::str::contains("com.example:app:1.0\n└── com.example:lib:2.0\n"))
    .stdout(predicate::str::contains("Resolved 2 dependencies"));
}

#[test]
fn resolve_verbose_prints_classpath() {
  let env = TestEnv::new();
  env.publish("com.example:app:1.0", &[]);

  env
    .kiln_cmd()
    .args(["resolve", "com.example:app:1.0", "--no-default-repositories", "--repo", &env.repo_arg(), "-v"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Classpath:"))
    .stdout(predicate::str::contains("app-1.0.jar"));
}

#[test]
fn resolve_failure_exits_with_error() {
  let env = TestEnv::new();
  env.publish("com.example:app:1.0", &["com.example:gone:1.0"]);

  env
    .kiln_cmd()
    .args(["resolve", "com.example:app:1.0", "--no-default-repositories", "--repo", &env.repo_arg()])
    .assert()
    .code(1)
    .stdout(predicate::str::contains("com.example:gone:1.0 FAILED: tried: disk"))
    .stderr(predicate::str::contains("1 of 2 dependencies failed to resolve"));
}

#[test]
fn resolve_honors_exclusions() {
  let env = TestEnv::new();
  env.publish("com.example:app:1.0", &["org.noise:logging:1.0"]);

  env
    .kiln_cmd()
    .args([
      "resolve",
      "com.example:app:1.0",
      "--no-default-repositories",
      "--repo",
      &env.repo_arg(),
      "--exclude",
      "org.noise:*",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("└── org.noise:logging:1.0 (excluded)"));
}

#[test]
fn resolve_json_output() {
  let env = TestEnv::new();
  env.publish("com.example:app:1.0", &[]);

  let output = env
    .kiln_cmd()
    .args([
      "resolve",
      "com.example:app:1.0",
      "--no-default-repositories",
      "--repo",
      &env.repo_arg(),
      "-o",
      "json",
    ])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["ok"], true);
  assert_eq!(json["resolved"][0]["id"], "com.example:app:1.0");
  assert_eq!(json["resolved"][0]["resolved_from"], "disk");
}

#[test]
fn resolve_without_repositories_fails() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .args(["resolve", "com.example:app:1.0", "--no-default-repositories"])
    .assert()
    .failure()
    .stdout(predicate::str::contains("FAILED: no repositories to search in"));
}
