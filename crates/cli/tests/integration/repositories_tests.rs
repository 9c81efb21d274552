use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn extra_repositories_come_first_when_local() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .args(["repositories", "--repo", &env.repo_arg()])
    .assert()
    .success()
    .stdout(predicate::str::is_match(r"(?s)disk at .*local at .*central at").unwrap());
}

#[test]
fn json_output_lists_chain() {
  let env = TestEnv::new();

  let output = env
    .kiln_cmd()
    .args(["repositories", "--format", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let names: Vec<&str> = entries
    .as_array()
    .unwrap()
    .iter()
    .map(|entry| entry["name"].as_str().unwrap())
    .collect();
  assert_eq!(names, ["local", "central"]);
  assert_eq!(entries[1]["cache"], "local");
}
