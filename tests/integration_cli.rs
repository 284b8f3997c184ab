//! Thin smoke tests over the installed binary surface.

mod fixtures;

use assert_cmd::Command;
use fixtures::TestEnv;
use predicates::prelude::*;

fn tomei(env: &TestEnv) -> Command {
    let mut cmd = Command::cargo_bin("tomei").unwrap();
    cmd.arg("--config-dir")
        .arg(&env.config_dir)
        .arg("--data-dir")
        .arg(&env.data_dir)
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn plan_lists_pending_installs() {
    let env = TestEnv::new();
    env.write_manifest(
        "gh.yaml",
        r#"
apiVersion: tomei.terassyi.net/v1beta1
kind: Tool
metadata:
  name: gh
spec:
  installerRef: download
  version: 2.86.0
  source:
    url: https://example.com/gh.tar.gz
"#,
    );

    tomei(&env)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("install Tool/gh"));
}

#[test]
fn plan_json_is_machine_readable() {
    let env = TestEnv::new();
    env.write_manifest(
        "gh.yaml",
        r#"
apiVersion: tomei.terassyi.net/v1beta1
kind: Tool
metadata:
  name: gh
spec:
  installerRef: download
  version: 2.86.0
  source:
    url: https://example.com/gh.tar.gz
"#,
    );

    let output = tomei(&env).arg("plan").arg("--json").output().unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["summary"]["install"], 1);
    assert_eq!(parsed["actions"][0]["resource"], "Tool/gh");
}

#[test]
fn diff_without_backup_says_so() {
    let env = TestEnv::new();
    tomei(&env)
        .arg("diff")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backup found"));
}

#[test]
fn schema_errors_surface_their_code() {
    let env = TestEnv::new();
    env.write_manifest(
        "bad.yaml",
        r#"
apiVersion: wrong/v1
kind: Tool
metadata:
  name: gh
spec:
  installerRef: download
"#,
    );

    tomei(&env)
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E202"));
}
