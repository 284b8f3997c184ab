//! Planning over YAML-loaded manifests: cycle rejection, removal safety,
//! and the install/no-op invariants end to end through the loader.

mod fixtures;

use fixtures::TestEnv;
use std::sync::Arc;
use tomei::manifest::{Loader, YamlParser};
use tomei::planner::{Action, UpdateFlags, plan};
use tomei::state::{State, StateEntry, StateStore};

fn load(env: &TestEnv) -> Vec<tomei::resource::Resource> {
    Loader::new(Arc::new(YamlParser)).load(&[env.config_dir.clone()]).unwrap()
}

#[test]
fn declared_set_installs_onto_empty_state() {
    let env = TestEnv::new();
    env.write_manifest(
        "tools.yaml",
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
    checksum: sha256:1111111111111111111111111111111111111111111111111111111111111111
---
apiVersion: tomei.terassyi.net/v1beta1
kind: Tool
metadata:
  name: rg
spec:
  installerRef: download
  version: 14.1.0
  source:
    url: https://example.com/rg.tar.gz
"#,
    );

    let resources = load(&env);
    let plan = plan(&resources, &State::new(), UpdateFlags::default()).unwrap();
    assert!(resources.iter().all(|r| plan.action(&r.id()) == Action::Install));
    assert_eq!(plan.summary.install, 2);
}

#[test]
fn cycle_between_installer_and_tool_is_rejected() {
    let env = TestEnv::new();
    env.write_manifest(
        "cycle.yaml",
        r#"
apiVersion: tomei.terassyi.net/v1beta1
kind: Installer
metadata:
  name: a
spec:
  strategy: delegation
  toolRef: b
  commands:
    install: "a install {{.Package}}"
---
apiVersion: tomei.terassyi.net/v1beta1
kind: Tool
metadata:
  name: b
spec:
  installerRef: a
  version: 1.0.0
  package: example.com/b
"#,
    );

    let resources = load(&env);
    let err = plan(&resources, &State::new(), UpdateFlags::default()).unwrap_err();
    assert_eq!(err.code(), "E101");
    let message = err.to_string();
    assert!(message.contains("Installer/a"));
    assert!(message.contains("Tool/b"));
}

#[test]
fn removing_a_runtime_with_a_surviving_tool_is_blocked() {
    let env = TestEnv::new();

    // Persisted state: runtime go plus a tool that rides on it.
    let store = StateStore::new(&env.data_dir);
    let mut state = State::new();
    state.insert(StateEntry::Runtime(fixtures::runtime_state("go", "1.25.6", "sha256:aa")));
    let mut gopls = fixtures::tool_state("gopls", "0.21.0", "sha256:bb");
    gopls.runtime_ref = Some("go".to_string());
    state.insert(StateEntry::Tool(gopls));
    store.save(&state).unwrap();

    // Manifests keep gopls but drop the runtime.
    env.write_manifest(
        "gopls.yaml",
        r#"
apiVersion: tomei.terassyi.net/v1beta1
kind: Tool
metadata:
  name: gopls
spec:
  installerRef: download
  runtimeRef: go
  version: 0.21.0
  package: golang.org/x/tools/gopls
"#,
    );

    let resources = load(&env);
    let loaded_state = store.load().unwrap();
    let err = plan(&resources, &loaded_state, UpdateFlags::default()).unwrap_err();
    assert_eq!(err.code(), "E103");
    assert!(err.to_string().contains("Tool/gopls"));
}

#[test]
fn unresolved_reference_is_a_load_time_error() {
    let env = TestEnv::new();
    env.write_manifest(
        "tool.yaml",
        r#"
apiVersion: tomei.terassyi.net/v1beta1
kind: Tool
metadata:
  name: gofumpt
spec:
  installerRef: download
  runtimeRef: go
  version: 0.7.0
  package: mvdan.cc/gofumpt
"#,
    );

    // Neither declared nor installed: the reference cannot be satisfied.
    let resources = load(&env);
    let err = plan(&resources, &State::new(), UpdateFlags::default()).unwrap_err();
    assert_eq!(err.code(), "E102");
    assert!(err.to_string().contains("Runtime/go"));
}
