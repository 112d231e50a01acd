use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const MODEL: &str = r#"{
  "groups": {
    "endpoints": {
      "plural": "endpoints",
      "singular": "endpoint",
      "resources": {
        "messages": {"plural": "messages", "singular": "message"}
      }
    }
  }
}"#;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.json"), MODEL).unwrap();
        Self { dir }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn model_path(&self) -> PathBuf {
        self.dir.path().join("model.json")
    }

    /// `xreg` isolated from the user's config and data
    fn xreg(&self) -> Command {
        let mut cmd = Command::cargo_bin("xreg").unwrap();
        cmd.env("XREG_CONFIG", self.config_path())
            .env_remove("XREG_DATA_DIR")
            .env_remove("RUST_LOG");
        cmd
    }

    fn registry(&self, backend: &str) -> Command {
        let mut cmd = self.xreg();
        cmd.arg("-d")
            .arg(self.data_dir())
            .arg("-b")
            .arg(backend)
            .arg("-m")
            .arg(self.model_path());
        cmd
    }
}

#[test]
fn test_path_renderings() {
    let env = Env::new();
    env.xreg()
        .args(["path", "a1['a2'].3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("display:  a1.a2.3"))
        .stdout(predicate::str::contains("storage:  a1,a2,3,"))
        .stdout(predicate::str::contains("abstract: a1,a2,3"));

    env.xreg()
        .args(["path", "labels[2].x"])
        .assert()
        .success()
        .stdout(predicate::str::contains("storage:  labels,#2,x,"));
}

#[test]
fn test_path_syntax_error() {
    let env = Env::new();
    env.xreg()
        .args(["path", "a..b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("column 3"));
}

#[test]
fn test_group_edit_cycle_sqlite() {
    let env = Env::new();

    env.registry("sqlite")
        .args(["write", "/endpoints/e1", r#"{"name": "one"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"epoch\": 1"));
    assert!(env.data_dir().join("xreg.db").exists());

    env.registry("sqlite")
        .args(["set", "/endpoints/e1", "labels.stage", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stage\": \"prod\""))
        .stdout(predicate::str::contains("\"epoch\": 2"));

    env.registry("sqlite")
        .args(["set", "/endpoints/e1", "labels.stage", "dev", "--epoch", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Epoch mismatch"));

    env.registry("sqlite")
        .args(["set", "/endpoints/e1", "labels.owner", "ops", "--epoch", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stage\": \"prod\""))
        .stdout(predicate::str::contains("\"epoch\": 3"));

    env.registry("sqlite")
        .args(["get", "/", "--inline", "endpoints"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"one\""))
        .stdout(predicate::str::contains("\"endpointscount\": 1"));

    env.registry("sqlite")
        .args(["delete", "/endpoints/e1", "--epoch", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Epoch mismatch"));

    env.registry("sqlite")
        .args(["delete", "/endpoints/e1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted /endpoints/e1"));

    env.registry("sqlite")
        .args(["get", "/endpoints/e1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_versions_redb() {
    let env = Env::new();
    let resource = "/endpoints/e1/messages/m1";

    env.registry("redb")
        .args(["write", resource, r#"{"format": "v1"}"#])
        .assert()
        .success();
    env.registry("redb")
        .args(["write", resource, r#"{"format": "v2"}"#, "--method", "post"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"versionid\": \"2\""));

    env.registry("redb")
        .args(["delete", &format!("{}/versions/2", resource)])
        .assert()
        .failure();

    env.registry("redb")
        .args([
            "delete",
            &format!("{}/versions/2", resource),
            "--set-latest",
            "1",
        ])
        .assert()
        .success();

    env.registry("redb")
        .args(["-f", "compact", "get", resource])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""format":"v1""#))
        .stdout(predicate::str::contains(r#""versionscount":1"#));
}

#[test]
fn test_filter_from_cli() {
    let env = Env::new();
    env.registry("sqlite")
        .args([
            "write",
            "/endpoints",
            r#"{"a": {"name": "x"}, "b": {"name": "y"}}"#,
            "--method",
            "post",
        ])
        .assert()
        .success();

    env.registry("sqlite")
        .args(["-f", "compact", "get", "/endpoints", "--filter", "name=y"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""b":"#))
        .stdout(predicate::str::contains(r#""a":"#).not());
}

#[test]
fn test_config_commands() {
    let env = Env::new();

    env.xreg()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    env.xreg()
        .args(["config", "set", "backend", "sqlite"])
        .assert()
        .success();
    env.xreg()
        .args(["config", "get", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::diff("sqlite\n"));

    env.xreg()
        .args(["config", "set", "backend", "postgres"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend"));

    env.xreg()
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    env.xreg()
        .args(["config", "init", "--force"])
        .assert()
        .success();
    env.xreg()
        .args(["config", "get", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::diff("redb\n"));
}

#[test]
fn test_config_supplies_defaults() {
    let env = Env::new();
    env.xreg()
        .args(["config", "set", "model_file"])
        .arg(env.model_path())
        .assert()
        .success();
    env.xreg()
        .args(["config", "set", "data_dir"])
        .arg(env.data_dir())
        .assert()
        .success();
    env.xreg()
        .args(["config", "set", "registry_id", "from-config"])
        .assert()
        .success();

    env.xreg()
        .args(["get", "/"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"registryid\": \"from-config\""))
        .stdout(predicate::str::contains("endpointsurl"));
}

#[test]
fn test_completions() {
    let env = Env::new();
    env.xreg()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("xreg"));
}
