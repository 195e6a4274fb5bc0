//! Integration tests for the `todo` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

/// `todo` running inside `dir` against a database in that directory.
fn todo(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("todo");
    cmd.current_dir(dir.path())
        .env("DATABASE_PATH", db_path(dir));
    for key in ["RUST_LOG", "PORT", "BASE_URL", "WEBHOOKS", "LOG_FORMAT", "LOG_DIR"] {
        cmd.env_remove(key);
    }
    cmd
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data/todo.db")
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("create-user"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_serve_help_lists_flags() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .args(["serve", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--port"))
            .stdout(predicate::str::contains("--db-path"))
            .stdout(predicate::str::contains("--dev"));
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        todo(&dir).arg("frobnicate").assert().failure();
    }
}

mod database {
    use super::*;

    #[test]
    fn test_init_db_creates_file() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .arg("init-db")
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));
        assert!(db_path(&dir).exists());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = TempDir::new().unwrap();
        todo(&dir).arg("init-db").assert().success();
        todo(&dir).arg("init-db").assert().success();
    }
}

mod users {
    use super::*;

    #[test]
    fn test_create_user() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .args(["create-user", "Ann"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created user ann"));
    }

    #[test]
    fn test_duplicate_user_fails() {
        let dir = TempDir::new().unwrap();
        todo(&dir).args(["create-user", "ann"]).assert().success();
        todo(&dir)
            .args(["create-user", "ann"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already taken"));
    }

    #[test]
    fn test_invalid_username_fails() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .args(["create-user", "--", "-nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid username"));
        assert!(!db_path(&dir).exists());
    }
}

mod invites {
    use super::*;

    #[test]
    fn test_invite_prints_link_under_base_url() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .env("BASE_URL", "https://todo.example.com/")
            .arg("invite")
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"^https://todo\.example\.com/invite/[A-Za-z0-9]{24}\n$").unwrap());
    }

    #[test]
    fn test_invites_are_unique() {
        let dir = TempDir::new().unwrap();
        let first = todo(&dir).arg("invite").output().unwrap();
        let second = todo(&dir).arg("invite").output().unwrap();
        assert!(first.status.success());
        assert_ne!(first.stdout, second.stdout);
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_file_sets_db_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("custom.toml"),
            "[server]\ndb_path = \"from-file.db\"\n",
        )
        .unwrap();
        let mut cmd = cargo_bin_cmd!("todo");
        cmd.current_dir(dir.path())
            .env_remove("DATABASE_PATH")
            .args(["--config", "custom.toml", "init-db"])
            .assert()
            .success();
        assert!(dir.path().join("from-file.db").exists());
    }

    #[test]
    fn test_missing_config_file_fails() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .args(["--config", "absent.toml", "init-db"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("absent.toml"));
    }

    #[test]
    fn test_malformed_webhooks_env_is_ignored() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .env("WEBHOOKS", "[{\"type\": \"discord\"")
            .arg("init-db")
            .assert()
            .success()
            .stderr(predicate::str::contains("Ignoring WEBHOOKS"));
    }

    #[test]
    fn test_bad_port_env_fails() {
        let dir = TempDir::new().unwrap();
        todo(&dir)
            .env("PORT", "not-a-port")
            .arg("init-db")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid PORT"));
    }
}
