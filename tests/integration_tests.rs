//! Integration tests for packsmith.
//!
//! These drive the compiled binary over its synchronous surfaces: argument
//! validation and the repository cache. Builds that reach the container
//! engine and logins that reach GitHub are covered by unit tests against
//! scripted fakes instead.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a packsmith Command.
fn packsmith() -> Command {
    cargo_bin_cmd!("packsmith")
}

/// A config dir whose packsmith.toml points the repo cache at `repos_root`.
fn config_dir_with_repos_root(repos_root: &std::path::Path) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("packsmith.toml"),
        format!("[repos]\nroot = \"{}\"\n", repos_root.display()),
    )
    .unwrap();
    dir
}

/// A local git repository with one commit, usable as a clone URL.
fn fixture_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();
    fs::write(dir.path().join("README.md"), "# fixture\n").unwrap();

    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("test", "test@test.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();
    dir
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        packsmith().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        packsmith().arg("--version").assert().success();
    }

    #[test]
    fn test_build_missing_source_dir_fails_fast() {
        packsmith()
            .args(["build", "/no/such/source-dir"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not exist"));
    }

    #[test]
    fn test_build_invalid_platform_fails_fast() {
        let dir = TempDir::new().unwrap();
        packsmith()
            .arg("build")
            .arg(dir.path())
            .args(["--platform", "riscv64"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid target platform"));
    }
}

// =============================================================================
// Repository Cache Tests
// =============================================================================

mod repo_cache {
    use super::*;

    #[test]
    fn test_repo_list_empty() {
        let repos = TempDir::new().unwrap();
        let config = config_dir_with_repos_root(repos.path());

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No repositories cloned."));
    }

    #[test]
    fn test_repo_status_never_cloned() {
        let repos = TempDir::new().unwrap();
        let config = config_dir_with_repos_root(repos.path());

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "status", "https://github.com/owner/widget"])
            .assert()
            .success()
            .stdout(predicate::str::contains("not cloned"));
    }

    #[test]
    fn test_repo_clone_status_list_rm_round_trip() {
        let source = fixture_repo();
        let repos = TempDir::new().unwrap();
        let config = config_dir_with_repos_root(repos.path());
        let url = source.path().to_str().unwrap();

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "clone", url])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cloned into"));

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "status", url])
            .assert()
            .success()
            .stdout(predicate::str::contains("cloned at"));

        let cloned = repos.path().join(
            source
                .path()
                .file_name()
                .unwrap()
                .to_str()
                .unwrap(),
        );
        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains(cloned.to_str().unwrap()));

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .arg("repo")
            .arg("rm")
            .arg(&cloned)
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted"));
        assert!(!cloned.exists());
    }

    #[test]
    fn test_repo_rm_missing_path_fails() {
        let repos = TempDir::new().unwrap();
        let config = config_dir_with_repos_root(repos.path());

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "rm", "/no/such/repo"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not exist"));
    }

    #[test]
    fn test_repo_clone_twice_is_rejected() {
        let source = fixture_repo();
        let repos = TempDir::new().unwrap();
        let config = config_dir_with_repos_root(repos.path());
        let url = source.path().to_str().unwrap();

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "clone", url])
            .assert()
            .success();

        packsmith()
            .arg("--config-dir")
            .arg(config.path())
            .args(["repo", "clone", url])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already cloned"));
    }
}
