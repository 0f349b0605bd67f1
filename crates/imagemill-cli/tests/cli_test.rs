use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn imagemill() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("imagemill");
    cmd.env_remove("RUST_LOG").arg("--no-color");
    cmd
}

const BUILD_FILE: &str = r#"
maintainer: Jane <jane@example.com>
images:
  app:
    dockerfile: app/Dockerfile.tpl
    variables:
      alpine: ["3.19", "3.20"]
      variant: [slim, full]
    excludes:
      - alpine: "3.19"
        variant: full
    tags:
      - "app:{{ .alpine }}-{{ .variant }}"
"#;

fn project(build_file: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("app")).unwrap();
    std::fs::write(
        tmp.path().join("app/Dockerfile.tpl"),
        "FROM alpine:{{ .alpine }}\n",
    )
    .unwrap();
    std::fs::write(tmp.path().join("build.yaml"), build_file).unwrap();
    tmp
}

fn config(tmp: &TempDir) -> PathBuf {
    tmp.path().join("build.yaml")
}

// ── Help / Version ──

#[test]
fn shows_help() {
    imagemill()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build matrices of Docker images"))
        .stdout(predicate::str::contains("--parallel"));
}

#[test]
fn shows_version() {
    imagemill()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("imagemill"));
}

#[test]
fn config_is_required() {
    imagemill()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--config"));
}

#[test]
fn unknown_engine_is_rejected() {
    imagemill()
        .args(["-c", "build.yaml", "--engine", "kaniko"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("kaniko"));
}

// ── Dry Run ──

#[test]
fn dry_run_renders_dockerfiles_without_building() {
    let tmp = project(BUILD_FILE);

    imagemill()
        .arg("-c")
        .arg(config(&tmp))
        .assert()
        .success()
        .stdout(predicate::str::contains("DRY-RUN"))
        .stdout(predicate::str::contains("docker build"))
        .stdout(predicate::str::contains("3 image(s) queued, 1 excluded"));

    let rendered = tmp.path().join("app/app-alpine-3.20-variant-full.Dockerfile");
    assert_eq!(
        std::fs::read_to_string(rendered).unwrap(),
        "FROM alpine:3.20\n"
    );
    assert!(
        !tmp.path()
            .join("app/app-alpine-3.19-variant-full.Dockerfile")
            .exists()
    );
}

#[test]
fn delete_removes_rendered_dockerfiles() {
    let tmp = project(BUILD_FILE);

    imagemill()
        .arg("-c")
        .arg(config(&tmp))
        .arg("--delete")
        .assert()
        .success();

    let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("app"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(leftovers, vec!["Dockerfile.tpl"]);
}

#[test]
fn image_filter_limits_the_run() {
    let tmp = project(BUILD_FILE);

    imagemill()
        .arg("-c")
        .arg(config(&tmp))
        .args(["--image", "nginx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("image 'nginx' is not defined"));
}

// ── Configuration Errors ──

#[test]
fn missing_build_file_fails() {
    let tmp = TempDir::new().unwrap();

    imagemill()
        .arg("-c")
        .arg(tmp.path().join("missing.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn reserved_variable_key_fails() {
    let tmp = project(
        "images:\n  app:\n    dockerfile: app/Dockerfile.tpl\n    variables:\n      registry: [a]\n    tags: [app]\n",
    );

    imagemill()
        .arg("-c")
        .arg(config(&tmp))
        .assert()
        .failure()
        .stderr(predicate::str::contains("reserved"));
}

#[test]
fn multi_platform_build_requires_buildx() {
    let tmp = project(
        "platforms: [linux/amd64, linux/arm64]\nimages:\n  app:\n    dockerfile: app/Dockerfile.tpl\n    tags: [app]\n",
    );

    imagemill()
        .arg("-c")
        .arg(config(&tmp))
        .arg("--build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("buildx"));
}
