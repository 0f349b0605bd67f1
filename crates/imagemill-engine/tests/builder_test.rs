use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use imagemill_build::{ImageDescriptor, Provenance, Synthesizer, plan_image};
use imagemill_core::{BuildFlags, Config, EngineKind};
use imagemill_engine::executor::CommandExecutor;
use imagemill_engine::{Builder, Engine, EngineError, ExecError, ImageState, Stage};
use mockall::mock;

mock! {
    Executor {}

    impl CommandExecutor for Executor {
        async fn exec(&self, program: &str, args: &[String]) -> Result<String, ExecError>;
        async fn exec_streaming(&self, program: &str, args: &[String]) -> Result<(), ExecError>;
    }
}

const CONFIG: &str = r#"
registry: ghcr.io
prefix: acme
images:
  app:
    dockerfile: Dockerfile
    variables:
      alpine: ["3.19", "3.20"]
    args:
      ALPINE: "{{ .alpine }}"
    tags:
      - "app:{{ .alpine }}"
      - "app:latest"
"#;

const INSPECT: &str = r#"[{
    "Id": "sha256:0123456789abcdef0123456789abcdef",
    "Size": 4096,
    "Config": {
        "Env": ["PATH=/usr/bin"],
        "Cmd": ["sh"],
        "WorkingDir": "/srv"
    }
}]"#;

fn descriptors(yaml: &str, flags: &BuildFlags) -> Vec<ImageDescriptor> {
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    let synthesizer = Synthesizer::new(&config, flags)
        .with_provenance(Provenance::new("2024-01-01T00:00:00Z"));
    let name = config.image_names().next().unwrap().to_owned();
    plan_image(&synthesizer, &name, Path::new("/work"))
        .unwrap()
        .entries
        .into_iter()
        .map(|(_, descriptor)| descriptor)
        .collect()
}

fn flags(build: bool, push: bool) -> BuildFlags {
    BuildFlags {
        build,
        push,
        threads: 1,
        ..Default::default()
    }
}

/// Mock that records every command line and answers `inspect` with metadata.
fn recording_mock(log: Arc<Mutex<Vec<String>>>, fail_on: Option<&'static str>) -> MockExecutor {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(move |program, args| {
        let line = format!("{program} {}", args.join(" "));
        log.lock().unwrap().push(line.clone());
        if fail_on.is_some_and(|needle| line.contains(needle)) {
            return Err(ExecError::CommandFailed {
                command: line,
                status: "exit status: 1".to_owned(),
                output: "boom".to_owned(),
            });
        }
        if args.first().is_some_and(|a| a == "inspect") {
            return Ok(INSPECT.to_owned());
        }
        Ok(String::new())
    });
    mock
}

fn engine<'a>(kind: EngineKind, executor: &'a MockExecutor, flags: &BuildFlags) -> Engine<'a, MockExecutor> {
    let mut engine = Engine::new(kind, executor);
    engine.init();
    engine.configure(flags);
    for descriptor in descriptors(CONFIG, flags) {
        engine.queue(descriptor).unwrap();
    }
    engine
}

// ── Docker Queue Tests ──

#[test]
fn docker_queue_renders_commands() {
    let mock = MockExecutor::new();
    let flags = flags(true, true);
    let Engine::Docker(docker) = engine(EngineKind::Docker, &mock, &flags) else {
        panic!("expected docker engine");
    };

    let build = &docker.build_tasks()[0];
    assert_eq!(build.program(), "docker");
    assert_eq!(
        build.args(),
        [
            "build",
            "-f",
            "/work/Dockerfile",
            "-t",
            "app-alpine-3.19",
            "--label",
            "org.opencontainers.image.created=2024-01-01T00:00:00Z",
            "--build-arg",
            "ALPINE=3.19",
            "/work",
        ]
    );

    let tags: Vec<String> = docker.tag_tasks().iter().map(ToString::to_string).collect();
    assert_eq!(
        tags,
        vec![
            "docker tag app-alpine-3.19 ghcr.io/acme/app:3.19",
            "docker tag app-alpine-3.19 ghcr.io/acme/app:latest",
            "docker tag app-alpine-3.20 ghcr.io/acme/app:3.20",
            "docker tag app-alpine-3.20 ghcr.io/acme/app:latest",
        ]
    );

    // Both combinations resolve to the same `latest` reference
    let pushes: Vec<String> = docker.push_tasks().iter().map(ToString::to_string).collect();
    assert_eq!(
        pushes,
        vec![
            "docker push ghcr.io/acme/app:3.19 --quiet",
            "docker push ghcr.io/acme/app:latest --quiet",
            "docker push ghcr.io/acme/app:3.20 --quiet",
        ]
    );
}

// ── Docker Run Tests ──

#[tokio::test]
async fn docker_stages_run_in_order_and_clean_up() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mock = recording_mock(log.clone(), None);
    let flags = flags(true, true);
    let mut engine = engine(EngineKind::Docker, &mock, &flags);

    engine.run().await.unwrap();
    assert!(engine.images().iter().all(|i| i.state == ImageState::Pushed));
    engine.terminate().await;

    let log = log.lock().unwrap().clone();
    let kinds: Vec<&str> = log.iter().map(|l| l.split(' ').nth(1).unwrap()).collect();
    assert_eq!(
        kinds,
        vec!["build", "build", "tag", "tag", "tag", "tag", "push", "push", "push", "image", "image"]
    );
    assert!(log.contains(&"docker image rm -f app-alpine-3.19".to_owned()));
    assert!(engine.images().iter().all(|i| i.state == ImageState::Cleaned));
}

#[tokio::test]
async fn build_failure_stops_later_stages_and_cleans_only_built_images() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mock = recording_mock(log.clone(), Some("build -f /work/Dockerfile -t app-alpine-3.20"));
    let flags = flags(true, true);
    let mut engine = engine(EngineKind::Docker, &mock, &flags);

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, EngineError::Stage { stage: Stage::Build, .. }), "got: {err}");
    engine.terminate().await;

    let log = log.lock().unwrap().clone();
    assert!(!log.iter().any(|l| l.starts_with("docker tag") || l.starts_with("docker push")));
    assert_eq!(
        log.iter().filter(|l| l.starts_with("docker image rm")).collect::<Vec<_>>(),
        vec!["docker image rm -f app-alpine-3.19"]
    );

    let states: Vec<ImageState> = engine.images().iter().map(|i| i.state).collect();
    assert_eq!(states, vec![ImageState::Cleaned, ImageState::Queued]);
}

#[tokio::test]
async fn push_failure_still_cleans_up() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mock = recording_mock(log.clone(), Some("push ghcr.io/acme/app:latest"));
    let flags = flags(true, true);
    let mut engine = engine(EngineKind::Docker, &mock, &flags);

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, EngineError::Stage { stage: Stage::Push, .. }));
    engine.terminate().await;

    assert!(engine.images().iter().all(|i| i.state == ImageState::Cleaned));
}

#[tokio::test]
async fn push_without_build_is_a_dry_run() {
    let mock = MockExecutor::new();
    let flags = flags(false, true);
    let mut engine = engine(EngineKind::Docker, &mock, &flags);

    engine.run().await.unwrap();
    engine.terminate().await;
    assert!(engine.images().iter().all(|i| i.state == ImageState::Queued));
}

// ── Squash Tests ──

#[tokio::test]
async fn squash_replays_metadata_and_removes_leftovers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mock = recording_mock(log.clone(), None);
    let flags = BuildFlags {
        squash: true,
        ..flags(true, false)
    };
    let mut engine = engine(EngineKind::Docker, &mock, &flags);

    engine.run().await.unwrap();
    assert!(engine.images().iter().all(|i| i.state == ImageState::Tagged));
    engine.terminate().await;

    let log = log.lock().unwrap().clone();
    let position = |needle: &str| {
        log.iter()
            .position(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("missing {needle:?} in {log:#?}"))
    };

    assert!(position("docker run --name run-app-alpine-3.19 app-alpine-3.19 true") < position("docker export run-app-alpine-3.19"));
    assert!(position("docker export run-app-alpine-3.19") < position("docker import"));
    assert!(position("docker import") < position("docker tag"));

    let import = &log[position("docker import")];
    assert!(import.contains("--change ENV PATH=/usr/bin"), "{import}");
    assert!(import.contains(r#"--change CMD ["sh"]"#), "{import}");
    assert!(import.contains("--change WORKDIR /srv"), "{import}");
    assert!(import.ends_with("run-app-alpine-3.19.tar app-alpine-3.19"), "{import}");

    assert!(log.contains(&"docker rm -f run-app-alpine-3.19".to_owned()));
    assert!(log.contains(&"docker image rm -f 0123456789ab".to_owned()));
    // Interim id is shared by both images in this mock; removed once
    assert_eq!(log.iter().filter(|l| l.ends_with("0123456789ab")).count(), 1);
}

#[tokio::test]
async fn squash_export_failure_aborts_before_tagging() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mock = recording_mock(log.clone(), Some("docker export"));
    let flags = BuildFlags {
        squash: true,
        ..flags(true, false)
    };
    let mut engine = engine(EngineKind::Docker, &mock, &flags);

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, EngineError::Stage { stage: Stage::Squash, .. }), "got: {err}");
    engine.terminate().await;

    let log = log.lock().unwrap().clone();
    assert!(!log.iter().any(|l| l.starts_with("docker tag") || l.starts_with("docker import")));
    assert!(log.contains(&"docker rm -f run-app-alpine-3.19".to_owned()));
    assert!(log.contains(&"docker image rm -f app-alpine-3.20".to_owned()));
}

/// Answers every command at once, except `inspect`, which never returns.
struct HangingInspect {
    log: Mutex<Vec<String>>,
}

impl CommandExecutor for HangingInspect {
    async fn exec(&self, program: &str, args: &[String]) -> Result<String, ExecError> {
        self.log.lock().unwrap().push(format!("{program} {}", args.join(" ")));
        if args.first().is_some_and(|a| a == "inspect") {
            std::future::pending::<()>().await;
        }
        Ok(String::new())
    }

    async fn exec_streaming(&self, _program: &str, _args: &[String]) -> Result<(), ExecError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn squash_inspect_is_bounded_by_the_task_timeout() {
    let executor = HangingInspect {
        log: Mutex::new(Vec::new()),
    };
    let flags = BuildFlags {
        squash: true,
        timeout: Some(Duration::from_secs(5)),
        ..flags(true, false)
    };
    let mut engine = Engine::new(EngineKind::Docker, &executor);
    engine.init();
    engine.configure(&flags);
    for descriptor in descriptors(CONFIG, &flags) {
        engine.queue(descriptor).unwrap();
    }

    let err = engine.run().await.unwrap_err();
    match err {
        EngineError::Inspect {
            ref image,
            source: ExecError::TimedOut { ref command, after },
        } => {
            assert_eq!(image, "app-alpine-3.19");
            assert_eq!(command, "docker inspect --format json app-alpine-3.19");
            assert_eq!(after, Duration::from_secs(5));
        }
        other => panic!("expected an inspect timeout, got {other:?}"),
    }
    engine.terminate().await;

    let log = executor.log.lock().unwrap().clone();
    assert!(!log.iter().any(|l| l.starts_with("docker import") || l.starts_with("docker tag")));
    assert!(log.contains(&"docker rm -f run-app-alpine-3.19".to_owned()));
}

// ── Buildx Tests ──

#[tokio::test]
async fn buildx_builds_with_platforms_and_pushes_from_cache() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mock = recording_mock(log.clone(), None);
    let flags = BuildFlags {
        engine: EngineKind::Buildx,
        squash: true,
        ..flags(true, true)
    };

    let mut engine = Engine::new(EngineKind::Buildx, &mock);
    engine.init();
    engine.configure(&flags);
    let yaml = CONFIG.replace("    dockerfile: Dockerfile", "    dockerfile: Dockerfile\n    platforms: [linux/amd64, linux/arm64]");
    for descriptor in descriptors(&yaml, &flags) {
        engine.queue(descriptor).unwrap();
    }

    engine.run().await.unwrap();
    engine.terminate().await;

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 4);
    assert!(log[0].starts_with(
        "docker buildx build --platform linux/amd64,linux/arm64 -f /work/Dockerfile \
         -t ghcr.io/acme/app:3.19 -t ghcr.io/acme/app:latest"
    ), "{}", log[0]);
    assert!(log[0].ends_with("--build-arg ALPINE=3.19 /work"));
    assert!(log[2].ends_with("--push /work"));
    assert!(!log.iter().any(|l| l.contains("docker tag") || l.contains("image rm") || l.contains("import")));
    assert!(engine.images().iter().all(|i| i.state == ImageState::Pushed));
}
