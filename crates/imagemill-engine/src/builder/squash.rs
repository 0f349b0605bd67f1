//! Layer squashing for the docker backend.
//!
//! ```text
//!   run     docker run --name run-<image> <image> true
//!   export  docker export run-<image> -o $TMP/run-<image>.tar   ┐ concurrently
//!   inspect docker inspect --format json <image>                ┘
//!   import  docker import --change ... $TMP/run-<image>.tar <image>
//! ```
//!
//! Each step runs across all images before the next starts. Throwaway
//! containers and the interim image are removed later by the cleanup stage.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use imagemill_build::image::sanitize_for_file_name;
use imagemill_core::BuildFlags;
use serde::Deserialize;

use super::{ImageState, Stage, TrackedImage, configure_runner, docker};
use crate::bytes::{byte_count_iec, reduction_percent};
use crate::error::{EngineError, ExecError};
use crate::executor::CommandExecutor;
use crate::runner::TaskRunner;
use crate::task::Task;

/// One element of `docker inspect --format json` output.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    pub id: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub config: InspectConfig,
}

impl ImageInspect {
    /// First 12 hex digits of the content hash.
    pub fn short_id(&self) -> &str {
        let id = self.id.strip_prefix("sha256:").unwrap_or(&self.id);
        id.get(..12).unwrap_or(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectConfig {
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// `--change` directives that restore the image metadata on import.
pub fn import_changes(config: &InspectConfig) -> Vec<String> {
    let mut changes = Vec::new();

    for env in config.env.iter().flatten() {
        changes.push(format!("ENV {env}"));
    }
    if let Some(cmd) = config.cmd.as_ref().filter(|c| !c.is_empty()) {
        changes.push(format!("CMD {}", json_array(cmd)));
    }
    if let Some(entrypoint) = config.entrypoint.as_ref().filter(|e| !e.is_empty()) {
        changes.push(format!("ENTRYPOINT {}", json_array(entrypoint)));
    }
    if let Some(volumes) = config.volumes.as_ref().filter(|v| !v.is_empty()) {
        let paths: Vec<String> = volumes.keys().cloned().collect();
        changes.push(format!("VOLUME {}", json_array(&paths)));
    }
    if !config.working_dir.is_empty() {
        changes.push(format!("WORKDIR {}", config.working_dir));
    }
    for (key, value) in config.labels.iter().flatten() {
        changes.push(format!("LABEL {key}=\"{}\"", value.replace('\n', "")));
    }

    changes
}

fn json_array(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

/// `docker inspect` one image, bounded by the run's per-task deadline.
pub(super) async fn inspect<E: CommandExecutor>(
    executor: &E,
    image: &str,
    timeout: Option<Duration>,
) -> Result<ImageInspect, EngineError> {
    let args: Vec<String> = ["inspect", "--format", "json", image]
        .into_iter()
        .map(str::to_owned)
        .collect();
    let exec = executor.exec(super::DOCKER, &args);
    let output = match timeout {
        Some(after) => tokio::time::timeout(after, exec)
            .await
            .unwrap_or_else(|_| {
                Err(ExecError::TimedOut {
                    command: crate::task::command_line(super::DOCKER, &args),
                    after,
                })
            }),
        None => exec.await,
    }
    .map_err(|e| EngineError::Inspect {
        image: image.to_owned(),
        source: e,
    })?;
    tracing::trace!(image, output = %output.trim_end(), "inspect output");

    let parsed: Vec<ImageInspect> =
        serde_json::from_str(&output).map_err(|e| EngineError::InspectParse {
            image: image.to_owned(),
            source: e,
        })?;
    parsed
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::InspectEmpty {
            image: image.to_owned(),
        })
}

/// Exported archives; deleted when dropped.
struct Archives(Vec<PathBuf>);

impl Drop for Archives {
    fn drop(&mut self) {
        for path in &self.0 {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed archive"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove archive")
                }
            }
        }
    }
}

/// Squash every built image that asked for it.
///
/// Removal tasks for the throwaway containers and interim images are
/// appended to `cleanup`, even when a step fails.
pub(super) async fn squash_images<E: CommandExecutor>(
    executor: &E,
    flags: &BuildFlags,
    images: &mut [TrackedImage],
    cleanup: &mut Vec<Task>,
) -> Result<(), EngineError> {
    let targets: Vec<usize> = images
        .iter()
        .enumerate()
        .filter(|(_, image)| image.built && image.descriptor.squash())
        .map(|(index, _)| index)
        .collect();
    if targets.is_empty() {
        return Ok(());
    }

    let stage_error = |source| EngineError::Stage {
        stage: Stage::Squash,
        source,
    };

    let mut run = TaskRunner::new();
    let mut export = TaskRunner::new();
    configure_runner(&mut run, flags, flags.threads);
    configure_runner(&mut export, flags, flags.threads);
    let mut archives = Archives(Vec::with_capacity(targets.len()));

    for &index in &targets {
        let name = images[index].descriptor.name();
        let container = format!("run-{}", sanitize_for_file_name(name));
        let archive = std::env::temp_dir().join(format!("{container}.tar"));

        run.add(
            docker(flags.verbose)
                .args(["run", "--name", container.as_str(), name, "true"])
                .build()?,
        );
        export.add(
            docker(flags.verbose)
                .arg("export")
                .arg(container.as_str())
                .arg("-o")
                .arg(archive.display().to_string())
                .pre_info(format!("Squashing {name}"))
                .build()?,
        );
        cleanup.push(docker(flags.verbose).args(["rm", "-f", container.as_str()]).build()?);
        archives.0.push(archive);
    }

    run.run(executor).await.map_err(stage_error)?;

    let inspections = futures::stream::iter(targets.iter().map(|&index| {
        let name = images[index].descriptor.name().to_owned();
        async move { inspect(executor, &name, flags.timeout).await }
    }))
    .buffered(flags.threads.max(1))
    .collect::<Vec<_>>();
    let (exported, inspections) = futures::future::join(export.run(executor), inspections).await;

    let mut before = Vec::with_capacity(targets.len());
    for result in inspections {
        let inspection = result?;
        cleanup.push(
            docker(flags.verbose)
                .args(["image", "rm", "-f", inspection.short_id()])
                .build()?,
        );
        before.push(inspection);
    }
    exported.map_err(stage_error)?;

    let mut import = TaskRunner::new();
    configure_runner(&mut import, flags, flags.threads);
    for ((&index, inspection), archive) in targets.iter().zip(&before).zip(&archives.0) {
        let name = images[index].descriptor.name();
        let mut task = docker(flags.verbose).arg("import");
        for change in import_changes(&inspection.config) {
            task = task.arg("--change").arg(change);
        }
        import.add(task.arg(archive.display().to_string()).arg(name).build()?);
    }

    let imported = import.run(executor).await;
    drop(archives);
    imported.map_err(stage_error)?;

    for (&index, was) in targets.iter().zip(&before) {
        let image = &mut images[index];
        image.advance(ImageState::Squashed);

        let name = image.descriptor.name();
        match inspect(executor, name, flags.timeout).await {
            Ok(now) => tracing::info!(
                image = name,
                was = %byte_count_iec(was.size),
                is = %byte_count_iec(now.size),
                reduction = %format!("{:.1}%", reduction_percent(was.size, now.size)),
                "squashed"
            ),
            Err(e) => tracing::warn!(image = name, error = %e, "failed to measure squashed image"),
        }
    }

    Ok(())
}
