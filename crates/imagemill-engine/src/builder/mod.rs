//! Container engine backends.
//!
//! Every backend implements the same five-step [`Builder`] contract:
//!
//! ```text
//! init() → configure(flags) → queue(image)* → run() → terminate()
//!
//! run():        Build ─► Squash (build && squash) ─► Tag (build) ─► Push (push)
//! terminate():  Cleanup (build, built images only) ─► delete rendered Dockerfiles
//! ```
//!
//! Stages run strictly one after another; a failing stage stops the rest.

mod buildx;
mod docker;
mod squash;

use std::collections::BTreeMap;
use std::fmt;

use imagemill_build::ImageDescriptor;
use imagemill_core::{BuildFlags, EngineKind};

use crate::error::EngineError;
use crate::executor::CommandExecutor;
use crate::runner::TaskRunner;
use crate::task::{Task, TaskBuilder};

pub use buildx::BuildxBuilder;
pub use docker::DockerBuilder;
pub use squash::{ImageInspect, InspectConfig, import_changes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Build,
    Squash,
    Tag,
    Push,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Build => "build",
            Stage::Squash => "squash",
            Stage::Tag => "tag",
            Stage::Push => "push",
            Stage::Cleanup => "cleanup",
        })
    }
}

/// Lifecycle of one queued image. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImageState {
    Queued,
    Built,
    Squashed,
    Tagged,
    Pushed,
    Cleaned,
}

/// A queued image and how far it got.
#[derive(Debug, Clone)]
pub struct TrackedImage {
    pub descriptor: ImageDescriptor,
    pub state: ImageState,
    /// Reached `Built`; cleanup is attempted for these only
    pub built: bool,
}

impl TrackedImage {
    fn new(descriptor: ImageDescriptor) -> Self {
        Self {
            descriptor,
            state: ImageState::Queued,
            built: false,
        }
    }

    fn advance(&mut self, state: ImageState) {
        if state > self.state {
            tracing::trace!(image = self.descriptor.name(), from = ?self.state, to = ?state, "state");
            self.state = state;
        }
        if state == ImageState::Built {
            self.built = true;
        }
    }
}

/// The per-backend contract driven by the orchestrator.
#[allow(async_fn_in_trait)]
pub trait Builder {
    /// Reset backend state and create the stage runners.
    fn init(&mut self);

    /// Propagate concurrency, dry-run policy and deadlines to every runner.
    fn configure(&mut self, flags: &BuildFlags);

    /// Append the image's commands to the stage runners.
    fn queue(&mut self, image: ImageDescriptor) -> Result<(), EngineError>;

    /// Execute the stages in order, stopping at the first failure.
    async fn run(&mut self) -> Result<(), EngineError>;

    /// Best-effort cleanup; failures are logged, never returned.
    async fn terminate(&mut self);

    /// Queued images with their current state.
    fn images(&self) -> &[TrackedImage];
}

/// Backend selected at runtime.
pub enum Engine<'a, E: CommandExecutor> {
    Docker(DockerBuilder<'a, E>),
    Buildx(BuildxBuilder<'a, E>),
}

impl<'a, E: CommandExecutor> Engine<'a, E> {
    pub fn new(kind: EngineKind, executor: &'a E) -> Self {
        match kind {
            EngineKind::Docker => Engine::Docker(DockerBuilder::new(executor)),
            EngineKind::Buildx => Engine::Buildx(BuildxBuilder::new(executor)),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Docker(_) => EngineKind::Docker,
            Engine::Buildx(_) => EngineKind::Buildx,
        }
    }
}

impl<E: CommandExecutor> Builder for Engine<'_, E> {
    fn init(&mut self) {
        tracing::info!(engine = %self.kind(), "initializing");
        match self {
            Engine::Docker(b) => b.init(),
            Engine::Buildx(b) => b.init(),
        }
    }

    fn configure(&mut self, flags: &BuildFlags) {
        match self {
            Engine::Docker(b) => b.configure(flags),
            Engine::Buildx(b) => b.configure(flags),
        }
    }

    fn queue(&mut self, image: ImageDescriptor) -> Result<(), EngineError> {
        match self {
            Engine::Docker(b) => b.queue(image),
            Engine::Buildx(b) => b.queue(image),
        }
    }

    async fn run(&mut self) -> Result<(), EngineError> {
        match self {
            Engine::Docker(b) => b.run().await,
            Engine::Buildx(b) => b.run().await,
        }
    }

    async fn terminate(&mut self) {
        match self {
            Engine::Docker(b) => b.terminate().await,
            Engine::Buildx(b) => b.terminate().await,
        }
    }

    fn images(&self) -> &[TrackedImage] {
        match self {
            Engine::Docker(b) => b.images(),
            Engine::Buildx(b) => b.images(),
        }
    }
}

// ── Shared helpers ──

const DOCKER: &str = "docker";

fn docker(verbose: bool) -> TaskBuilder {
    Task::builder(DOCKER).verbose(verbose)
}

fn label_args(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .flat_map(|(k, v)| ["--label".to_owned(), format!("{k}={v}")])
        .collect()
}

fn build_arg_args(args: &BTreeMap<String, String>) -> Vec<String> {
    args.iter()
        .flat_map(|(k, v)| ["--build-arg".to_owned(), format!("{k}={v}")])
        .collect()
}

fn tag_args(tags: &[String]) -> Vec<String> {
    tags.iter()
        .flat_map(|t| ["-t".to_owned(), t.clone()])
        .collect()
}

/// Apply run flags to a stage runner; `threads` is the stage's width.
fn configure_runner(runner: &mut TaskRunner, flags: &BuildFlags, threads: usize) {
    runner.set_threads(threads);
    runner.set_dry_run(flags.dry_run());
    runner.set_timeout(flags.timeout);
}

/// Delete rendered Dockerfiles of every queued image, logging failures.
fn remove_rendered_dockerfiles(images: &[TrackedImage]) {
    for image in images {
        if let Err(e) = image.descriptor.remove_rendered_dockerfile() {
            tracing::warn!(
                dockerfile = %image.descriptor.dockerfile().display(),
                error = %e,
                "failed to remove rendered Dockerfile"
            );
        }
    }
}
