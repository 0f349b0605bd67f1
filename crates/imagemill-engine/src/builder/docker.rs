use imagemill_build::ImageDescriptor;
use imagemill_core::BuildFlags;

use super::squash::squash_images;
use super::{
    Builder, ImageState, Stage, TrackedImage, build_arg_args, configure_runner, docker,
    label_args, remove_rendered_dockerfiles,
};
use crate::error::EngineError;
use crate::executor::{CommandExecutor, RealExecutor};
use crate::runner::TaskRunner;
use crate::task::Task;

/// Classic `docker build` backend. Single platform; supports squashing.
pub struct DockerBuilder<'a, E: CommandExecutor = RealExecutor> {
    executor: &'a E,
    flags: BuildFlags,
    build: TaskRunner,
    tag: TaskRunner,
    push: TaskRunner,
    images: Vec<TrackedImage>,
    /// Containers and interim images left behind by squashing
    squash_leftovers: Vec<Task>,
}

impl<'a, E: CommandExecutor> DockerBuilder<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self {
            executor,
            flags: BuildFlags::default(),
            build: TaskRunner::new(),
            tag: TaskRunner::new(),
            push: TaskRunner::new(),
            images: Vec::new(),
            squash_leftovers: Vec::new(),
        }
    }

    pub fn build_tasks(&self) -> &[Task] {
        self.build.tasks()
    }

    pub fn tag_tasks(&self) -> &[Task] {
        self.tag.tasks()
    }

    pub fn push_tasks(&self) -> &[Task] {
        self.push.tasks()
    }

    fn advance_all(&mut self, from: ImageState, to: ImageState) {
        for image in &mut self.images {
            if image.built && image.state >= from {
                image.advance(to);
            }
        }
    }

    /// Remove throwaway containers, interim images and every built image.
    async fn cleanup(&mut self) -> Result<(), EngineError> {
        let mut runner = TaskRunner::new();
        configure_runner(&mut runner, &self.flags, self.flags.threads);
        for task in &self.squash_leftovers {
            runner.add_unique(task.clone());
        }

        let mut removals = Vec::new();
        for (index, image) in self.images.iter().enumerate() {
            if !image.built {
                continue;
            }
            let task = docker(self.flags.verbose)
                .args(["image", "rm", "-f", image.descriptor.name()])
                .build()?;
            runner.add_unique(task.clone());
            removals.push((index, task));
        }

        let outcome = runner.run_tracked(self.executor).await;
        for &done in &outcome.completed {
            let Some(task) = runner.tasks().get(done) else {
                continue;
            };
            for (index, removal) in &removals {
                if removal == task {
                    self.images[*index].advance(ImageState::Cleaned);
                }
            }
        }
        outcome.into_result().map_err(|source| EngineError::Stage {
            stage: Stage::Cleanup,
            source,
        })
    }
}

impl<E: CommandExecutor> Builder for DockerBuilder<'_, E> {
    fn init(&mut self) {
        self.build = TaskRunner::new();
        self.tag = TaskRunner::new();
        self.push = TaskRunner::new();
        self.images.clear();
        self.squash_leftovers.clear();
    }

    fn configure(&mut self, flags: &BuildFlags) {
        self.flags = flags.clone();
        configure_runner(&mut self.build, flags, flags.threads);
        // Tags of one image may overwrite each other; keep queue order
        configure_runner(&mut self.tag, flags, 1);
        configure_runner(&mut self.push, flags, flags.threads);
    }

    fn queue(&mut self, image: ImageDescriptor) -> Result<(), EngineError> {
        let verbose = self.flags.verbose;
        let name = image.name();

        self.build.add(
            docker(verbose)
                .arg("build")
                .arg("-f")
                .arg(image.dockerfile().display().to_string())
                .arg("-t")
                .arg(name)
                .args(label_args(image.labels()))
                .args(build_arg_args(image.args()))
                .args(image.extra_args().iter().cloned())
                .arg(image.context_dir().display().to_string())
                .pre_info(format!("Building {name}"))
                .build()?,
        );

        for tag in image.tags() {
            self.tag.add_unique(
                docker(verbose)
                    .args(["tag", name, tag.as_str()])
                    .pre_info(format!("Tagging {tag}"))
                    .build()?,
            );

            let mut push = docker(verbose)
                .args(["push", tag.as_str()])
                .pre_info(format!("Pushing {tag}"));
            if !verbose {
                push = push.arg("--quiet");
            }
            self.push.add_unique(push.build()?);
        }

        tracing::debug!(image = name, tags = ?image.tags(), squash = image.squash(), "queued");
        self.images.push(TrackedImage::new(image));
        Ok(())
    }

    async fn run(&mut self) -> Result<(), EngineError> {
        if self.flags.build {
            let outcome = self.build.run_tracked(self.executor).await;
            // One build task per image, in queue order
            for &index in &outcome.completed {
                if let Some(image) = self.images.get_mut(index) {
                    image.advance(ImageState::Built);
                }
            }
            outcome.into_result().map_err(|source| EngineError::Stage {
                stage: Stage::Build,
                source,
            })?;
        }

        if self.flags.build && self.images.iter().any(|image| image.descriptor.squash()) {
            squash_images(
                self.executor,
                &self.flags,
                &mut self.images,
                &mut self.squash_leftovers,
            )
            .await?;
        }

        if self.flags.build {
            self.tag.run(self.executor).await.map_err(|source| EngineError::Stage {
                stage: Stage::Tag,
                source,
            })?;
            self.advance_all(ImageState::Built, ImageState::Tagged);
        }

        if self.flags.push {
            self.push.run(self.executor).await.map_err(|source| EngineError::Stage {
                stage: Stage::Push,
                source,
            })?;
            self.advance_all(ImageState::Tagged, ImageState::Pushed);
        }

        Ok(())
    }

    async fn terminate(&mut self) {
        if self.flags.build
            && let Err(e) = self.cleanup().await
        {
            tracing::warn!(error = %e, "cleanup failed; some images or containers may remain");
        }

        if self.flags.delete {
            remove_rendered_dockerfiles(&self.images);
        }
    }

    fn images(&self) -> &[TrackedImage] {
        &self.images
    }
}
