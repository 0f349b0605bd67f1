use imagemill_build::ImageDescriptor;
use imagemill_core::BuildFlags;

use super::{
    Builder, ImageState, Stage, TrackedImage, build_arg_args, configure_runner, docker,
    label_args, remove_rendered_dockerfiles, tag_args,
};
use crate::error::EngineError;
use crate::executor::{CommandExecutor, RealExecutor};
use crate::runner::TaskRunner;
use crate::task::Task;

/// `docker buildx build` backend. Multi-platform; final tags are applied at
/// build time and images stay in the buildx cache, so there is nothing to
/// tag or clean up locally.
pub struct BuildxBuilder<'a, E: CommandExecutor = RealExecutor> {
    executor: &'a E,
    flags: BuildFlags,
    build: TaskRunner,
    push: TaskRunner,
    images: Vec<TrackedImage>,
}

impl<'a, E: CommandExecutor> BuildxBuilder<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self {
            executor,
            flags: BuildFlags::default(),
            build: TaskRunner::new(),
            push: TaskRunner::new(),
            images: Vec::new(),
        }
    }

    pub fn build_tasks(&self) -> &[Task] {
        self.build.tasks()
    }

    pub fn push_tasks(&self) -> &[Task] {
        self.push.tasks()
    }

    /// Arguments shared by the build and push invocations, minus the context.
    fn buildx_args(image: &ImageDescriptor) -> Vec<String> {
        let mut args = vec!["buildx".to_owned(), "build".to_owned()];
        if !image.platforms().is_empty() {
            args.push("--platform".to_owned());
            args.push(image.platforms().join(","));
        }
        args.push("-f".to_owned());
        args.push(image.dockerfile().display().to_string());
        args.extend(tag_args(image.tags()));
        args.extend(label_args(image.labels()));
        args.extend(build_arg_args(image.args()));
        args.extend(image.extra_args().iter().cloned());
        args
    }
}

impl<E: CommandExecutor> Builder for BuildxBuilder<'_, E> {
    fn init(&mut self) {
        self.build = TaskRunner::new();
        self.push = TaskRunner::new();
        self.images.clear();
    }

    fn configure(&mut self, flags: &BuildFlags) {
        self.flags = flags.clone();
        configure_runner(&mut self.build, flags, flags.threads);
        configure_runner(&mut self.push, flags, flags.threads);
    }

    fn queue(&mut self, image: ImageDescriptor) -> Result<(), EngineError> {
        let verbose = self.flags.verbose;
        let name = image.name();
        let context = image.context_dir().display().to_string();
        let args = Self::buildx_args(&image);

        self.build.add(
            docker(verbose)
                .args(args.iter().cloned())
                .arg(context.as_str())
                .pre_info(format!("Building {name}"))
                .build()?,
        );
        // Served from the buildx cache
        self.push.add_unique(
            docker(verbose)
                .args(args)
                .arg("--push")
                .arg(context)
                .pre_info(format!("Pushing {}", image.tags().join(", ")))
                .build()?,
        );

        if self.flags.build && image.squash() {
            tracing::warn!(image = name, "squashing is not supported by buildx; skipping");
        }
        tracing::debug!(image = name, platforms = ?image.platforms(), "queued");
        self.images.push(TrackedImage::new(image));
        Ok(())
    }

    async fn run(&mut self) -> Result<(), EngineError> {
        if self.flags.build {
            let outcome = self.build.run_tracked(self.executor).await;
            for &index in &outcome.completed {
                if let Some(image) = self.images.get_mut(index) {
                    image.advance(ImageState::Built);
                    image.advance(ImageState::Tagged);
                }
            }
            outcome.into_result().map_err(|source| EngineError::Stage {
                stage: Stage::Build,
                source,
            })?;
        }

        if self.flags.push {
            self.push.run(self.executor).await.map_err(|source| EngineError::Stage {
                stage: Stage::Push,
                source,
            })?;
            for image in self.images.iter_mut().filter(|image| image.built) {
                image.advance(ImageState::Pushed);
            }
        }

        Ok(())
    }

    async fn terminate(&mut self) {
        if self.flags.delete {
            remove_rendered_dockerfiles(&self.images);
        }
    }

    fn images(&self) -> &[TrackedImage] {
        &self.images
    }
}
