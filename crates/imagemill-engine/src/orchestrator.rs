use std::path::{Path, PathBuf};

use imagemill_build::{ImageError, ImagePlan, Provenance, SynthesisError, Synthesizer, plan_image};
use imagemill_core::{BuildFlags, Config};

use crate::builder::{Builder, Engine};
use crate::error::EngineError;
use crate::executor::{CommandExecutor, RealExecutor};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("image '{image}' is not defined; available: {}", available.join(", "))]
    UnknownImage {
        image: String,
        available: Vec<String>,
    },

    #[error(transparent)]
    Synthesis {
        #[from]
        source: SynthesisError,
    },

    #[error("failed to prepare Dockerfile for image '{image}'")]
    Dockerfile { image: String, source: ImageError },

    #[error("building image '{image}' failed")]
    Engine { image: String, source: EngineError },
}

/// Per-image counts of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub image: String,
    pub queued: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub images: Vec<ImageSummary>,
}

impl RunSummary {
    pub fn queued(&self) -> usize {
        self.images.iter().map(|i| i.queued).sum()
    }

    pub fn excluded(&self) -> usize {
        self.images.iter().map(|i| i.excluded).sum()
    }
}

/// Drives every selected image through planning and its engine.
///
/// Images are processed one at a time in declaration order. The first
/// failing image stops the run, after its engine has been terminated.
pub struct Orchestrator<'a, E: CommandExecutor = RealExecutor> {
    config: &'a Config,
    flags: &'a BuildFlags,
    workdir: PathBuf,
    executor: E,
    provenance: Option<Provenance>,
}

impl<'a> Orchestrator<'a, RealExecutor> {
    pub fn new(config: &'a Config, flags: &'a BuildFlags, workdir: impl Into<PathBuf>) -> Self {
        Self::with_executor(config, flags, workdir, RealExecutor)
    }
}

impl<'a, E: CommandExecutor> Orchestrator<'a, E> {
    pub fn with_executor(
        config: &'a Config,
        flags: &'a BuildFlags,
        workdir: impl Into<PathBuf>,
        executor: E,
    ) -> Self {
        Self {
            config,
            flags,
            workdir: workdir.into(),
            executor,
            provenance: None,
        }
    }

    /// Use fixed provenance instead of collecting it at run time.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Fixed provenance, or git metadata collected off the async runtime.
    async fn provenance(&self) -> Provenance {
        if let Some(provenance) = &self.provenance {
            return provenance.clone();
        }
        let workdir = self.workdir.clone();
        match tokio::task::spawn_blocking(move || Provenance::collect(&workdir)).await {
            Ok(provenance) => provenance,
            Err(e) => {
                tracing::warn!(error = %e, "collecting git metadata failed; continuing without it");
                Provenance::default()
            }
        }
    }

    pub async fn run(&self) -> Result<RunSummary, OrchestratorError> {
        if let Some(wanted) = &self.flags.image
            && self.config.image(wanted).is_none()
        {
            return Err(OrchestratorError::UnknownImage {
                image: wanted.clone(),
                available: self.config.image_names().map(str::to_owned).collect(),
            });
        }

        let provenance = self.provenance().await;
        let synthesizer = Synthesizer::new(self.config, self.flags).with_provenance(provenance);

        let mut summary = RunSummary::default();
        for name in self.config.image_names() {
            if !self.flags.selects(name) {
                tracing::debug!(image = name, "skipping; not selected");
                continue;
            }

            let plan = plan_image(&synthesizer, name, &self.workdir)?;
            summary.images.push(ImageSummary {
                image: name.to_owned(),
                queued: plan.len(),
                excluded: plan.excluded,
            });
            if plan.is_empty() {
                tracing::warn!(image = name, "no combinations left to build");
                continue;
            }
            tracing::info!(
                image = name,
                combinations = plan.len(),
                excluded = plan.excluded,
                "processing"
            );

            let mut engine = Engine::new(self.flags.engine, &self.executor);
            engine.init();
            engine.configure(self.flags);

            let result = self.build(&mut engine, plan).await;
            engine.terminate().await;
            if let Err(e) = &result {
                tracing::error!(image = name, error = %e, "image failed; stopping");
            }
            result?;
        }

        tracing::info!(
            images = summary.images.len(),
            queued = summary.queued(),
            excluded = summary.excluded(),
            "done"
        );
        Ok(summary)
    }

    async fn build(
        &self,
        engine: &mut Engine<'_, E>,
        plan: ImagePlan,
    ) -> Result<(), OrchestratorError> {
        let image = plan.image;
        for (set, descriptor) in plan.entries {
            descriptor
                .render_dockerfile(&set)
                .map_err(|source| OrchestratorError::Dockerfile {
                    image: image.clone(),
                    source,
                })?;
            tracing::info!(image = descriptor.name(), variables = ?set.variables, "queueing");
            engine
                .queue(descriptor)
                .map_err(|source| OrchestratorError::Engine {
                    image: image.clone(),
                    source,
                })?;
        }

        engine.run().await.map_err(|source| OrchestratorError::Engine {
            image: image.clone(),
            source,
        })
    }
}
