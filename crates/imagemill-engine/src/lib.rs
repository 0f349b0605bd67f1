//! Task execution and container engine backends for imagemill.
//!
//! A [`TaskRunner`] executes [`Task`]s with bounded concurrency and stops
//! starting new ones after the first failure. Each [`Builder`] backend owns
//! one runner per stage. The [`Orchestrator`] plans every image and drives
//! it through a freshly initialized engine.

pub mod builder;
pub mod bytes;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod runner;
pub mod task;

pub use builder::{Builder, BuildxBuilder, DockerBuilder, Engine, ImageState, Stage, TrackedImage};
pub use error::{EngineError, ExecError};
pub use executor::{CommandExecutor, RealExecutor};
pub use orchestrator::{ImageSummary, Orchestrator, OrchestratorError, RunSummary};
pub use runner::{RunOutcome, TaskRunner};
pub use task::{InvalidTask, Task, TaskBuilder};
