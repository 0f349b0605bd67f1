//! Matrix expansion, config set synthesis, and Dockerfile rendering for imagemill.
//!
//! # Planning pipeline
//!
//! ```text
//! per image, in declaration order
//!   1. Expand     ── matrix::expand(variables) → combinations
//!   2. Synthesize ── Synthesizer::synthesize() → ConfigSet (validated)
//!   3. Exclude    ── exclude::is_excluded(set, excludes) → skip
//!   4. Describe   ── ImageDescriptor::new() → name, tags, Dockerfile path
//! ```
//!
//! Nothing here talks to a container engine; the resulting descriptors are
//! queued by the engines in `imagemill-engine`.

pub mod config_set;
pub mod exclude;
pub mod image;
pub mod matrix;
pub mod plan;
pub mod provenance;
pub mod template;

pub use config_set::{ConfigSet, Environment, SynthesisError, Synthesizer};
pub use image::{ImageDescriptor, ImageError};
pub use matrix::Combination;
pub use plan::{ImagePlan, plan_image};
pub use provenance::Provenance;
pub use template::TemplateError;
