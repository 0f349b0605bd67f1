//! Core types and configuration for imagemill.
//!
//! This crate defines the build file schema ([`Config`], [`ImageDefinition`]),
//! the per-run flags ([`BuildFlags`]) handed to every later stage, and
//! shared error types.

pub mod config;
pub mod error;
pub mod flags;

pub use config::{Axis, BuildOptions, Config, Exclusion, ImageDefinition};
pub use error::{Error, Result};
pub use flags::{BuildFlags, EngineKind};
