//! Config set synthesis: merges global, per-image and per-combination
//! settings into one fully resolved, validated record.
//!
//! # Merge order
//!
//! ```text
//!   1. global registry / prefix / maintainer / platforms / labels / args
//!   2. image platforms (replace when non-empty), image labels / args
//!   3. reserved-key check on the combination
//!   4. combination variables
//!   5. run tag under `tag`
//!   6. platform allow-list
//!   7. engine / platform compatibility
//!   8. tags rendered; none left is fatal
//!   9. labels: global → provenance → image (last wins)
//!  10. build args rendered
//! ```
//!
//! Templates also see `env`, the process environment captured when the
//! [`Synthesizer`] is created.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use imagemill_core::{BuildFlags, BuildOptions, Config, EngineKind};
use serde_yaml::Value;

use crate::matrix::Combination;
use crate::provenance::Provenance;
use crate::template::{self, Context, TemplateError};

/// Names that are synthesized by imagemill and cannot be used as variables.
pub const RESERVED_KEYS: &[&str] = &[
    "image",
    "registry",
    "prefix",
    "maintainer",
    "tag",
    "tags",
    "labels",
    "args",
    "platforms",
    "env",
];

/// Platforms accepted in `platforms`, following what binfmt emulates.
pub const ALLOWED_PLATFORMS: &[&str] = &[
    "linux/amd64",
    "linux/arm64",
    "linux/riscv64",
    "linux/ppc64le",
    "linux/s390x",
    "linux/386",
    "linux/arm/v7",
    "linux/arm/v6",
];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

pub fn is_allowed_platform(platform: &str) -> bool {
    ALLOWED_PLATFORMS.contains(&platform)
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("image '{image}' is not defined in the build file")]
    UnknownImage { image: String },

    #[error("variable key '{key}' of image '{image}' is reserved and cannot be used as a variable")]
    ReservedKey { image: String, key: String },

    #[error("platform '{platform}' of image '{image}' is not allowed; expected one of: {}", ALLOWED_PLATFORMS.join(", "))]
    PlatformNotAllowed { image: String, platform: String },

    #[error("engine '{engine}' does not support multi-platform builds of '{image}'; use 'buildx' instead")]
    MultiPlatformUnsupported { image: String, engine: EngineKind },

    #[error("no 'tags' defined for {image} - add a 'tags' block to continue")]
    NoTags { image: String },

    #[error("combinations {first} and {second} of image '{image}' both resolve to the name '{name}'")]
    DuplicateName {
        image: String,
        name: String,
        first: String,
        second: String,
    },

    #[error("failed to render templates of image '{image}'")]
    Template {
        image: String,
        source: TemplateError,
    },
}

/// Process environment exposed to templates as `env`.
///
/// Shared between every config set of a run. `Debug` prints only the size so
/// secrets never end up in logs.
#[derive(Clone, Default, PartialEq)]
pub struct Environment(Arc<BTreeMap<String, String>>);

impl Environment {
    /// Snapshot of the current process environment. Non-UTF-8 entries are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self(Arc::new(vars))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn value(&self) -> Value {
        string_map(&self.0)
    }
}

impl From<BTreeMap<String, String>> for Environment {
    fn from(vars: BTreeMap<String, String>) -> Self {
        Self(Arc::new(vars))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment({} vars)", self.0.len())
    }
}

/// A combination after merging with global/image settings and validation.
///
/// Produced only by [`Synthesizer::synthesize`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSet {
    pub image: String,
    pub registry: String,
    pub prefix: String,
    pub maintainer: String,
    /// The run's version string
    pub tag: String,
    /// Dockerfile (or template) path as declared, relative to the build file
    pub dockerfile: String,
    pub variables: Combination,
    pub platforms: Vec<String>,
    /// Rendered tags, without registry/prefix
    pub tags: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub args: BTreeMap<String, String>,
    pub options: BuildOptions,
    pub flags: BuildFlags,
    pub env: Environment,
}

impl ConfigSet {
    /// Value of a variable or synthesized field.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(key) {
            return Some(value.clone());
        }
        let value = match key {
            "image" => Value::from(self.image.as_str()),
            "registry" => Value::from(self.registry.as_str()),
            "prefix" => Value::from(self.prefix.as_str()),
            "maintainer" => Value::from(self.maintainer.as_str()),
            "tag" => Value::from(self.tag.as_str()),
            "platforms" => string_seq(&self.platforms),
            "tags" => string_seq(&self.tags),
            "labels" => string_map(&self.labels),
            "args" => string_map(&self.args),
            "env" => self.env.value(),
            _ => return None,
        };
        Some(value)
    }

    /// Everything a template can see.
    pub fn context(&self) -> Context {
        let mut ctx = base_context(
            &self.image,
            &self.registry,
            &self.prefix,
            &self.maintainer,
            &self.tag,
            &self.platforms,
            &self.env,
        );
        ctx.insert("tags".to_owned(), string_seq(&self.tags));
        ctx.insert("labels".to_owned(), string_map(&self.labels));
        ctx.insert("args".to_owned(), string_map(&self.args));
        ctx.extend(self.variables.clone());
        ctx
    }

    /// Squash when the image options say so, otherwise when the run asked for it.
    pub fn squash(&self) -> bool {
        self.options.squash.unwrap_or(self.flags.squash)
    }
}

/// Resolves combinations of one build file under one set of run flags.
pub struct Synthesizer<'a> {
    config: &'a Config,
    flags: &'a BuildFlags,
    provenance: Provenance,
    env: Environment,
}

impl<'a> Synthesizer<'a> {
    pub fn new(config: &'a Config, flags: &'a BuildFlags) -> Self {
        Self {
            config,
            flags,
            provenance: Provenance::default(),
            env: Environment::capture(),
        }
    }

    pub fn with_env(mut self, env: impl Into<Environment>) -> Self {
        self.env = env.into();
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn flags(&self) -> &'a BuildFlags {
        self.flags
    }

    pub fn synthesize(
        &self,
        image: &str,
        combination: Combination,
    ) -> Result<ConfigSet, SynthesisError> {
        let definition = self
            .config
            .image(image)
            .ok_or_else(|| SynthesisError::UnknownImage {
                image: image.to_owned(),
            })?;

        let platforms = if definition.platforms.is_empty() {
            self.config.platforms.clone()
        } else {
            definition.platforms.clone()
        };

        if let Some(key) = combination.keys().find(|k| is_reserved_key(k)) {
            return Err(SynthesisError::ReservedKey {
                image: image.to_owned(),
                key: key.clone(),
            });
        }

        let tag = self.flags.tag.clone();

        if let Some(platform) = platforms.iter().find(|p| !is_allowed_platform(p)) {
            return Err(SynthesisError::PlatformNotAllowed {
                image: image.to_owned(),
                platform: platform.clone(),
            });
        }

        if !platforms.is_empty() && !self.flags.engine.supports_multi_platform() && self.flags.build
        {
            return Err(SynthesisError::MultiPlatformUnsupported {
                image: image.to_owned(),
                engine: self.flags.engine,
            });
        }

        let template_error = |source| SynthesisError::Template {
            image: image.to_owned(),
            source,
        };

        // Templates see the raw, not yet rendered, tags/labels/args
        let mut raw_labels = self.config.labels.clone();
        raw_labels.extend(definition.labels.clone());
        let mut raw_args = self.config.args.clone();
        raw_args.extend(definition.args.clone());

        let mut ctx = base_context(
            image,
            &self.config.registry,
            &self.config.prefix,
            &self.config.maintainer,
            &tag,
            &platforms,
            &self.env,
        );
        ctx.insert("tags".to_owned(), string_seq(&definition.tags));
        ctx.insert("labels".to_owned(), string_map(&raw_labels));
        ctx.insert("args".to_owned(), string_map(&raw_args));
        ctx.extend(combination.clone());

        let tags = template::render_list(&definition.tags, &ctx).map_err(template_error)?;
        if tags.is_empty() {
            return Err(SynthesisError::NoTags {
                image: image.to_owned(),
            });
        }
        tracing::debug!(image, tags = ?tags, "generating");

        let mut labels = template::render_map(&self.config.labels, &ctx).map_err(template_error)?;
        labels.extend(self.provenance.labels(&self.config.maintainer, &tag));
        labels.extend(template::render_map(&definition.labels, &ctx).map_err(template_error)?);

        let mut args = template::render_map(&self.config.args, &ctx).map_err(template_error)?;
        args.extend(template::render_map(&definition.args, &ctx).map_err(template_error)?);

        Ok(ConfigSet {
            image: image.to_owned(),
            registry: self.config.registry.clone(),
            prefix: self.config.prefix.clone(),
            maintainer: self.config.maintainer.clone(),
            tag,
            dockerfile: definition.dockerfile.clone(),
            variables: combination,
            platforms,
            tags,
            labels,
            args,
            options: definition.options.over(&self.config.options),
            flags: self.flags.clone(),
            env: self.env.clone(),
        })
    }
}

fn base_context(
    image: &str,
    registry: &str,
    prefix: &str,
    maintainer: &str,
    tag: &str,
    platforms: &[String],
    env: &Environment,
) -> Context {
    let mut ctx = Context::new();
    ctx.insert("image".to_owned(), Value::from(image));
    ctx.insert("registry".to_owned(), Value::from(registry));
    ctx.insert("prefix".to_owned(), Value::from(prefix));
    ctx.insert("maintainer".to_owned(), Value::from(maintainer));
    ctx.insert("tag".to_owned(), Value::from(tag));
    ctx.insert("platforms".to_owned(), string_seq(platforms));
    ctx.insert("env".to_owned(), env.value());
    ctx
}

fn string_seq(items: &[String]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::from(s.as_str())).collect())
}

fn string_map(entries: &BTreeMap<String, String>) -> Value {
    Value::Mapping(
        entries
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), Value::from(v.as_str())))
            .collect(),
    )
}
