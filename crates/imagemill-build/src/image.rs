//! Per-combination image descriptor: name, Dockerfile location, build
//! context and fully qualified tags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config_set::{ConfigSet, is_reserved_key};
use crate::template::{self, TemplateError, value_text};

/// Suffix marking a Dockerfile as a template rendered per combination.
pub const TEMPLATE_SUFFIX: &str = ".tpl";

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9._-]+").expect("valid sanitize regex"));

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to read Dockerfile template {path}")]
    ReadTemplate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to render Dockerfile template {path}")]
    Template {
        path: PathBuf,
        source: TemplateError,
    },

    #[error("failed to write Dockerfile {path}")]
    WriteDockerfile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Everything an engine needs to build, tag, push and clean up one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    name: String,
    dockerfile: PathBuf,
    template: Option<PathBuf>,
    context_dir: PathBuf,
    tags: Vec<String>,
    labels: BTreeMap<String, String>,
    args: BTreeMap<String, String>,
    platforms: Vec<String>,
    squash: bool,
    extra_args: Vec<String>,
}

impl ImageDescriptor {
    /// Describe the image for `set`, resolving the Dockerfile relative to `workdir`.
    pub fn new(set: &ConfigSet, workdir: &Path) -> Self {
        let name = image_name(set);
        let declared = workdir.join(&set.dockerfile);
        let context_dir = declared
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.to_path_buf());

        let (dockerfile, template) = if set.dockerfile.ends_with(TEMPLATE_SUFFIX) {
            let rendered = context_dir.join(format!("{}.Dockerfile", sanitize_for_file_name(&name)));
            (rendered, Some(declared))
        } else {
            (declared, None)
        };

        let tags = set
            .tags
            .iter()
            .map(|tag| full_tag(&set.registry, &set.prefix, tag))
            .collect();

        Self {
            name,
            dockerfile,
            template,
            context_dir,
            tags,
            labels: set.labels.clone(),
            args: set.args.clone(),
            platforms: set.platforms.clone(),
            squash: set.squash(),
            extra_args: set.options.extra_args.clone(),
        }
    }

    /// Local, registry-less name used for the interim image.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dockerfile the engine builds from (rendered when templated).
    pub fn dockerfile(&self) -> &Path {
        &self.dockerfile
    }

    pub fn template(&self) -> Option<&Path> {
        self.template.as_deref()
    }

    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    /// Fully qualified `registry/prefix/tag` references.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn args(&self) -> &BTreeMap<String, String> {
        &self.args
    }

    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn squash(&self) -> bool {
        self.squash
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    pub fn is_generated(&self) -> bool {
        self.template.is_some()
    }

    /// Render the Dockerfile template with the set's context. No-op for
    /// plain Dockerfiles.
    pub fn render_dockerfile(&self, set: &ConfigSet) -> Result<(), ImageError> {
        let Some(template_path) = &self.template else {
            return Ok(());
        };

        let source =
            std::fs::read_to_string(template_path).map_err(|e| ImageError::ReadTemplate {
                path: template_path.clone(),
                source: e,
            })?;
        let rendered =
            template::render(&source, &set.context()).map_err(|e| ImageError::Template {
                path: template_path.clone(),
                source: e,
            })?;
        std::fs::write(&self.dockerfile, rendered).map_err(|e| ImageError::WriteDockerfile {
            path: self.dockerfile.clone(),
            source: e,
        })?;

        tracing::debug!(
            template = %template_path.display(),
            dockerfile = %self.dockerfile.display(),
            "rendered Dockerfile"
        );
        Ok(())
    }

    /// Delete the rendered Dockerfile, if this image has one.
    pub fn remove_rendered_dockerfile(&self) -> std::io::Result<()> {
        if !self.is_generated() {
            return Ok(());
        }
        match std::fs::remove_file(&self.dockerfile) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// `<image>-<key>-<value>...` over non-reserved keys, lowercased.
pub fn image_name(set: &ConfigSet) -> String {
    let mut parts = vec![sanitize_for_tag(&set.image)];
    for (key, value) in &set.variables {
        if is_reserved_key(key) {
            continue;
        }
        parts.push(sanitize_for_tag(&format!("{key}-{}", value_text(value))));
    }
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("-")
        .trim_matches('-')
        .to_lowercase()
}

/// `registry/prefix/tag`, skipping empty segments, lowercased.
pub fn full_tag(registry: &str, prefix: &str, tag: &str) -> String {
    [registry, prefix, tag]
        .iter()
        .map(|segment| segment.trim_matches('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
        .to_lowercase()
}

pub fn sanitize_for_tag(raw: &str) -> String {
    UNSAFE_CHARS
        .replace_all(raw, "-")
        .trim_matches('-')
        .to_owned()
}

pub fn sanitize_for_file_name(raw: &str) -> String {
    UNSAFE_CHARS
        .replace_all(raw, "_")
        .trim_matches('_')
        .to_owned()
}
