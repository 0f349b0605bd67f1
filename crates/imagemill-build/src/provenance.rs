//! OCI provenance labels: creation time, authorship, version and git origin.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use chrono::{SecondsFormat, Utc};

pub const LABEL_CREATED: &str = "org.opencontainers.image.created";
pub const LABEL_AUTHORS: &str = "org.opencontainers.image.authors";
pub const LABEL_VERSION: &str = "org.opencontainers.image.version";
pub const LABEL_SOURCE: &str = "org.opencontainers.image.source";
pub const LABEL_REVISION: &str = "org.opencontainers.image.revision";
pub const LABEL_BRANCH: &str = "org.opencontainers.image.branch";
pub const LABEL_MAINTAINER: &str = "maintainer";

/// Source control state of the directory holding the build file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitMetadata {
    /// URL of the `origin` remote
    pub origin: Option<String>,
    /// Commit hash of HEAD
    pub revision: String,
    /// Current branch; `None` when HEAD is detached
    pub branch: Option<String>,
}

impl GitMetadata {
    /// Read git metadata for `dir`. Returns `None` outside a repository or
    /// when git is unavailable.
    pub fn discover(dir: &Path) -> Option<Self> {
        let revision = match git(dir, &["rev-parse", "HEAD"]) {
            Ok(Some(rev)) => rev,
            Ok(None) => {
                tracing::debug!(dir = %dir.display(), "not a git repository; skipping source labels");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to run git; skipping source labels");
                return None;
            }
        };

        let origin = git(dir, &["remote", "get-url", "origin"]).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read git origin");
            None
        });
        let branch = git(dir, &["symbolic-ref", "--short", "-q", "HEAD"]).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read git branch");
            None
        });

        Some(Self {
            origin,
            revision,
            branch,
        })
    }
}

/// Run a git query; `Ok(None)` when git exits non-zero or prints nothing.
fn git(dir: &Path, args: &[&str]) -> std::io::Result<Option<String>> {
    let output = Command::new("git").args(args).current_dir(dir).output()?;
    if !output.status.success() {
        return Ok(None);
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    Ok((!stdout.is_empty()).then_some(stdout))
}

/// Run-wide provenance, collected once and stamped onto every image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    created: String,
    git: Option<GitMetadata>,
}

impl Default for Provenance {
    fn default() -> Self {
        Self::new(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl Provenance {
    /// Provenance with a fixed creation timestamp and no git metadata.
    pub fn new(created: impl Into<String>) -> Self {
        Self {
            created: created.into(),
            git: None,
        }
    }

    /// Stamp the current time and discover git metadata for `dir`.
    ///
    /// Runs `git` synchronously; async callers should use `spawn_blocking`.
    pub fn collect(dir: &Path) -> Self {
        Self {
            git: GitMetadata::discover(dir),
            ..Self::default()
        }
    }

    pub fn with_git(mut self, git: GitMetadata) -> Self {
        self.git = Some(git);
        self
    }

    pub fn created(&self) -> &str {
        &self.created
    }

    pub fn git(&self) -> Option<&GitMetadata> {
        self.git.as_ref()
    }

    /// Labels derived from the run and the image's maintainer/version.
    pub fn labels(&self, maintainer: &str, version: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_CREATED.to_owned(), self.created.clone());

        if !maintainer.is_empty() {
            labels.insert(LABEL_MAINTAINER.to_owned(), maintainer.to_owned());
            labels.insert(LABEL_AUTHORS.to_owned(), maintainer.to_owned());
        }
        if !version.is_empty() {
            labels.insert(LABEL_VERSION.to_owned(), version.to_owned());
        }

        if let Some(git) = &self.git {
            if let Some(origin) = &git.origin {
                labels.insert(LABEL_SOURCE.to_owned(), origin.clone());
            }
            labels.insert(LABEL_REVISION.to_owned(), git.revision.clone());
            if let Some(branch) = &git.branch {
                labels.insert(LABEL_BRANCH.to_owned(), branch.clone());
            }
        }

        tracing::debug!(labels = ?labels, "provenance labels");
        labels
    }
}
