use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Container engine backend driving the build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Classic `docker build`; single platform, supports squashing
    #[default]
    Docker,
    /// `docker buildx build`; multi-platform, no squashing
    Buildx,
}

impl EngineKind {
    pub const NAMES: &'static [&'static str] = &["docker", "buildx"];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Docker => "docker",
            EngineKind::Buildx => "buildx",
        }
    }

    pub fn supports_multi_platform(self) -> bool {
        matches!(self, EngineKind::Buildx)
    }

    pub fn supports_squash(self) -> bool {
        matches!(self, EngineKind::Docker)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(EngineKind::Docker),
            "buildx" => Ok(EngineKind::Buildx),
            _ => Err(crate::Error::UnknownEngine { name: s.to_owned() }),
        }
    }
}

/// Options of a single run, passed by reference to the orchestrator and engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFlags {
    /// Execute builds; without it every stage only logs its commands
    pub build: bool,
    /// Push tags after building
    pub push: bool,
    /// Remove rendered Dockerfiles when done
    pub delete: bool,
    /// Squash images into a single layer after building
    pub squash: bool,
    /// Version string exposed to templates as `tag`
    pub tag: String,
    /// Concurrency width of every stage runner
    pub threads: usize,
    /// Process only this image
    pub image: Option<String>,
    pub engine: EngineKind,
    /// Stream subprocess output instead of buffering it
    pub verbose: bool,
    /// Deadline for each external command
    pub timeout: Option<Duration>,
}

impl Default for BuildFlags {
    fn default() -> Self {
        Self {
            build: false,
            push: false,
            delete: false,
            squash: false,
            tag: String::new(),
            threads: 1,
            image: None,
            engine: EngineKind::default(),
            verbose: false,
            timeout: None,
        }
    }
}

impl BuildFlags {
    /// Nothing is executed unless a build was requested.
    pub fn dry_run(&self) -> bool {
        !self.build
    }

    /// Whether the given image name passes the `--image` filter.
    pub fn selects(&self, image: &str) -> bool {
        self.image.as_deref().is_none_or(|wanted| wanted == image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_parses_case_insensitively() {
        assert_eq!("docker".parse::<EngineKind>().unwrap(), EngineKind::Docker);
        assert_eq!("BuildX".parse::<EngineKind>().unwrap(), EngineKind::Buildx);
    }

    #[test]
    fn unknown_engine_lists_choices() {
        let err = "kaniko".parse::<EngineKind>().unwrap_err().to_string();
        assert!(err.contains("kaniko"), "got: {err}");
        assert!(err.contains("docker, buildx"), "got: {err}");
    }

    #[test]
    fn dry_run_is_derived_from_build() {
        let mut flags = BuildFlags::default();
        assert!(flags.dry_run());
        flags.build = true;
        assert!(!flags.dry_run());
    }

    #[test]
    fn image_filter() {
        let mut flags = BuildFlags::default();
        assert!(flags.selects("anything"));
        flags.image = Some("base".to_owned());
        assert!(flags.selects("base"));
        assert!(!flags.selects("other"));
    }
}
