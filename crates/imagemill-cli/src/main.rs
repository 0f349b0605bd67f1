mod commands;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use imagemill_core::{BuildFlags, EngineKind};

#[derive(Parser)]
#[command(
    name = "imagemill",
    about = "Build matrices of Docker images from templated Dockerfiles"
)]
#[command(version)]
struct Cli {
    /// Build file describing the images
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Execute builds (without it every command is only logged)
    #[arg(long, short = 'b')]
    build: bool,

    /// Push tags after building
    #[arg(long)]
    push: bool,

    /// Remove rendered Dockerfiles when done
    #[arg(long)]
    delete: bool,

    /// Squash each image into a single layer
    #[arg(long)]
    squash: bool,

    /// Version string exposed to templates as `tag`
    #[arg(long, short = 't', default_value = "")]
    tag: String,

    /// Number of commands run in parallel per stage (default: available CPUs)
    #[arg(long, short = 'p')]
    parallel: Option<usize>,

    /// Process only this image
    #[arg(long, short = 'i')]
    image: Option<String>,

    /// Container engine backend (docker, buildx)
    #[arg(long, default_value = "docker")]
    engine: EngineKind,

    /// Stream command output and log at debug level
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Disable colored log output
    #[arg(long)]
    no_color: bool,

    /// Deadline in seconds for each external command
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl Cli {
    fn flags(&self) -> BuildFlags {
        let threads = self.parallel.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });

        BuildFlags {
            build: self.build,
            push: self.push,
            delete: self.delete,
            squash: self.squash,
            tag: self.tag.clone(),
            threads: threads.max(1),
            image: self.image.clone(),
            engine: self.engine,
            verbose: self.verbose,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_ansi(!cli.no_color)
        .init();

    commands::build(&cli.config, cli.flags()).await
}
