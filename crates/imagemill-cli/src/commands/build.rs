use std::path::Path;

use anyhow::Context;
use imagemill_core::{BuildFlags, Config};
use imagemill_engine::Orchestrator;

pub async fn build(config_path: &Path, flags: BuildFlags) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    // Dockerfile paths in the build file are relative to its directory
    let workdir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::current_dir().context("failed to resolve working directory")?,
    };

    if flags.dry_run() {
        tracing::info!("dry run; pass --build to execute commands");
    }

    let summary = Orchestrator::new(&config, &flags, workdir).run().await?;

    println!();
    for image in &summary.images {
        println!(
            "  {:<24} {} queued, {} excluded",
            image.image, image.queued, image.excluded
        );
    }
    println!(
        "{} image(s) queued, {} excluded",
        summary.queued(),
        summary.excluded()
    );

    Ok(())
}
