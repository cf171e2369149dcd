use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use pixelana_core::{GenerationRequest, ModelService, OutputFormat};
use tracing::info;

use crate::config::ModelArgs;

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Prompt to render
    #[arg(long, default_value = "Solana")]
    pub prompt: String,

    /// Denoising steps (at most 10)
    #[arg(long, default_value_t = 4)]
    pub n_steps: usize,

    /// Seed for sampling; defaults to the variant's policy
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory the image is written to; created if missing
    #[arg(long, default_value = "generated-images")]
    pub output_dir: PathBuf,
}

impl GenerateArgs {
    pub fn request(&self) -> GenerationRequest {
        let request = GenerationRequest::new(self.prompt.clone()).with_steps(self.n_steps);
        match self.seed {
            Some(seed) => request.with_seed(seed),
            None => request,
        }
    }
}

/// Writes `bytes` to `output.<ext>` under `dir`, creating `dir` if needed.
pub async fn write_output(dir: &Path, format: OutputFormat, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("output.{}", format.extension()));
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Runs one inference and saves the result.
pub async fn run(args: &GenerateArgs, service: &ModelService) -> Result<PathBuf> {
    let bytes = service.inference(args.request()).await?;
    let path = write_output(&args.output_dir, service.output_format(), &bytes).await?;
    info!("Saving it to {}", path.display());
    Ok(path)
}
