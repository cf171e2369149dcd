use std::path::PathBuf;

use anyhow::{Context, Result};
use hf_hub::api::tokio::Api;
use tracing::debug;

use crate::ModelVariant;

const TURBO_REPO: &str = "stabilityai/sdxl-turbo";
const SDXL_BASE_REPO: &str = "stabilityai/stable-diffusion-xl-base-1.0";
const LIGHTNING_REPO: &str = "ByteDance/SDXL-Lightning";
const LIGHTNING_UNET: &str = "sdxl_lightning_4step_unet.safetensors";
const FP16_VAE_REPO: &str = "madebyollin/sdxl-vae-fp16-fix";
const TOKENIZER_REPO: &str = "openai/clip-vit-large-patch14";
const TOKENIZER2_REPO: &str = "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WeightFile {
    Tokenizer,
    Tokenizer2,
    Clip,
    Clip2,
    Unet,
    Vae,
}

impl WeightFile {
    /// Hub repository and file path for this weight under `variant`.
    pub(super) fn location(self, variant: ModelVariant, use_f16: bool) -> (&'static str, &'static str) {
        let base = match variant {
            ModelVariant::Turbo => TURBO_REPO,
            ModelVariant::Lightning => SDXL_BASE_REPO,
        };
        match self {
            Self::Tokenizer => (TOKENIZER_REPO, "tokenizer.json"),
            Self::Tokenizer2 => (TOKENIZER2_REPO, "tokenizer.json"),
            Self::Clip => (base, "text_encoder/model.safetensors"),
            Self::Clip2 => (base, "text_encoder_2/model.safetensors"),
            Self::Unet => match variant {
                ModelVariant::Lightning => (LIGHTNING_REPO, LIGHTNING_UNET),
                ModelVariant::Turbo if use_f16 => {
                    (base, "unet/diffusion_pytorch_model.fp16.safetensors")
                }
                ModelVariant::Turbo => (base, "unet/diffusion_pytorch_model.safetensors"),
            },
            // The stock SDXL VAE overflows in half precision.
            Self::Vae if use_f16 => (FP16_VAE_REPO, "diffusion_pytorch_model.safetensors"),
            Self::Vae => (base, "vae/diffusion_pytorch_model.safetensors"),
        }
    }

    async fn fetch(self, api: &Api, variant: ModelVariant, use_f16: bool) -> Result<PathBuf> {
        let (repo, path) = self.location(variant, use_f16);
        debug!(repo, path, "Fetching weight file");
        api.model(repo.to_string())
            .get(path)
            .await
            .with_context(|| format!("failed to get {path} from {repo}"))
    }
}

/// Local paths of every file the SDXL pipeline needs.
pub(super) struct WeightFiles {
    pub tokenizer: PathBuf,
    pub tokenizer2: PathBuf,
    pub clip: PathBuf,
    pub clip2: PathBuf,
    pub unet: PathBuf,
    pub vae: PathBuf,
}

impl WeightFiles {
    /// Downloads (or reuses from the hub cache) all files for `variant`.
    pub(super) async fn fetch(api: &Api, variant: ModelVariant, use_f16: bool) -> Result<Self> {
        Ok(Self {
            tokenizer: WeightFile::Tokenizer.fetch(api, variant, use_f16).await?,
            tokenizer2: WeightFile::Tokenizer2.fetch(api, variant, use_f16).await?,
            clip: WeightFile::Clip.fetch(api, variant, use_f16).await?,
            clip2: WeightFile::Clip2.fetch(api, variant, use_f16).await?,
            unet: WeightFile::Unet.fetch(api, variant, use_f16).await?,
            vae: WeightFile::Vae.fetch(api, variant, use_f16).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lightning_swaps_only_the_unet() {
        let (repo, file) = WeightFile::Unet.location(ModelVariant::Lightning, true);
        assert_eq!((repo, file), (LIGHTNING_REPO, LIGHTNING_UNET));
        let (repo, _) = WeightFile::Clip.location(ModelVariant::Lightning, true);
        assert_eq!(repo, SDXL_BASE_REPO);
        let (repo, _) = WeightFile::Clip2.location(ModelVariant::Turbo, false);
        assert_eq!(repo, TURBO_REPO);
    }

    #[test]
    fn half_precision_uses_fp16_safe_vae() {
        assert_eq!(
            WeightFile::Vae.location(ModelVariant::Turbo, true).0,
            FP16_VAE_REPO
        );
        assert_eq!(
            WeightFile::Vae.location(ModelVariant::Turbo, false),
            (TURBO_REPO, "vae/diffusion_pytorch_model.safetensors")
        );
        assert_eq!(
            WeightFile::Unet.location(ModelVariant::Turbo, true).1,
            "unet/diffusion_pytorch_model.fp16.safetensors"
        );
    }
}
