use std::{fmt, str::FromStr, sync::Arc};

use anyhow::{anyhow, Result};
use hf_hub::api::tokio::Api;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{DeviceMap, LoadFuture, Loader, ModelLike, OutputFormat, PipelineLoader, SdxlLoader};

/// The two SDXL deployments this service can reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
    /// `stabilityai/sdxl-turbo`, seeded, PNG output.
    #[default]
    Turbo,
    /// SDXL base with the ByteDance 4-step Lightning UNet, unseeded, JPEG output.
    Lightning,
}

impl ModelVariant {
    /// Detect model variant from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("LIGHTNING") {
            Some(Self::Lightning)
        } else if name_upper.contains("TURBO") {
            Some(Self::Turbo)
        } else {
            None
        }
    }

    /// Human readable name shown on the front-end page.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Turbo => "Stable Diffusion XL Turbo",
            Self::Lightning => "PixeLana-SD",
        }
    }

    pub fn default_prompt(self) -> &'static str {
        "Solana Logo"
    }

    /// Prompt pre-filled in the front-end page.
    pub fn page_prompt(self) -> &'static str {
        match self {
            Self::Turbo => {
                "A cinematic shot of a baby raccoon wearing an intricate italian priest robe."
            }
            Self::Lightning => {
                "A Chinese and Filipino fusion dish with a Solana NFT in the background"
            }
        }
    }

    pub fn default_steps(self) -> usize {
        4
    }

    pub fn default_guidance(self) -> f64 {
        0.0
    }

    /// Turbo samples from a fixed seed, Lightning does not.
    pub fn default_seed(self) -> Option<u64> {
        match self {
            Self::Turbo => Some(0),
            Self::Lightning => None,
        }
    }

    /// Default (width, height) in pixels.
    pub fn default_size(self) -> (usize, usize) {
        match self {
            Self::Turbo => (512, 512),
            Self::Lightning => (1024, 1024),
        }
    }

    pub fn output_format(self) -> OutputFormat {
        match self {
            Self::Turbo => OutputFormat::Png,
            Self::Lightning => OutputFormat::Jpeg,
        }
    }
}

impl FromStr for ModelVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_plain::from_str(s)
            .ok()
            .or_else(|| Self::from_name(s))
            .ok_or_else(|| anyhow!("Unsupported model variant: {}", s))
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_plain::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&name)
    }
}

/// Load the pipeline for `variant`, downloading weights on first use.
pub async fn load_model(
    variant: ModelVariant,
    api: Api,
    device_map: DeviceMap,
) -> Result<Arc<dyn ModelLike>> {
    info!(%variant, ?device_map, "Loading model");
    SdxlLoader::load_shared(variant, api, device_map).await
}

/// A [`PipelineLoader`] that (re)loads `variant` from the Hugging Face hub.
pub fn hub_loader(variant: ModelVariant, api: Api, device_map: DeviceMap) -> PipelineLoader {
    Arc::new(move || -> LoadFuture { Box::pin(load_model(variant, api.clone(), device_map)) })
}
