use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self,
    clip::ClipTextTransformer,
    ddim::DDIMSchedulerConfig,
    schedulers::{Scheduler, SchedulerConfig, TimestepSpacing},
    unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

mod weights;

use weights::WeightFiles;

use crate::{
    preferred_dtype, select_best_device, tensor_to_image, DeviceMap, GenerationRequest, Loader,
    ModelLike, ModelVariant,
};

/// Latent scaling factor of the SDXL autoencoder.
const VAE_SCALE: f64 = 0.13025;
const LATENT_CHANNELS: usize = 4;

struct TextEncoder {
    tokenizer: Tokenizer,
    model: ClipTextTransformer,
    pad_id: u32,
    max_len: usize,
}

impl TextEncoder {
    fn load(
        tokenizer_file: PathBuf,
        weights_file: PathBuf,
        config: &stable_diffusion::clip::Config,
        device: &Device,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = config.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .with_context(|| format!("tokenizer has no padding token {pad_token}"))?;
        // CLIP always runs in full precision.
        let model =
            stable_diffusion::build_clip_transformer(config, weights_file, device, DType::F32)
                .context("failed to load CLIP model")?;
        Ok(Self {
            tokenizer,
            model,
            pad_id,
            max_len: config.max_position_embeddings,
        })
    }

    fn encode(&self, prompt: &str, device: &Device) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > self.max_len {
            warn!(
                tokens = tokens.len(),
                max = self.max_len,
                "Prompt is too long, truncating"
            );
            tokens.truncate(self.max_len);
        }
        tokens.resize(self.max_len, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?;
        Ok(self.model.forward(&tokens)?)
    }
}

pub struct SdxlModel {
    variant: ModelVariant,
    device: Device,
    dtype: DType,
    sd_config: StableDiffusionConfig,
    encoders: [TextEncoder; 2],
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    // Seeding and sampling share the device RNG.
    rng_lock: Mutex<()>,
}

impl SdxlModel {
    fn build(
        variant: ModelVariant,
        files: WeightFiles,
        device: Device,
        dtype: DType,
    ) -> Result<Self> {
        let (width, height) = variant.default_size();
        // Model shapes only; the scheduler comes from `scheduler`.
        let sd_config =
            StableDiffusionConfig::sdxl_turbo(None, Some(height), Some(width));
        let clip2_config = sd_config
            .clip2
            .as_ref()
            .context("SDXL config is missing its second text encoder")?;

        let first = TextEncoder::load(files.tokenizer, files.clip, &sd_config.clip, &device)?;
        let second = TextEncoder::load(files.tokenizer2, files.clip2, clip2_config, &device)?;

        let vae = sd_config
            .build_vae(files.vae, &device, dtype)
            .context("failed to load autoencoder")?;
        let use_flash_attn = cfg!(feature = "flash-attn");
        let unet = sd_config
            .build_unet(files.unet, &device, LATENT_CHANNELS, use_flash_attn, dtype)
            .context("failed to load UNet")?;

        Ok(Self {
            variant,
            device,
            dtype,
            sd_config,
            encoders: [first, second],
            unet,
            vae,
            rng_lock: Mutex::new(()),
        })
    }

    fn text_embeddings(&self, prompt: &str, use_guide_scale: bool) -> Result<Tensor> {
        let per_encoder = self
            .encoders
            .iter()
            .map(|encoder| -> Result<Tensor> {
                let cond = encoder.encode(prompt, &self.device)?;
                if use_guide_scale {
                    let uncond = encoder.encode("", &self.device)?;
                    Ok(Tensor::cat(&[uncond, cond], 0)?)
                } else {
                    Ok(cond)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&per_encoder, D::Minus1)?.to_dtype(self.dtype)?)
    }

    fn sample(
        &self,
        text_embeddings: &Tensor,
        steps: usize,
        guidance: f64,
        width: usize,
        height: usize,
    ) -> Result<Tensor> {
        let use_guide_scale = guidance > 1.0;
        let mut scheduler = build_scheduler(self.variant, &self.sd_config, steps)?;

        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, LATENT_CHANNELS, height / 8, width / 8),
            &self.device,
        )?;
        // Scale the initial noise by the standard deviation the scheduler expects.
        let latents = (latents * scheduler.init_noise_sigma())?;
        let mut latents = latents.to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            let start = Instant::now();
            let latent_model_input = if use_guide_scale {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, text_embeddings)?;
            let noise_pred = if use_guide_scale {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * guidance)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(
                step = index + 1,
                of = timesteps.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Denoising step done"
            );
        }
        Ok(latents)
    }
}

impl ModelLike for SdxlModel {
    fn run(&self, request: GenerationRequest) -> Result<DynamicImage> {
        let request = request.resolve(self.variant);
        let (default_width, default_height) = self.variant.default_size();
        let width = request.width.unwrap_or(default_width);
        let height = request.height.unwrap_or(default_height);
        let steps = request.steps.unwrap_or(self.variant.default_steps());
        let guidance = request.guidance.unwrap_or(0.0);
        if width % 8 != 0 || height % 8 != 0 {
            anyhow::bail!("image size must be a multiple of 8, got {width}x{height}");
        }

        let text_embeddings = self.text_embeddings(&request.prompt, guidance > 1.0)?;

        let latents = with_device_rng(&self.rng_lock, &self.device, request.seed, || {
            self.sample(&text_embeddings, steps, guidance, width, height)
        })?;

        // --- Decode the latent image using the preloaded autoencoder ---
        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let decoded = ((decoded / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let img = (decoded.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?;
        debug!("Decoded image");

        tensor_to_image(&img.i(0)?)
    }
}

/// Turbo keeps the ancestral Euler sampler of its config. Lightning needs a
/// sampler that adds no noise between steps, on trailing timesteps.
fn build_scheduler(
    variant: ModelVariant,
    sd_config: &StableDiffusionConfig,
    steps: usize,
) -> Result<Box<dyn Scheduler>> {
    let scheduler = match variant {
        ModelVariant::Turbo => sd_config.build_scheduler(steps)?,
        ModelVariant::Lightning => DDIMSchedulerConfig {
            eta: 0.,
            timestep_spacing: TimestepSpacing::Trailing,
            ..Default::default()
        }
        .build(steps)?,
    };
    Ok(scheduler)
}

/// Runs `sample` while holding `lock`, seeding the device first when asked.
///
/// Every draw from the device RNG goes through here, seeded or not, so a
/// seeded run sees an unbroken stream.
fn with_device_rng<T>(
    lock: &Mutex<()>,
    device: &Device,
    seed: Option<u64>,
    sample: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let _guard = lock
        .lock()
        .map_err(|_| anyhow::anyhow!("sampling lock poisoned"))?;
    if let Some(seed) = seed {
        if device.is_cpu() {
            warn!(seed, "The CPU backend cannot be seeded, sampling unseeded");
        } else {
            device.set_seed(seed)?;
        }
    }
    sample()
}

pub struct SdxlLoader;

impl Loader for SdxlLoader {
    type Model = SdxlModel;

    async fn load(variant: ModelVariant, api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        // Configure device.
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = preferred_dtype(&device);

        let start = Instant::now();
        let files = WeightFiles::fetch(&api, variant, dtype == DType::F16).await?;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Weights available locally"
        );

        let start = Instant::now();
        let model = tokio::task::spawn_blocking(move || {
            SdxlModel::build(variant, files, device, dtype)
        })
        .await
        .context("model construction task failed")??;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            ?dtype,
            "Pipeline loaded"
        );
        Ok(model)
    }
}
