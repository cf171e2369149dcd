use std::time::Duration;

use anyhow::Result;
use clap::Args;
use hf_hub::api::tokio::Api;
use pixelana_core::{hub_loader, DeviceMap, ModelService, ModelVariant, ServiceConfig};
use tracing::info;

/// Settings shared by every subcommand that loads the pipeline.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model variant to use (`turbo` or `lightning`)
    #[arg(long, env = "PIXELANA_VARIANT", default_value = "turbo")]
    pub variant: ModelVariant,

    /// Use CPU instead of GPU
    #[arg(long, env = "PIXELANA_CPU")]
    pub cpu: bool,

    /// GPU ordinal to run on
    #[arg(long, env = "PIXELANA_GPU", default_value_t = 0)]
    pub gpu: usize,

    /// Seconds without requests before the pipeline is dropped
    #[arg(long, env = "PIXELANA_IDLE_TIMEOUT", default_value_t = 240)]
    pub idle_timeout_secs: u64,

    /// Generations allowed to run at once on this instance
    #[arg(long, env = "PIXELANA_MAX_CONCURRENT", default_value_t = 10)]
    pub max_concurrent_requests: usize,

    /// Instances the platform may scale to (informational)
    #[arg(long, env = "PIXELANA_MAX_INSTANCES", default_value_t = 10)]
    pub max_instances: usize,

    /// Skip the throwaway generation that primes a freshly loaded pipeline
    #[arg(long)]
    pub skip_warmup: bool,
}

impl ModelArgs {
    pub fn device_map(&self) -> DeviceMap {
        DeviceMap::from_flags(self.cpu, self.gpu)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            variant: self.variant,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_concurrent_requests: self.max_concurrent_requests,
            warmup: !self.skip_warmup,
        }
    }

    /// Model service backed by the Hugging Face hub. Nothing is loaded yet.
    pub fn build_service(&self) -> Result<ModelService> {
        info!(
            variant = %self.variant,
            device = ?self.device_map(),
            idle_timeout_secs = self.idle_timeout_secs,
            max_concurrent_requests = self.max_concurrent_requests,
            max_instances = self.max_instances,
            "Configuring model service"
        );
        let loader = hub_loader(self.variant, Api::new()?, self.device_map());
        Ok(ModelService::new(self.service_config(), loader))
    }
}
