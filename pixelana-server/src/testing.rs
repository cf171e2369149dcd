//! Stand-in pipeline for handler tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use image::{DynamicImage, Rgb, RgbImage};
use pixelana_core::{
    GenerationRequest, LoadFuture, ModelLike, ModelService, ModelVariant, PipelineLoader,
    ServiceConfig,
};

/// Paints a solid color derived from the request.
#[derive(Default)]
pub struct SolidColor {
    seen: Mutex<Vec<GenerationRequest>>,
    failure: Mutex<Option<String>>,
}

impl SolidColor {
    pub fn steps_seen(&self) -> Vec<usize> {
        let seen = self.seen.lock().unwrap();
        seen.iter().filter_map(|r| r.steps).collect()
    }

    pub fn prompts_seen(&self) -> Vec<String> {
        let seen = self.seen.lock().unwrap();
        seen.iter().map(|r| r.prompt.clone()).collect()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

impl ModelLike for SolidColor {
    fn run(&self, request: GenerationRequest) -> anyhow::Result<DynamicImage> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        let steps = request.steps.unwrap_or_default() as u8;
        let seed = request.seed.unwrap_or_default() as u8;
        self.seen.lock().unwrap().push(request);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            16,
            16,
            Rgb([steps.wrapping_mul(25), seed, 90]),
        )))
    }
}

/// A cold service whose loader hands out one shared [`SolidColor`].
pub fn fake_service(variant: ModelVariant) -> (Arc<ModelService>, Arc<SolidColor>) {
    let model = Arc::new(SolidColor::default());
    let shared = Arc::clone(&model);
    let loader: PipelineLoader = Arc::new(move || -> LoadFuture {
        let model = Arc::clone(&shared);
        Box::pin(async move { Ok::<_, anyhow::Error>(model as Arc<dyn ModelLike>) })
    });
    let config = ServiceConfig {
        variant,
        idle_timeout: Duration::from_secs(60),
        max_concurrent_requests: 4,
        warmup: false,
    };
    (Arc::new(ModelService::new(config, loader)), model)
}
