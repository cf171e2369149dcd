pub mod device_map;
mod encoding;
mod error;
pub mod frontend;
pub mod loader;
mod loader_factory;
mod request;
mod service;
mod util;

mod sdxl;

pub use device_map::*;
pub use encoding::OutputFormat;
pub use error::ServiceError;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
pub use request::{clamp_steps, GenerationRequest, MAX_STEPS};
pub use sdxl::{SdxlLoader, SdxlModel};
pub use service::*;
pub(crate) use util::*;

/// A loaded text-to-image pipeline.
///
/// Implementations are shared across concurrent requests, so `run` only gets
/// `&self`.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: GenerationRequest) -> anyhow::Result<DynamicImage>;
}
