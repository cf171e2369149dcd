use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use hf_hub::api::tokio::Api;

use crate::{DeviceMap, ModelLike, ModelVariant};

/// Builds a pipeline for one [`ModelVariant`].
pub trait Loader {
    type Model: ModelLike + 'static;

    /// Fetches missing weights through `api`, then constructs the model on the
    /// device `device_map` selects.
    fn load(
        variant: ModelVariant,
        api: Api,
        device_map: DeviceMap,
    ) -> impl Future<Output = Result<Self::Model>> + Send
    where
        Self: Sized;

    /// [`Loader::load`] behind the shared handle the model service keeps.
    fn load_shared(
        variant: ModelVariant,
        api: Api,
        device_map: DeviceMap,
    ) -> impl Future<Output = Result<Arc<dyn ModelLike>>> + Send
    where
        Self: Sized,
    {
        async move {
            let model = Self::load(variant, api, device_map).await?;
            Ok(Arc::new(model) as Arc<dyn ModelLike>)
        }
    }
}
