use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use image::DynamicImage;
use tracing::warn;

use crate::DeviceMap;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                warn!("Running on CPU, to run on GPU(metal), build with `--features metal`");
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                warn!("Running on CPU, to run on GPU, build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Half precision on accelerators, full precision on CPU.
pub fn preferred_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::F16
    }
}

/// Converts a u8 tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels, got {channels}");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| candle_core::Error::msg("error converting tensor to image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_chw_tensor_to_rgb() -> Result<()> {
        // 3 channels, 1 row, 2 columns: red then blue.
        let data: Vec<u8> = vec![255, 0, 0, 0, 0, 255];
        let tensor = Tensor::from_vec(data, (3, 1, 2), &Device::Cpu)?;
        let image = tensor_to_image(&tensor)?.to_rgb8();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 255]);
        Ok(())
    }

    #[test]
    fn rejects_non_rgb_tensor() -> Result<()> {
        let tensor = Tensor::zeros((1, 4, 4), DType::U8, &Device::Cpu)?;
        assert!(tensor_to_image(&tensor).is_err());
        Ok(())
    }

    #[test]
    fn cpu_runs_in_full_precision() {
        assert_eq!(preferred_dtype(&Device::Cpu), DType::F32);
        assert_eq!(
            select_best_device(DeviceMap::ForceCpu).map(|d| d.is_cpu()).ok(),
            Some(true)
        );
    }
}
