use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

/// Wire format of generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }

    /// Encodes `image` into a fresh byte buffer.
    pub fn encode(self, image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        // JPEG has no alpha channel.
        let rgb;
        let image = match self {
            Self::Jpeg if image.color().has_alpha() => {
                rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                &rgb
            }
            _ => image,
        };
        image.write_to(&mut Cursor::new(&mut bytes), self.image_format())?;
        Ok(bytes)
    }
}
