use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageOutputFormat};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Pixel layout textures are re-encoded with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorEncoding {
    #[default]
    Rgb,
    Rgba,
    Luma,
}

/// Turns decoded pixels into the bytes stored in the output buffer.
pub trait RasterEncoder: Send + Sync {
    fn mime_type(&self) -> &'static str;

    fn encode(&self, image: &DynamicImage, encoding: ColorEncoding) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PngRasterEncoder;

impl RasterEncoder for PngRasterEncoder {
    fn mime_type(&self) -> &'static str {
        "image/png"
    }

    fn encode(&self, image: &DynamicImage, encoding: ColorEncoding) -> Result<Vec<u8>> {
        let converted = match encoding {
            ColorEncoding::Rgb => DynamicImage::ImageRgb8(image.to_rgb8()),
            ColorEncoding::Rgba => DynamicImage::ImageRgba8(image.to_rgba8()),
            ColorEncoding::Luma => DynamicImage::ImageLuma8(image.to_luma8()),
        };
        let mut png = Cursor::new(Vec::new());
        converted.write_to(&mut png, ImageOutputFormat::Png)?;
        Ok(png.into_inner())
    }
}

/// Opens any raster format the `image` crate understands (TGA, DDS, BMP, ...).
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    Ok(image::open(path)?)
}
