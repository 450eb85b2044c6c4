use std::io::{self, Write};

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::readback::{Image, PixelLayout};

use super::{check_layout, ImageWriter};

/// PNG, RGBA8.
#[derive(Debug, Copy, Clone, Default)]
pub struct PngWriter;

impl ImageWriter for PngWriter {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn layout(&self) -> PixelLayout {
        PixelLayout::Rgba
    }

    fn write(&self, image: &Image, out: &mut dyn Write) -> io::Result<()> {
        check_layout(self, image)?;
        PngEncoder::new(out)
            .write_image(
                image.pixels(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(io::Error::other)
    }
}
