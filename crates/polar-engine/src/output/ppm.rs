use std::io::{self, Write};

use crate::readback::{Image, PixelLayout};

use super::{check_layout, ImageWriter};

/// Binary Netpbm PPM (`P6`), 8-bit RGB.
#[derive(Debug, Copy, Clone, Default)]
pub struct PpmWriter;

impl ImageWriter for PpmWriter {
    fn extension(&self) -> &'static str {
        "ppm"
    }

    fn layout(&self) -> PixelLayout {
        PixelLayout::Rgb
    }

    fn write(&self, image: &Image, out: &mut dyn Write) -> io::Result<()> {
        check_layout(self, image)?;
        write!(out, "P6\n{} {} 255\n", image.width(), image.height())?;
        out.write_all(image.pixels())
    }
}
