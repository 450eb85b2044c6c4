use std::io::{self, Write};

use crate::readback::{Image, PixelLayout};

use super::{check_layout, ImageWriter};

/// Netpbm PAM, `RGB_ALPHA` tuples.
#[derive(Debug, Copy, Clone, Default)]
pub struct PamWriter;

impl ImageWriter for PamWriter {
    fn extension(&self) -> &'static str {
        "pam"
    }

    fn layout(&self) -> PixelLayout {
        PixelLayout::Rgba
    }

    fn write(&self, image: &Image, out: &mut dyn Write) -> io::Result<()> {
        check_layout(self, image)?;
        write!(
            out,
            "P7\nWIDTH {}\nHEIGHT {}\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n",
            image.width(),
            image.height()
        )?;
        out.write_all(image.pixels())
    }
}
