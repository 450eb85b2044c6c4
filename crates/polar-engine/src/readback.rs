//! Float texel readback and conversion to 8-bit pixels.

use bytemuck::{Pod, Zeroable};

use crate::error::{JobError, Result};
use crate::resource::GpuBuffer;

/// One RGBA texel as the kernel writes it.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Texel {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Texel {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    #[inline]
    fn channels(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Converts a normalized float channel to a byte: `trunc(clamp(v * 255, 0, 255))`.
/// NaN maps to 0.
#[inline]
pub fn convert_channel(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value * 255.0).clamp(0.0, 255.0) as u8
}

/// Channels kept per pixel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    #[inline]
    pub const fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// 8-bit raster, row-major, channels interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    layout: PixelLayout,
    pixels: Vec<u8>,
}

impl Image {
    /// Converts the first `width * height` texels of `bytes`.
    ///
    /// Reads are unaligned-safe; `bytes` may be longer than needed.
    pub fn from_texel_bytes(
        bytes: &[u8],
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<Self> {
        let count = width as usize * height as usize;
        let needed = count * Texel::SIZE;
        if bytes.len() < needed {
            return Err(JobError::resource(format!(
                "readback holds {} bytes, {width}x{height} texels need {needed}",
                bytes.len()
            )));
        }

        let channels = layout.channels();
        let mut pixels = Vec::with_capacity(count * channels);
        for chunk in bytes[..needed].chunks_exact(Texel::SIZE) {
            let texel: Texel = bytemuck::pod_read_unaligned(chunk);
            pixels.extend(texel.channels()[..channels].iter().map(|&c| convert_channel(c)));
        }

        Ok(Self {
            width,
            height,
            layout,
            pixels,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Channels of the pixel at column `x`, row `y`.
    ///
    /// Panics if the coordinates are outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        let channels = self.layout.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        &self.pixels[start..start + channels]
    }
}

/// Maps `buffer` and converts its texels into an image.
///
/// Conversion finishes inside the mapping; the returned image owns its bytes.
pub fn read_image(buffer: &GpuBuffer<'_>, width: u32, height: u32, layout: PixelLayout) -> Result<Image> {
    buffer.map_read(|bytes| Image::from_texel_bytes(bytes, width, height, layout))?
}
