//! Image output.
//!
//! The job core only produces an [`Image`]; writing it is delegated to an
//! [`ImageWriter`] selected by [`OutputFormat`].

mod pam;
mod png;
mod ppm;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};

use crate::error::{JobError, Result};
use crate::readback::{Image, PixelLayout};

pub use pam::PamWriter;
pub use png::PngWriter;
pub use ppm::PpmWriter;

/// Encodes an 8-bit raster into a byte stream.
pub trait ImageWriter {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Pixel layout the encoder expects.
    fn layout(&self) -> PixelLayout;

    fn write(&self, image: &Image, out: &mut dyn Write) -> io::Result<()>;
}

/// Rejects images whose layout differs from what `writer` encodes.
pub(crate) fn check_layout(writer: &dyn ImageWriter, image: &Image) -> io::Result<()> {
    if image.layout() != writer.layout() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} writer expects {:?} pixels, got {:?}",
                writer.extension(),
                writer.layout(),
                image.layout()
            ),
        ));
    }
    Ok(())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Png,
    Pam,
    Ppm,
}

impl OutputFormat {
    pub fn writer(self) -> Box<dyn ImageWriter> {
        match self {
            OutputFormat::Png => Box::new(PngWriter),
            OutputFormat::Pam => Box::new(PamWriter),
            OutputFormat::Ppm => Box::new(PpmWriter),
        }
    }

    #[inline]
    pub fn pixel_layout(self) -> PixelLayout {
        match self {
            OutputFormat::Png | OutputFormat::Pam => PixelLayout::Rgba,
            OutputFormat::Ppm => PixelLayout::Rgb,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "pam" => Ok(OutputFormat::Pam),
            "ppm" => Ok(OutputFormat::Ppm),
            other => Err(format!("unknown output format '{other}' (expected png, pam or ppm)")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.writer().extension())
    }
}

/// `DD-MM-YYYY, HH-MM-SS.<ext>` for the given local time.
pub fn timestamp_file_name(now: &DateTime<Local>, extension: &str) -> String {
    format!("{}.{extension}", now.format("%d-%m-%Y, %H-%M-%S"))
}

/// Writes `image` to `path` with `writer`.
pub fn write_image_to(writer: &dyn ImageWriter, image: &Image, path: &Path) -> Result<()> {
    let io_err = |source: io::Error| JobError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    writer.write(image, &mut out).map_err(io_err)?;
    out.flush().map_err(io_err)?;
    Ok(())
}

/// Writes `image` into `dir` under a local-timestamp file name and returns
/// the path written.
pub fn save_image(image: &Image, format: OutputFormat, dir: &Path) -> Result<PathBuf> {
    let writer = format.writer();
    let path = dir.join(timestamp_file_name(&Local::now(), writer.extension()));
    write_image_to(writer.as_ref(), image, &path)?;
    log::info!("wrote {}x{} image to {}", image.width(), image.height(), path.display());
    Ok(path)
}
