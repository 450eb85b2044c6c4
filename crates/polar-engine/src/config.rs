//! Job configuration.

use std::path::PathBuf;

use crate::device::{ClassRequirement, MemoryProperties};
use crate::error::{JobError, Result};
use crate::output::OutputFormat;
use crate::readback::Texel;

/// Everything one run needs to know.
///
/// `width` and `height` have no defaults; a zero value is rejected by
/// [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub width: u32,
    pub height: u32,

    /// Edge length of the kernel's square workgroup.
    pub workgroup_size: u32,

    pub output_format: OutputFormat,

    pub kernel_path: PathBuf,

    pub output_dir: PathBuf,

    pub device_class: ClassRequirement,

    /// Memory properties required for the result buffer. Without
    /// `HOST_VISIBLE` the result is copied to a staging buffer for readback.
    pub result_memory: MemoryProperties,
}

impl JobConfig {
    pub const DEFAULT_WORKGROUP_SIZE: u32 = 32;
    pub const DEFAULT_KERNEL_PATH: &'static str = "shader.spv";

    /// Device-local memory the host can map directly.
    pub const UNIFIED_MEMORY: MemoryProperties = MemoryProperties::DEVICE_LOCAL
        .union(MemoryProperties::HOST_VISIBLE)
        .union(MemoryProperties::HOST_COHERENT);

    /// Defaults for everything but the surface size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            workgroup_size: Self::DEFAULT_WORKGROUP_SIZE,
            output_format: OutputFormat::default(),
            kernel_path: PathBuf::from(Self::DEFAULT_KERNEL_PATH),
            output_dir: PathBuf::from("."),
            device_class: ClassRequirement::default(),
            result_memory: Self::UNIFIED_MEMORY,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(JobError::config(format!(
                "width and height must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.workgroup_size == 0 {
            return Err(JobError::config("workgroup size must be positive"));
        }
        if self.result_memory.is_empty() {
            return Err(JobError::config("result memory properties are empty"));
        }
        self.result_bytes()?;
        Ok(())
    }

    /// Size of the float RGBA result buffer.
    pub fn result_bytes(&self) -> Result<u64> {
        (self.width as u64)
            .checked_mul(self.height as u64)
            .and_then(|n| n.checked_mul(Texel::SIZE as u64))
            .filter(|&n| usize::try_from(n).is_ok())
            .ok_or_else(|| {
                JobError::config(format!("{}x{} surface is too large", self.width, self.height))
            })
    }
}
