//! Kernel loading and compute pipeline construction.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::device::{DeviceContext, Handle, Scoped};
use crate::dispatch::DispatchGrid;
use crate::error::{JobError, Result};
use crate::resource::BindingSet;

/// Entry symbol every kernel must export.
pub const KERNEL_ENTRY: &str = "main";

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Kernel program accepted by [`ComputeDriver::create_kernel_module`](crate::device::ComputeDriver::create_kernel_module).
#[derive(Debug, Clone, PartialEq)]
pub enum KernelBytecode {
    /// SPIR-V words in host byte order.
    SpirV(Vec<u32>),
    /// WGSL source text.
    Wgsl(String),
}

impl KernelBytecode {
    /// Classifies raw kernel bytes.
    ///
    /// Bytes starting with the SPIR-V magic number (in either byte order) are
    /// SPIR-V and must be a whole number of words. Anything else must be UTF-8
    /// WGSL source.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.is_empty() {
            return Err("kernel is empty".into());
        }

        if bytes.len() >= 4 {
            let head: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
            let native = u32::from_ne_bytes(head);
            if native == SPIRV_MAGIC || native.swap_bytes() == SPIRV_MAGIC {
                if bytes.len() % 4 != 0 {
                    return Err(format!(
                        "SPIR-V length {} is not a multiple of 4",
                        bytes.len()
                    ));
                }
                let mut words: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
                if native != SPIRV_MAGIC {
                    words.iter_mut().for_each(|w| *w = w.swap_bytes());
                }
                return Ok(Self::SpirV(words));
            }
        }

        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(Self::Wgsl(text.to_owned())),
            Err(_) => Err("kernel is neither SPIR-V nor UTF-8 WGSL".into()),
        }
    }

    pub fn len_bytes(&self) -> usize {
        match self {
            Self::SpirV(words) => words.len() * 4,
            Self::Wgsl(text) => text.len(),
        }
    }
}

/// Reads and classifies a kernel from `source`. `origin` names the source in
/// errors.
pub fn read_kernel(mut source: impl Read, origin: &Path) -> Result<KernelBytecode> {
    let shader_err = |reason: String| JobError::ShaderLoad {
        path: origin.to_path_buf(),
        reason,
    };

    let mut bytes = Vec::new();
    source
        .read_to_end(&mut bytes)
        .map_err(|e| shader_err(e.to_string()))?;
    KernelBytecode::parse(&bytes).map_err(shader_err)
}

/// Opens `path` and reads the kernel from it.
pub fn load_kernel(path: &Path) -> Result<KernelBytecode> {
    let file = File::open(path).map_err(|e| JobError::ShaderLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let bytecode = read_kernel(file, path)?;
    log::debug!("loaded {} byte kernel from {}", bytecode.len_bytes(), path.display());
    Ok(bytecode)
}

/// Everything needed to build and dispatch one kernel. Immutable once built.
#[derive(Debug, Clone)]
pub struct ComputeJob {
    pub bytecode: KernelBytecode,
    pub entry: &'static str,
    pub grid: DispatchGrid,
    /// Where the bytecode came from.
    pub origin: PathBuf,
}

impl ComputeJob {
    pub fn load(path: &Path, grid: DispatchGrid) -> Result<Self> {
        Ok(Self {
            bytecode: load_kernel(path)?,
            entry: KERNEL_ENTRY,
            grid,
            origin: path.to_path_buf(),
        })
    }
}

/// Kernel module, pipeline layout and compute pipeline.
pub struct ComputePipeline<'d> {
    // Field order is release order.
    pipeline: Scoped<'d>,
    _layout: Scoped<'d>,
    _module: Scoped<'d>,
}

impl<'d> ComputePipeline<'d> {
    /// Builds a single-stage compute pipeline over `bindings`' layout. No
    /// constant-data ranges.
    pub fn build(ctx: &DeviceContext<'d>, job: &ComputeJob, bindings: &BindingSet<'d>) -> Result<Self> {
        let driver = ctx.driver();

        let module = Scoped::new(driver, driver.create_kernel_module(ctx.device(), &job.bytecode)?);
        let layout = Scoped::new(
            driver,
            driver.create_pipeline_layout(ctx.device(), &[bindings.layout()])?,
        );
        let pipeline = Scoped::new(
            driver,
            driver.create_compute_pipeline(layout.handle(), module.handle(), job.entry)?,
        );
        log::info!("compute pipeline ready (entry '{}')", job.entry);

        Ok(Self {
            pipeline,
            _layout: layout,
            _module: module,
        })
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.pipeline.handle()
    }
}
