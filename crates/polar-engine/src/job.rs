//! End-to-end run of one compute job.

use std::path::PathBuf;

use crate::config::JobConfig;
use crate::device::{BufferUsage, ComputeDriver, DeviceContext, MemoryProperties};
use crate::dispatch::{CommandRecorder, DispatchGrid};
use crate::error::{JobError, Result};
use crate::output::save_image;
use crate::pipeline::{ComputeJob, ComputePipeline};
use crate::readback::{read_image, Image};
use crate::resource::{BindingSet, GpuBuffer};

/// How the result reached host memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReadbackPath {
    /// The result buffer itself was mapped.
    Direct,
    /// The result was copied into a host-visible staging buffer first.
    Staged,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub adapter: String,
    pub backend: String,
    pub grid: DispatchGrid,
    pub result_bytes: u64,
    pub readback: ReadbackPath,
    /// Set by [`run_to_file`].
    pub output: Option<PathBuf>,
}

/// Runs the job and returns the converted image.
///
/// Every GPU object is released before this returns, on success and on
/// error, in reverse creation order.
pub fn run(driver: &dyn ComputeDriver, config: &JobConfig) -> Result<(Image, JobReport)> {
    config.validate()?;
    let result_bytes = config.result_bytes()?;
    let grid = DispatchGrid::covering(config.width, config.height, config.workgroup_size);
    let staged = !config.result_memory.contains(MemoryProperties::HOST_VISIBLE);

    let ctx = DeviceContext::open(driver, config.device_class)?;

    let limit = ctx.adapter().max_workgroups_per_dimension;
    if !grid.fits(limit) {
        return Err(JobError::config(format!(
            "dispatch grid {}x{}x{} exceeds the adapter limit of {limit} workgroups per dimension",
            grid.x, grid.y, grid.z
        )));
    }

    let result_usage = if staged {
        BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC
    } else {
        BufferUsage::STORAGE
    };
    let result = GpuBuffer::allocate(&ctx, "result", result_bytes, result_usage, config.result_memory)?;
    let staging = if staged {
        Some(GpuBuffer::allocate(
            &ctx,
            "staging",
            result_bytes,
            BufferUsage::TRANSFER_DST,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        )?)
    } else {
        None
    };

    let bindings = BindingSet::storage_buffer(&ctx, &result)?;

    let job = ComputeJob::load(&config.kernel_path, grid)?;
    let pipeline = ComputePipeline::build(&ctx, &job, &bindings)?;

    let mut recorder = CommandRecorder::new(&ctx)?.dispatch(&pipeline, &bindings, grid);
    if let Some(staging) = &staging {
        recorder = recorder.copy_buffer(&result, staging);
    }
    log::info!(
        "dispatching {}x{}x{} workgroups over {}x{}",
        grid.x,
        grid.y,
        grid.z,
        config.width,
        config.height
    );
    let _completed = recorder.record()?.submit_and_wait()?;

    let readback = staging.as_ref().unwrap_or(&result);
    let image = read_image(readback, config.width, config.height, config.output_format.pixel_layout())?;

    let report = JobReport {
        adapter: ctx.adapter().name.clone(),
        backend: ctx.adapter().backend.clone(),
        grid,
        result_bytes,
        readback: if staged { ReadbackPath::Staged } else { ReadbackPath::Direct },
        output: None,
    };
    Ok((image, report))
}

/// Runs the job and writes the image into `config.output_dir`.
pub fn run_to_file(driver: &dyn ComputeDriver, config: &JobConfig) -> Result<JobReport> {
    let (image, mut report) = run(driver, config)?;
    report.output = Some(save_image(&image, config.output_format, &config.output_dir)?);
    Ok(report)
}
