//! Command recording and synchronous submission.
//!
//! One dispatch moves through three states, each consuming the previous one:
//! [`CommandRecorder`] → [`RecordedDispatch`] → [`CompletedDispatch`]. A
//! command buffer is therefore recorded once and submitted once, and host code
//! only regains control after the fence has signaled.

use crate::device::{Command, ComputeDriver, DeviceContext, Handle, Scoped};
use crate::error::{JobError, Result};
use crate::pipeline::ComputePipeline;
use crate::resource::{BindingSet, GpuBuffer};

/// Workgroup counts of one dispatch.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    /// Smallest 2D grid of `workgroup`-sized square workgroups covering a
    /// `width x height` surface.
    ///
    /// `workgroup` must be non-zero.
    #[inline]
    pub fn covering(width: u32, height: u32, workgroup: u32) -> Self {
        Self {
            x: width.div_ceil(workgroup),
            y: height.div_ceil(workgroup),
            z: 1,
        }
    }

    #[inline]
    pub fn fits(&self, max_per_dimension: u32) -> bool {
        self.x <= max_per_dimension && self.y <= max_per_dimension && self.z <= max_per_dimension
    }

    #[inline]
    pub fn workgroups(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// Collects the command sequence for a fresh command buffer.
pub struct CommandRecorder<'d> {
    // Field order is release order.
    commands: Scoped<'d>,
    pool: Scoped<'d>,

    driver: &'d dyn ComputeDriver,
    device: Handle,
    sequence: Vec<Command>,
}

impl<'d> CommandRecorder<'d> {
    /// Creates a command pool on the context's compute queue family and
    /// allocates one command buffer from it.
    pub fn new(ctx: &DeviceContext<'d>) -> Result<Self> {
        let driver = ctx.driver();
        let pool = Scoped::new(
            driver,
            driver.create_command_pool(ctx.device(), ctx.queue_family())?,
        );
        let commands = Scoped::new(driver, driver.allocate_command_buffer(pool.handle())?);

        Ok(Self {
            commands,
            pool,
            driver,
            device: ctx.device(),
            sequence: Vec::new(),
        })
    }

    /// Binds `pipeline` and `bindings` (at set index 0) and dispatches `grid`.
    pub fn dispatch(
        mut self,
        pipeline: &ComputePipeline<'d>,
        bindings: &BindingSet<'d>,
        grid: DispatchGrid,
    ) -> Self {
        self.sequence.extend([
            Command::BindPipeline(pipeline.handle()),
            Command::BindSet {
                index: 0,
                set: bindings.set(),
            },
            Command::Dispatch(grid),
        ]);
        self
    }

    /// Copies the first `src.size()` bytes of `src` into `dst`.
    pub fn copy_buffer(mut self, src: &GpuBuffer<'d>, dst: &GpuBuffer<'d>) -> Self {
        self.sequence.push(Command::CopyBuffer {
            src: src.handle(),
            dst: dst.handle(),
            size: src.size().min(dst.size()),
        });
        self
    }

    /// Records the collected sequence into the command buffer.
    pub fn record(self) -> Result<RecordedDispatch<'d>> {
        if self.sequence.is_empty() {
            return Err(JobError::submission("nothing to record"));
        }
        self.driver.record(self.commands.handle(), &self.sequence)?;
        log::debug!("recorded {} command(s) into {:?}", self.sequence.len(), self.commands.handle());

        Ok(RecordedDispatch {
            commands: self.commands,
            pool: self.pool,
            driver: self.driver,
            device: self.device,
        })
    }
}

/// A recorded command buffer that has not been submitted yet.
pub struct RecordedDispatch<'d> {
    commands: Scoped<'d>,
    pool: Scoped<'d>,

    driver: &'d dyn ComputeDriver,
    device: Handle,
}

impl<'d> RecordedDispatch<'d> {
    /// Submits the commands with a fresh fence and blocks until it signals.
    ///
    /// The wait is unbounded. A failed wait is fatal and not retried.
    pub fn submit_and_wait(self) -> Result<CompletedDispatch<'d>> {
        let fence = Scoped::new(self.driver, self.driver.create_fence(self.device)?);

        self.driver.submit(self.commands.handle(), fence.handle())?;
        log::info!("submitted {:?}, waiting on {:?}", self.commands.handle(), fence.handle());
        self.driver.wait_fence(fence.handle())?;
        log::debug!("{:?} signaled", fence.handle());

        Ok(CompletedDispatch {
            _fence: fence,
            _commands: self.commands,
            _pool: self.pool,
        })
    }
}

/// A dispatch whose fence has signaled. Holds the submission objects until
/// they are released.
pub struct CompletedDispatch<'d> {
    // Field order is release order.
    _fence: Scoped<'d>,
    _commands: Scoped<'d>,
    _pool: Scoped<'d>,
}
