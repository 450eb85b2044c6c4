use std::fmt;
use std::ops::Range;

use crate::dispatch::DispatchGrid;
use crate::error::Result;
use crate::pipeline::KernelBytecode;

use super::caps::{AdapterCaps, BufferUsage};
use super::memory::MemoryRequirements;

/// Kind of object a [`Handle`] refers to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HandleKind {
    Instance,
    Device,
    Buffer,
    Memory,
    BindingLayout,
    BindingPool,
    BindingSet,
    KernelModule,
    PipelineLayout,
    Pipeline,
    CommandPool,
    CommandBuffer,
    Fence,
}

/// Opaque reference to an object owned by a [`ComputeDriver`].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Handle {
    kind: HandleKind,
    id: u32,
}

impl Handle {
    #[inline]
    pub const fn new(kind: HandleKind, id: u32) -> Self {
        Self { kind, id }
    }

    #[inline]
    pub const fn kind(self) -> HandleKind {
        self.kind
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

/// Buffer creation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
    /// Queue family that exclusively owns the buffer.
    pub queue_family: u32,
}

/// One slot of a binding layout: a compute-visible storage buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BindingSlot {
    pub binding: u32,
    pub read_only: bool,
}

/// Commands accepted by [`ComputeDriver::record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BindPipeline(Handle),
    BindSet { index: u32, set: Handle },
    Dispatch(DispatchGrid),
    /// Copies `size` bytes from the start of `src` to the start of `dst`.
    CopyBuffer { src: Handle, dst: Handle, size: u64 },
}

/// Handle-based compute API used by every stage of the job.
///
/// Objects are created through the driver and released with
/// [`destroy`](Self::destroy); callers own the obligation to release, usually
/// through [`Scoped`](super::Scoped) guards. Implementations use interior
/// mutability and are driven from a single thread.
pub trait ComputeDriver {
    fn create_instance(&self) -> Result<Handle>;

    /// Enumerates adapters in driver order. Indices into the returned list
    /// identify adapters for [`create_device`](Self::create_device).
    fn enumerate_adapters(&self, instance: Handle) -> Result<Vec<AdapterCaps>>;

    /// Creates the logical device with one queue from `queue_family`.
    fn create_device(&self, instance: Handle, adapter: usize, queue_family: u32) -> Result<Handle>;

    fn create_buffer(&self, device: Handle, desc: &BufferDesc) -> Result<Handle>;

    fn buffer_requirements(&self, buffer: Handle) -> Result<MemoryRequirements>;

    fn allocate_memory(&self, device: Handle, size: u64, memory_type: u32) -> Result<Handle>;

    fn bind_buffer_memory(&self, buffer: Handle, memory: Handle, offset: u64) -> Result<()>;

    /// Maps `len` bytes of `memory` starting at `offset`, hands them to `read`,
    /// then unmaps. The slice must not be retained past the call.
    fn map_memory(
        &self,
        memory: Handle,
        offset: u64,
        len: u64,
        read: &mut dyn FnMut(&[u8]),
    ) -> Result<()>;

    fn create_binding_layout(&self, device: Handle, slots: &[BindingSlot]) -> Result<Handle>;

    fn create_binding_pool(&self, device: Handle, max_sets: u32, storage_buffers: u32)
        -> Result<Handle>;

    /// Allocates a set from `pool`. Sets are freed by resetting the pool.
    fn allocate_binding_set(&self, pool: Handle, layout: Handle) -> Result<Handle>;

    fn write_binding(&self, set: Handle, binding: u32, buffer: Handle, range: Range<u64>)
        -> Result<()>;

    fn create_kernel_module(&self, device: Handle, bytecode: &KernelBytecode) -> Result<Handle>;

    fn create_pipeline_layout(&self, device: Handle, binding_layouts: &[Handle]) -> Result<Handle>;

    /// Builds a compute pipeline. Fails with `BindingMismatch` when the layout
    /// does not match the kernel's declared resources.
    fn create_compute_pipeline(&self, layout: Handle, module: Handle, entry: &str)
        -> Result<Handle>;

    fn create_command_pool(&self, device: Handle, queue_family: u32) -> Result<Handle>;

    fn allocate_command_buffer(&self, pool: Handle) -> Result<Handle>;

    /// Records `sequence` into a fresh command buffer. One-time: a command
    /// buffer cannot be recorded twice.
    fn record(&self, commands: Handle, sequence: &[Command]) -> Result<()>;

    /// Creates an unsignaled fence.
    fn create_fence(&self, device: Handle) -> Result<Handle>;

    /// Submits a recorded command buffer; `fence` signals on completion.
    fn submit(&self, commands: Handle, fence: Handle) -> Result<()>;

    /// Blocks until `fence` signals. No timeout.
    fn wait_fence(&self, fence: Handle) -> Result<()>;

    /// Frees every set allocated from `pool`.
    fn reset_binding_pool(&self, pool: Handle);

    /// Releases an object. Dependents must already be released.
    fn destroy(&self, handle: Handle);
}
