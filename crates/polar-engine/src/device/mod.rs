//! GPU device layer.
//!
//! This module is responsible for:
//! - the handle-based [`ComputeDriver`] seam and its wgpu implementation
//! - adapter capability records and adapter selection
//! - memory type matching
//! - release guards that tear objects down in reverse creation order

mod caps;
mod context;
mod driver;
mod init;
mod memory;
mod scoped;
mod select;
mod wgpu_driver;

#[cfg(test)]
pub(crate) mod mock;

pub use caps::{
    AdapterCaps, BufferUsage, ClassRequirement, DeviceClass, MemoryProperties, MemoryType,
    QueueFamily, QueueFlags,
};
pub use context::DeviceContext;
pub use driver::{BindingSlot, BufferDesc, Command, ComputeDriver, Handle, HandleKind};
pub use init::WgpuInit;
pub use memory::{find_memory_type, MemoryRequirements};
pub use scoped::Scoped;
pub use select::{compatible_queue_family, select_adapter, AdapterSelection};
pub use wgpu_driver::WgpuDriver;
