//! GPU resources owned by the job: buffers with bound memory and the binding
//! set that exposes them to the kernel.

mod binding;
mod buffer;

pub use binding::BindingSet;
pub use buffer::GpuBuffer;
