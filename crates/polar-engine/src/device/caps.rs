use bitflags::bitflags;

/// Physical device class as reported by the driver.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DeviceClass {
    /// Dedicated high-performance GPU.
    Discrete,
    Integrated,
    Virtual,
    /// Software rasterizer / CPU implementation.
    Cpu,
    Other,
}

/// Device class requirement used by adapter selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ClassRequirement {
    /// Only `DeviceClass::Discrete` adapters qualify.
    #[default]
    Discrete,
    /// Exactly the given class.
    Exactly(DeviceClass),
    /// Any class qualifies.
    Any,
}

impl ClassRequirement {
    #[inline]
    pub fn accepts(self, class: DeviceClass) -> bool {
        match self {
            ClassRequirement::Discrete => class == DeviceClass::Discrete,
            ClassRequirement::Exactly(c) => class == c,
            ClassRequirement::Any => true,
        }
    }
}

bitflags! {
    /// Property flags of a memory type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryProperties: u32 {
        /// Fast for device access.
        const DEVICE_LOCAL = 1 << 0;
        /// Can be mapped for host access.
        const HOST_VISIBLE = 1 << 1;
        /// Host writes/reads need no explicit flush/invalidate.
        const HOST_COHERENT = 1 << 2;
        const HOST_CACHED = 1 << 3;
    }
}

bitflags! {
    /// Operations a queue family supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

bitflags! {
    /// Ways a buffer is used by the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        /// Read/write storage buffer visible to kernels.
        const STORAGE = 1 << 0;
        const TRANSFER_SRC = 1 << 1;
        const TRANSFER_DST = 1 << 2;
    }
}

/// One queue family of an adapter.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct QueueFamily {
    pub flags: QueueFlags,
    pub queue_count: u32,
}

/// One memory type of an adapter, in adapter-reported order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryType {
    pub flags: MemoryProperties,
}

/// Capability record of one enumerated adapter.
///
/// Enumerated once by the driver and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterCaps {
    pub name: String,

    /// Human-readable backend label (e.g. "Vulkan").
    pub backend: String,

    pub class: DeviceClass,

    pub queue_families: Vec<QueueFamily>,

    pub memory_types: Vec<MemoryType>,

    /// Upper bound for each dispatch grid dimension.
    pub max_workgroups_per_dimension: u32,
}

impl AdapterCaps {
    /// Index of the first queue family that supports compute, if any.
    pub fn compute_queue_family(&self) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| family.flags.contains(QueueFlags::COMPUTE) && family.queue_count > 0)
            .map(|i| i as u32)
    }
}
