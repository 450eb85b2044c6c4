/// Initialization parameters for the wgpu driver.
///
/// Keep this structure minimal. Add configuration flags only when a concrete
/// platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct WgpuInit {
    /// Backends the instance may enumerate adapters from.
    pub backends: wgpu::Backends,

    /// Allocation strategy hint for the device.
    pub memory_hints: wgpu::MemoryHints,

    /// Label attached to the logical device for diagnostics.
    pub device_label: &'static str,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            memory_hints: wgpu::MemoryHints::Performance,
            device_label: "polar compute device",
        }
    }
}
