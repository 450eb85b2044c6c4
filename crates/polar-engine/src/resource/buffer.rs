use crate::device::{
    find_memory_type, BufferDesc, BufferUsage, ComputeDriver, DeviceContext, Handle,
    MemoryProperties, Scoped,
};
use crate::error::{JobError, Result};

/// Buffer with its backing memory bound at offset 0.
///
/// A constructed `GpuBuffer` is always usable; construction failures release
/// whatever was created before them.
pub struct GpuBuffer<'d> {
    // Field order is release order: memory is freed, then the buffer destroyed.
    memory: Scoped<'d>,
    buffer: Scoped<'d>,

    driver: &'d dyn ComputeDriver,
    size: u64,
    memory_type: u32,
    memory_flags: MemoryProperties,
}

impl<'d> GpuBuffer<'d> {
    /// Creates a `size`-byte buffer exclusive to the context's compute queue
    /// family and binds it to memory of the first type that has `required`.
    pub fn allocate(
        ctx: &DeviceContext<'d>,
        label: &'static str,
        size: u64,
        usage: BufferUsage,
        required: MemoryProperties,
    ) -> Result<Self> {
        let driver = ctx.driver();

        let desc = BufferDesc {
            label,
            size,
            usage,
            queue_family: ctx.queue_family(),
        };
        let buffer = Scoped::new(driver, driver.create_buffer(ctx.device(), &desc)?);

        let requirements = driver.buffer_requirements(buffer.handle())?;
        let memory_types = &ctx.adapter().memory_types;
        let memory_type = find_memory_type(requirements.type_bits, required, memory_types)?;
        let memory_flags = memory_types[memory_type as usize].flags;

        let memory = Scoped::new(
            driver,
            driver.allocate_memory(ctx.device(), requirements.size, memory_type)?,
        );
        driver.bind_buffer_memory(buffer.handle(), memory.handle(), 0)?;

        log::debug!(
            "'{label}': {size} bytes ({} allocated), memory type {memory_type} {memory_flags:?}",
            requirements.size
        );

        Ok(Self {
            memory,
            buffer,
            driver,
            size,
            memory_type,
            memory_flags,
        })
    }

    /// Maps the whole buffer, hands the bytes to `read` and unmaps.
    ///
    /// The caller must ensure no device work writing this buffer is still in
    /// flight.
    pub fn map_read<R>(&self, read: impl FnOnce(&[u8]) -> R) -> Result<R> {
        if !self.is_host_visible() {
            return Err(JobError::InvalidMapping {
                memory_type: self.memory_type,
                flags: self.memory_flags,
            });
        }

        let mut read = Some(read);
        let mut out = None;
        self.driver
            .map_memory(self.memory.handle(), 0, self.size, &mut |bytes: &[u8]| {
                if let Some(read) = read.take() {
                    out = Some(read(bytes));
                }
            })?;
        out.ok_or_else(|| JobError::resource("driver did not deliver the mapped range"))
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.memory_flags.contains(MemoryProperties::HOST_VISIBLE)
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.buffer.handle()
    }

    #[inline]
    pub fn memory(&self) -> Handle {
        self.memory.handle()
    }

    /// Requested size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{Event, MockDriver};
    use crate::device::{ClassRequirement, HandleKind};
    use crate::error::ErrorKind;

    const DL: MemoryProperties = MemoryProperties::DEVICE_LOCAL;
    const HV: MemoryProperties = MemoryProperties::HOST_VISIBLE;
    const HC: MemoryProperties = MemoryProperties::HOST_COHERENT;

    #[test]
    fn unified_storage_buffer_lands_in_type_two() {
        let mock = MockDriver::new().with_texels(vec![0.5; 4]);
        let ctx = DeviceContext::open(&mock, ClassRequirement::Discrete).unwrap();

        let buf = GpuBuffer::allocate(&ctx, "result", 64, BufferUsage::STORAGE, DL | HV | HC).unwrap();
        assert_eq!(buf.memory_type(), 2);
        assert!(buf.is_host_visible());

        let desc = mock.buffer_desc(buf.handle()).unwrap();
        assert_eq!(desc.size, 64);
        assert_eq!(desc.queue_family, ctx.queue_family());

        let len = buf.map_read(|bytes| bytes.len()).unwrap();
        assert_eq!(len, 64);
        assert!(mock.events().contains(&Event::Map { memory: buf.memory(), len: 64 }));
    }

    #[test]
    fn device_local_buffer_cannot_be_mapped() {
        let mock = MockDriver::new();
        let ctx = DeviceContext::open(&mock, ClassRequirement::Discrete).unwrap();

        let buf = GpuBuffer::allocate(&ctx, "result", 64, BufferUsage::STORAGE, DL).unwrap();
        assert_eq!(buf.memory_type(), 0);

        let err = buf.map_read(|_| ()).unwrap_err();
        assert!(matches!(err, JobError::InvalidMapping { memory_type: 0, .. }));
        assert!(!mock.events().iter().any(|e| matches!(e, Event::Map { .. })));
    }

    #[test]
    fn unmatched_memory_releases_the_buffer() {
        let mock = MockDriver::new();
        let ctx = DeviceContext::open(&mock, ClassRequirement::Discrete).unwrap();
        let before = mock.live_count();

        let err = GpuBuffer::allocate(&ctx, "result", 64, BufferUsage::STORAGE, HV | MemoryProperties::HOST_CACHED)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(mock.live_count(), before);

        let buffers: Vec<_> = mock.created().into_iter().filter(|h| h.kind() == HandleKind::Buffer).collect();
        assert_eq!(buffers.len(), 1);
        assert!(mock.destroyed().contains(&buffers[0]));
    }

    #[test]
    fn failed_allocation_releases_the_buffer() {
        let mock = MockDriver::new().failing_on(HandleKind::Memory);
        let ctx = DeviceContext::open(&mock, ClassRequirement::Discrete).unwrap();
        let before = mock.live_count();

        assert!(GpuBuffer::allocate(&ctx, "result", 64, BufferUsage::STORAGE, DL).is_err());
        assert_eq!(mock.live_count(), before);
    }

    #[test]
    fn release_frees_memory_before_the_buffer() {
        let mock = MockDriver::new();
        let ctx = DeviceContext::open(&mock, ClassRequirement::Discrete).unwrap();
        let (buffer, memory) = {
            let buf = GpuBuffer::allocate(&ctx, "result", 16, BufferUsage::STORAGE, DL).unwrap();
            (buf.handle(), buf.memory())
        };
        assert_eq!(mock.destroyed(), vec![memory, buffer]);
    }
}
