//! [`ComputeDriver`] on top of wgpu.
//!
//! wgpu has no explicit memory types, pools or fences; they are modelled here:
//! - memory types are synthesized per adapter (see [`memory_types_for`])
//! - the wgpu buffer is created when memory is bound, with usages derived from
//!   the requested buffer usage and the memory type's host visibility
//! - binding pools are capacity counters; bind groups are built at record time
//! - a fence wraps the submission index and is waited on with `Device::poll`

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;

use crate::error::{JobError, Result};
use crate::pipeline::KernelBytecode;

use super::caps::{
    AdapterCaps, BufferUsage, DeviceClass, MemoryProperties, MemoryType, QueueFamily, QueueFlags,
};
use super::driver::{BindingSlot, BufferDesc, Command, ComputeDriver, Handle, HandleKind};
use super::init::WgpuInit;
use super::memory::MemoryRequirements;

const DEVICE_LOCAL: MemoryProperties = MemoryProperties::DEVICE_LOCAL;
const HOST_MAPPED: MemoryProperties =
    MemoryProperties::HOST_VISIBLE.union(MemoryProperties::HOST_COHERENT);

enum CommandState {
    Initial,
    Recorded(wgpu::CommandBuffer),
    Submitted,
}

enum FenceState {
    Unsignaled,
    Pending(wgpu::SubmissionIndex),
    Signaled,
}

enum Object {
    Buffer {
        desc: BufferDesc,
        memory: Option<Handle>,
    },
    Memory {
        size: u64,
        flags: MemoryProperties,
        buffer: Option<wgpu::Buffer>,
    },
    BindingLayout {
        layout: wgpu::BindGroupLayout,
        slots: Vec<BindingSlot>,
    },
    BindingPool {
        max_sets: u32,
        sets: Vec<Handle>,
    },
    BindingSet {
        layout: Handle,
        entries: Vec<(u32, Handle, Range<u64>)>,
    },
    KernelModule(wgpu::ShaderModule),
    PipelineLayout(wgpu::PipelineLayout),
    Pipeline(wgpu::ComputePipeline),
    CommandPool,
    CommandBuffer(CommandState),
    Fence(FenceState),
}

struct InstanceSlot {
    handle: Handle,
    instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
}

struct DeviceSlot {
    handle: Handle,
    device: wgpu::Device,
    queue: wgpu::Queue,
    memory_types: Vec<MemoryType>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    instance: Option<InstanceSlot>,
    device: Option<DeviceSlot>,
    objects: HashMap<Handle, Object>,
}

impl State {
    fn alloc(&mut self, kind: HandleKind) -> Handle {
        self.next_id += 1;
        Handle::new(kind, self.next_id)
    }

    fn insert(&mut self, kind: HandleKind, object: Object) -> Handle {
        let handle = self.alloc(kind);
        self.objects.insert(handle, object);
        handle
    }

    fn device(&self, handle: Handle) -> Result<&DeviceSlot> {
        self.device
            .as_ref()
            .filter(|slot| slot.handle == handle)
            .ok_or_else(|| JobError::resource(format!("{handle:?} is not the open device")))
    }

    fn open_device(&self) -> Result<&DeviceSlot> {
        self.device
            .as_ref()
            .ok_or_else(|| JobError::resource("no device is open"))
    }

    fn object(&self, handle: Handle) -> Result<&Object> {
        self.objects
            .get(&handle)
            .ok_or_else(|| JobError::resource(format!("unknown or released {handle:?}")))
    }

    fn object_mut(&mut self, handle: Handle) -> Result<&mut Object> {
        self.objects
            .get_mut(&handle)
            .ok_or_else(|| JobError::resource(format!("unknown or released {handle:?}")))
    }

    /// wgpu buffer backing a buffer handle (available once memory is bound).
    fn wgpu_buffer(&self, buffer: Handle) -> Result<&wgpu::Buffer> {
        let Object::Buffer { memory: Some(memory), .. } = self.object(buffer)? else {
            return Err(JobError::resource(format!("{buffer:?} has no bound memory")));
        };
        match self.object(*memory)? {
            Object::Memory { buffer: Some(b), .. } => Ok(b),
            _ => Err(JobError::resource(format!("{memory:?} backs no buffer"))),
        }
    }

    fn pipeline(&self, handle: Handle) -> Result<&wgpu::ComputePipeline> {
        match self.object(handle)? {
            Object::Pipeline(p) => Ok(p),
            _ => Err(JobError::resource(format!("{handle:?} is not a pipeline"))),
        }
    }

    fn bind_group(&self, device: &wgpu::Device, set: Handle) -> Result<wgpu::BindGroup> {
        let Object::BindingSet { layout, entries } = self.object(set)? else {
            return Err(JobError::resource(format!("{set:?} is not a binding set")));
        };
        let Object::BindingLayout { layout, slots } = self.object(*layout)? else {
            return Err(JobError::resource(format!("{layout:?} is not a binding layout")));
        };
        if entries.len() != slots.len() {
            return Err(JobError::resource(format!(
                "{set:?} has {} of {} bindings written",
                entries.len(),
                slots.len()
            )));
        }

        let mut group_entries = Vec::with_capacity(entries.len());
        for (binding, buffer, range) in entries {
            group_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: self.wgpu_buffer(*buffer)?,
                    offset: range.start,
                    size: wgpu::BufferSize::new(range.end - range.start),
                }),
            });
        }

        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("polar binding set"),
            layout,
            entries: &group_entries,
        }))
    }
}

/// Memory types exposed for a wgpu adapter, in this order:
/// 0. `DEVICE_LOCAL`: storage / copy buffers
/// 1. `HOST_VISIBLE | HOST_COHERENT`: map-read staging buffers
/// 2. `DEVICE_LOCAL | HOST_VISIBLE | HOST_COHERENT`: mappable storage buffers,
///    only when the adapter supports `MAPPABLE_PRIMARY_BUFFERS`
pub(crate) fn memory_types_for(features: wgpu::Features) -> Vec<MemoryType> {
    let mut types = vec![
        MemoryType { flags: DEVICE_LOCAL },
        MemoryType { flags: HOST_MAPPED },
    ];
    if features.contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS) {
        types.push(MemoryType { flags: DEVICE_LOCAL | HOST_MAPPED });
    }
    types
}

/// Memory types able to back a buffer of `usage`.
///
/// Host-only memory can only back pure copy destinations; wgpu forbids
/// `MAP_READ` next to anything but `COPY_DST` without mappable primary buffers.
pub(crate) fn type_bits_for(usage: BufferUsage, types: &[MemoryType]) -> u32 {
    let copy_dst_only = !usage.contains(BufferUsage::STORAGE) && !usage.contains(BufferUsage::TRANSFER_SRC);
    types
        .iter()
        .enumerate()
        .filter(|(_, ty)| copy_dst_only || ty.flags.contains(DEVICE_LOCAL))
        .fold(0u32, |bits, (i, _)| bits | (1 << i))
}

pub(crate) fn buffer_usages(usage: BufferUsage, flags: MemoryProperties) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if flags.contains(MemoryProperties::HOST_VISIBLE) {
        out |= wgpu::BufferUsages::MAP_READ;
    }
    out
}

fn device_class(ty: wgpu::DeviceType) -> DeviceClass {
    match ty {
        wgpu::DeviceType::DiscreteGpu => DeviceClass::Discrete,
        wgpu::DeviceType::IntegratedGpu => DeviceClass::Integrated,
        wgpu::DeviceType::VirtualGpu => DeviceClass::Virtual,
        wgpu::DeviceType::Cpu => DeviceClass::Cpu,
        wgpu::DeviceType::Other => DeviceClass::Other,
    }
}

fn adapter_caps(adapter: &wgpu::Adapter) -> AdapterCaps {
    let info = adapter.get_info();

    // wgpu exposes a single queue; compute support is a downlevel capability.
    let mut flags = QueueFlags::GRAPHICS | QueueFlags::TRANSFER;
    if adapter
        .get_downlevel_capabilities()
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
    {
        flags |= QueueFlags::COMPUTE;
    }

    AdapterCaps {
        name: info.name,
        backend: info.backend.to_str().to_owned(),
        class: device_class(info.device_type),
        queue_families: vec![QueueFamily { flags, queue_count: 1 }],
        memory_types: memory_types_for(adapter.features()),
        max_workgroups_per_dimension: adapter.limits().max_compute_workgroups_per_dimension,
    }
}

/// Runs `f` inside a validation error scope and reports the captured error.
fn validated<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let error = pollster::block_on(scope.pop());
    (value, error)
}

fn encode(
    st: &State,
    device: &wgpu::Device,
    groups: &HashMap<Handle, wgpu::BindGroup>,
    sequence: &[Command],
) -> Result<wgpu::CommandBuffer> {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("polar dispatch encoder"),
    });

    let mut i = 0;
    while i < sequence.len() {
        if let Command::CopyBuffer { src, dst, size } = sequence[i] {
            encoder.copy_buffer_to_buffer(st.wgpu_buffer(src)?, 0, st.wgpu_buffer(dst)?, 0, size);
            i += 1;
            continue;
        }

        // Consecutive compute commands share one pass.
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("polar compute pass"),
            timestamp_writes: None,
        });
        while i < sequence.len() {
            match &sequence[i] {
                Command::CopyBuffer { .. } => break,
                Command::BindPipeline(p) => pass.set_pipeline(st.pipeline(*p)?),
                Command::BindSet { index, set } => {
                    let group = groups
                        .get(set)
                        .ok_or_else(|| JobError::submission(format!("{set:?} was not prepared")))?;
                    pass.set_bind_group(*index, group, &[]);
                }
                Command::Dispatch(grid) => pass.dispatch_workgroups(grid.x, grid.y, grid.z),
            }
            i += 1;
        }
    }

    Ok(encoder.finish())
}

/// wgpu-backed driver.
pub struct WgpuDriver {
    init: WgpuInit,
    state: RefCell<State>,
}

impl WgpuDriver {
    pub fn new(init: WgpuInit) -> Self {
        Self {
            init,
            state: RefCell::new(State::default()),
        }
    }
}

impl Default for WgpuDriver {
    fn default() -> Self {
        Self::new(WgpuInit::default())
    }
}

impl ComputeDriver for WgpuDriver {
    fn create_instance(&self) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        if st.instance.is_some() {
            return Err(JobError::resource("instance already created"));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: self.init.backends,
            ..Default::default()
        });

        let handle = st.alloc(HandleKind::Instance);
        st.instance = Some(InstanceSlot {
            handle,
            instance,
            adapters: Vec::new(),
        });
        Ok(handle)
    }

    fn enumerate_adapters(&self, instance: Handle) -> Result<Vec<AdapterCaps>> {
        let mut st = self.state.borrow_mut();
        let slot = st
            .instance
            .as_mut()
            .filter(|slot| slot.handle == instance)
            .ok_or_else(|| JobError::resource(format!("{instance:?} is not the live instance")))?;

        if slot.adapters.is_empty() {
            slot.adapters = pollster::block_on(slot.instance.enumerate_adapters(self.init.backends));
        }
        Ok(slot.adapters.iter().map(adapter_caps).collect())
    }

    fn create_device(&self, instance: Handle, adapter: usize, queue_family: u32) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        if st.device.is_some() {
            return Err(JobError::resource("device already created"));
        }
        let adapter = st
            .instance
            .as_ref()
            .filter(|slot| slot.handle == instance)
            .and_then(|slot| slot.adapters.get(adapter))
            .cloned()
            .ok_or_else(|| JobError::resource(format!("adapter {adapter} was not enumerated")))?;
        if queue_family != 0 {
            return Err(JobError::resource(format!("queue family {queue_family} does not exist")));
        }

        let mut required_features = wgpu::Features::empty();
        if adapter.features().contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS) {
            required_features |= wgpu::Features::MAPPABLE_PRIMARY_BUFFERS;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some(self.init.device_label),
            required_features,
            required_limits: adapter.limits(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: self.init.memory_hints.clone(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| JobError::resource(format!("failed to create wgpu device/queue: {e}")))?;

        let handle = st.alloc(HandleKind::Device);
        st.device = Some(DeviceSlot {
            handle,
            device,
            queue,
            memory_types: memory_types_for(adapter.features()),
        });
        Ok(handle)
    }

    fn create_buffer(&self, device: Handle, desc: &BufferDesc) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        st.device(device)?;
        if desc.size == 0 {
            return Err(JobError::resource(format!("buffer '{}' has zero size", desc.label)));
        }
        Ok(st.insert(
            HandleKind::Buffer,
            Object::Buffer {
                desc: desc.clone(),
                memory: None,
            },
        ))
    }

    fn buffer_requirements(&self, buffer: Handle) -> Result<MemoryRequirements> {
        let st = self.state.borrow();
        let Object::Buffer { desc, .. } = st.object(buffer)? else {
            return Err(JobError::resource(format!("{buffer:?} is not a buffer")));
        };
        let types = &st.open_device()?.memory_types;
        Ok(MemoryRequirements {
            size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            type_bits: type_bits_for(desc.usage, types),
        })
    }

    fn allocate_memory(&self, device: Handle, size: u64, memory_type: u32) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        let flags = st
            .device(device)?
            .memory_types
            .get(memory_type as usize)
            .map(|ty| ty.flags)
            .ok_or_else(|| JobError::resource(format!("memory type {memory_type} does not exist")))?;
        Ok(st.insert(
            HandleKind::Memory,
            Object::Memory {
                size,
                flags,
                buffer: None,
            },
        ))
    }

    fn bind_buffer_memory(&self, buffer: Handle, memory: Handle, offset: u64) -> Result<()> {
        if offset != 0 {
            return Err(JobError::resource("memory can only be bound at offset 0"));
        }
        let mut st = self.state.borrow_mut();

        let desc = match st.object(buffer)? {
            Object::Buffer { desc, memory: None } => desc.clone(),
            Object::Buffer { .. } => {
                return Err(JobError::resource(format!("{buffer:?} already has memory bound")));
            }
            _ => return Err(JobError::resource(format!("{buffer:?} is not a buffer"))),
        };
        let (size, flags) = match st.object(memory)? {
            Object::Memory { size, flags, buffer: None } => (*size, *flags),
            _ => return Err(JobError::resource(format!("{memory:?} is not free memory"))),
        };

        let device = st.open_device()?.device.clone();
        let (raw, error) = validated(&device, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size,
                usage: buffer_usages(desc.usage, flags),
                mapped_at_creation: false,
            })
        });
        if let Some(e) = error {
            return Err(JobError::resource(format!("binding memory to '{}' failed: {e}", desc.label)));
        }

        if let Object::Memory { buffer, .. } = st.object_mut(memory)? {
            *buffer = Some(raw);
        }
        if let Object::Buffer { memory: bound, .. } = st.object_mut(buffer)? {
            *bound = Some(memory);
        }
        Ok(())
    }

    fn map_memory(
        &self,
        memory: Handle,
        offset: u64,
        len: u64,
        read: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        let (device, buffer) = {
            let st = self.state.borrow();
            let buffer = match st.object(memory)? {
                Object::Memory { flags, buffer: Some(b), .. }
                    if flags.contains(MemoryProperties::HOST_VISIBLE) =>
                {
                    b.clone()
                }
                Object::Memory { buffer: None, .. } => {
                    return Err(JobError::resource(format!("{memory:?} is not bound")));
                }
                _ => return Err(JobError::resource(format!("{memory:?} cannot be mapped"))),
            };
            (st.open_device()?.device.clone(), buffer)
        };

        let slice = buffer.slice(offset..offset + len);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| JobError::resource(format!("device poll during map failed: {e}")))?;
        rx.recv()
            .map_err(|e| JobError::resource(format!("map callback dropped: {e}")))?
            .map_err(|e| JobError::resource(format!("buffer map failed: {e}")))?;

        {
            let view = slice.get_mapped_range();
            read(&view);
        }
        buffer.unmap();
        Ok(())
    }

    fn create_binding_layout(&self, device: Handle, slots: &[BindingSlot]) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        let entries: Vec<wgpu::BindGroupLayoutEntry> = slots
            .iter()
            .map(|slot| wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: slot.read_only },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout = st
            .device(device)?
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("polar binding layout"),
                entries: &entries,
            });
        Ok(st.insert(
            HandleKind::BindingLayout,
            Object::BindingLayout {
                layout,
                slots: slots.to_vec(),
            },
        ))
    }

    fn create_binding_pool(
        &self,
        device: Handle,
        max_sets: u32,
        _storage_buffers: u32,
    ) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        st.device(device)?;
        Ok(st.insert(
            HandleKind::BindingPool,
            Object::BindingPool {
                max_sets,
                sets: Vec::new(),
            },
        ))
    }

    fn allocate_binding_set(&self, pool: Handle, layout: Handle) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        if !matches!(st.object(layout)?, Object::BindingLayout { .. }) {
            return Err(JobError::resource(format!("{layout:?} is not a binding layout")));
        }
        match st.object(pool)? {
            Object::BindingPool { max_sets, sets } if (sets.len() as u32) < *max_sets => {}
            Object::BindingPool { .. } => {
                return Err(JobError::resource(format!("{pool:?} is exhausted")));
            }
            _ => return Err(JobError::resource(format!("{pool:?} is not a binding pool"))),
        }

        let set = st.insert(
            HandleKind::BindingSet,
            Object::BindingSet {
                layout,
                entries: Vec::new(),
            },
        );
        if let Object::BindingPool { sets, .. } = st.object_mut(pool)? {
            sets.push(set);
        }
        Ok(set)
    }

    fn write_binding(
        &self,
        set: Handle,
        binding: u32,
        buffer: Handle,
        range: Range<u64>,
    ) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.wgpu_buffer(buffer)?;
        if range.start >= range.end {
            return Err(JobError::resource(format!("empty binding range {range:?}")));
        }
        let layout = match st.object(set)? {
            Object::BindingSet { layout, .. } => *layout,
            _ => return Err(JobError::resource(format!("{set:?} is not a binding set"))),
        };
        let declared = matches!(
            st.object(layout)?,
            Object::BindingLayout { slots, .. } if slots.iter().any(|s| s.binding == binding)
        );
        if !declared {
            return Err(JobError::resource(format!("binding {binding} is not in the layout")));
        }

        if let Object::BindingSet { entries, .. } = st.object_mut(set)? {
            entries.retain(|(b, _, _)| *b != binding);
            entries.push((binding, buffer, range));
        }
        Ok(())
    }

    fn create_kernel_module(&self, device: Handle, bytecode: &KernelBytecode) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        let device = st.device(device)?.device.clone();

        let source = match bytecode {
            KernelBytecode::SpirV(words) => wgpu::ShaderSource::SpirV(Cow::Borrowed(words)),
            KernelBytecode::Wgsl(text) => wgpu::ShaderSource::Wgsl(Cow::Borrowed(text)),
        };
        let (module, error) = validated(&device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("polar kernel"),
                source,
            })
        });
        if let Some(e) = error {
            return Err(JobError::submission(format!("kernel module rejected: {e}")));
        }
        Ok(st.insert(HandleKind::KernelModule, Object::KernelModule(module)))
    }

    fn create_pipeline_layout(&self, device: Handle, binding_layouts: &[Handle]) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        let layouts = binding_layouts
            .iter()
            .map(|h| match st.object(*h)? {
                Object::BindingLayout { layout, .. } => Ok(layout),
                _ => Err(JobError::resource(format!("{h:?} is not a binding layout"))),
            })
            .collect::<Result<Vec<&wgpu::BindGroupLayout>>>()?;

        let layout = st
            .device(device)?
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("polar pipeline layout"),
                bind_group_layouts: &layouts,
                immediate_size: 0,
            });
        Ok(st.insert(HandleKind::PipelineLayout, Object::PipelineLayout(layout)))
    }

    fn create_compute_pipeline(&self, layout: Handle, module: Handle, entry: &str) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        let device = st.open_device()?.device.clone();
        let Object::PipelineLayout(pipeline_layout) = st.object(layout)? else {
            return Err(JobError::resource(format!("{layout:?} is not a pipeline layout")));
        };
        let Object::KernelModule(shader) = st.object(module)? else {
            return Err(JobError::resource(format!("{module:?} is not a kernel module")));
        };

        let (pipeline, error) = validated(&device, || {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("polar compute pipeline"),
                layout: Some(pipeline_layout),
                module: shader,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        });
        if let Some(e) = error {
            return Err(JobError::BindingMismatch(e.to_string()));
        }
        Ok(st.insert(HandleKind::Pipeline, Object::Pipeline(pipeline)))
    }

    fn create_command_pool(&self, device: Handle, queue_family: u32) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        st.device(device)?;
        if queue_family != 0 {
            return Err(JobError::resource(format!("queue family {queue_family} does not exist")));
        }
        Ok(st.insert(HandleKind::CommandPool, Object::CommandPool))
    }

    fn allocate_command_buffer(&self, pool: Handle) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        if !matches!(st.object(pool)?, Object::CommandPool) {
            return Err(JobError::resource(format!("{pool:?} is not a command pool")));
        }
        Ok(st.insert(
            HandleKind::CommandBuffer,
            Object::CommandBuffer(CommandState::Initial),
        ))
    }

    fn record(&self, commands: Handle, sequence: &[Command]) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if !matches!(st.object(commands)?, Object::CommandBuffer(CommandState::Initial)) {
            return Err(JobError::submission(format!("{commands:?} is not recordable")));
        }
        let device = st.open_device()?.device.clone();

        let mut groups: HashMap<Handle, wgpu::BindGroup> = HashMap::new();
        for cmd in sequence {
            if let Command::BindSet { set, .. } = cmd {
                groups.insert(*set, st.bind_group(&device, *set)?);
            }
        }

        let (encoded, error) = validated(&device, || encode(&st, &device, &groups, sequence));
        if let Some(e) = error {
            return Err(JobError::submission(format!("command recording rejected: {e}")));
        }
        let finished = encoded?;

        *st.object_mut(commands)? = Object::CommandBuffer(CommandState::Recorded(finished));
        Ok(())
    }

    fn create_fence(&self, device: Handle) -> Result<Handle> {
        let mut st = self.state.borrow_mut();
        st.device(device)?;
        Ok(st.insert(HandleKind::Fence, Object::Fence(FenceState::Unsignaled)))
    }

    fn submit(&self, commands: Handle, fence: Handle) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if !matches!(st.object(fence)?, Object::Fence(FenceState::Unsignaled)) {
            return Err(JobError::submission(format!("{fence:?} is already in use")));
        }
        let recorded = match st.object_mut(commands)? {
            Object::CommandBuffer(state) => std::mem::replace(state, CommandState::Submitted),
            _ => return Err(JobError::submission(format!("{commands:?} is not a command buffer"))),
        };
        let CommandState::Recorded(buffer) = recorded else {
            return Err(JobError::submission(format!("{commands:?} was not recorded")));
        };

        let index = st.open_device()?.queue.submit(std::iter::once(buffer));
        *st.object_mut(fence)? = Object::Fence(FenceState::Pending(index));
        Ok(())
    }

    fn wait_fence(&self, fence: Handle) -> Result<()> {
        let (device, index) = {
            let mut st = self.state.borrow_mut();
            let state = match st.object_mut(fence)? {
                Object::Fence(state) => std::mem::replace(state, FenceState::Signaled),
                _ => return Err(JobError::FenceWait(format!("{fence:?} is not a fence"))),
            };
            let FenceState::Pending(index) = state else {
                return Err(JobError::FenceWait(format!("{fence:?} has no pending submission")));
            };
            (st.open_device()?.device.clone(), index)
        };

        device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: None,
            })
            .map_err(|e| JobError::FenceWait(e.to_string()))?;
        Ok(())
    }

    fn reset_binding_pool(&self, pool: Handle) {
        let mut st = self.state.borrow_mut();
        let sets = match st.objects.get_mut(&pool) {
            Some(Object::BindingPool { sets, .. }) => std::mem::take(sets),
            _ => return,
        };
        for set in sets {
            st.objects.remove(&set);
        }
    }

    fn destroy(&self, handle: Handle) {
        let mut st = self.state.borrow_mut();
        match handle.kind() {
            HandleKind::Instance => {
                if st.instance.as_ref().is_some_and(|slot| slot.handle == handle) {
                    st.instance = None;
                    return;
                }
            }
            HandleKind::Device => {
                if let Some(slot) = st.device.take_if(|slot| slot.handle == handle) {
                    slot.device.destroy();
                    return;
                }
            }
            _ => match st.objects.remove(&handle) {
                Some(Object::Memory { buffer: Some(buffer), .. }) => {
                    buffer.destroy();
                    return;
                }
                Some(_) => return,
                None => {}
            },
        }
        log::warn!("release of unknown {handle:?} ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_types_depend_on_mappable_primary_buffers() {
        let plain = memory_types_for(wgpu::Features::empty());
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[0].flags, DEVICE_LOCAL);
        assert_eq!(plain[1].flags, HOST_MAPPED);

        let unified = memory_types_for(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS);
        assert_eq!(unified.len(), 3);
        assert!(unified[2].flags.contains(DEVICE_LOCAL | HOST_MAPPED));
    }

    #[test]
    fn storage_buffers_never_land_in_host_only_memory() {
        let types = memory_types_for(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS);
        assert_eq!(type_bits_for(BufferUsage::STORAGE, &types), 0b101);
        assert_eq!(
            type_bits_for(BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC, &types),
            0b101
        );
        assert_eq!(type_bits_for(BufferUsage::TRANSFER_DST, &types), 0b111);
    }

    #[test]
    fn usages_add_map_read_for_host_visible_memory() {
        assert_eq!(
            buffer_usages(BufferUsage::TRANSFER_DST, HOST_MAPPED),
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ
        );
        assert_eq!(
            buffer_usages(BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC, DEVICE_LOCAL),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC
        );
    }

    /// Device on any available adapter, or `None` on machines without one.
    fn any_device() -> Option<wgpu::Device> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default())).ok()?;
        let (device, _queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())).ok()?;
        Some(device)
    }

    #[test]
    fn validation_scope_reports_and_clears() {
        let Some(device) = any_device() else {
            return;
        };

        // Mapped-at-creation buffers must be a whole number of words.
        let (_buffer, error) = validated(&device, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("misaligned"),
                size: 3,
                usage: wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: true,
            })
        });
        assert!(matches!(error, Some(wgpu::Error::Validation { .. })), "{error:?}");

        let (_buffer, error) = validated(&device, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("aligned"),
                size: 16,
                usage: wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        assert!(error.is_none(), "{error:?}");
    }
}
