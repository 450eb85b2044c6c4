//! Recording driver for tests.
//!
//! Tracks every object it hands out together with the objects it depends on,
//! and panics when an object is released twice or before its dependents.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;

use crate::error::{JobError, Result};
use crate::pipeline::KernelBytecode;

use super::caps::{
    AdapterCaps, BufferUsage, DeviceClass, MemoryProperties, MemoryType, QueueFamily, QueueFlags,
};
use super::driver::{BindingSlot, BufferDesc, Command, ComputeDriver, Handle, HandleKind};
use super::memory::MemoryRequirements;

const DL: MemoryProperties = MemoryProperties::DEVICE_LOCAL;
const HV: MemoryProperties = MemoryProperties::HOST_VISIBLE;
const HC: MemoryProperties = MemoryProperties::HOST_COHERENT;

/// Allocation granularity reported by `buffer_requirements`.
pub(crate) const MOCK_ALIGNMENT: u64 = 256;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Create(Handle),
    Destroy(Handle),
    ResetPool(Handle),
    Record(Handle, Vec<Command>),
    Submit { commands: Handle, fence: Handle },
    Wait(Handle),
    Map { memory: Handle, len: u64 },
}

/// A non-creation call the mock can be told to fail.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Fault {
    Record,
    Submit,
    Wait,
    /// `create_compute_pipeline` rejects the kernel interface.
    PipelineInterface,
}

#[derive(Default)]
struct State {
    next_id: u32,
    events: Vec<Event>,
    /// Live objects and the objects each one depends on.
    live: HashMap<Handle, Vec<Handle>>,
    buffers: HashMap<Handle, BufferDesc>,
    memory_types: HashMap<Handle, u32>,
    memory_sizes: HashMap<Handle, u64>,
    recorded: Vec<Handle>,
    pending_fences: Vec<Handle>,
    signaled_fences: Vec<Handle>,
    sets_in_pool: HashMap<Handle, Vec<Handle>>,
    /// Adapter the device was opened on.
    adapter: usize,
}

pub(crate) struct MockDriver {
    adapters: Vec<AdapterCaps>,
    texels: Vec<f32>,
    fail_on: Option<HandleKind>,
    fault: Option<Fault>,
    state: RefCell<State>,
}

/// Discrete adapter with a compute family and three memory types:
/// `[DEVICE_LOCAL, HOST_VISIBLE|HOST_COHERENT, DEVICE_LOCAL|HOST_VISIBLE|HOST_COHERENT]`.
pub(crate) fn discrete_adapter(name: &str) -> AdapterCaps {
    AdapterCaps {
        name: name.into(),
        backend: "Mock".into(),
        class: DeviceClass::Discrete,
        queue_families: vec![QueueFamily {
            flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            queue_count: 1,
        }],
        memory_types: vec![
            MemoryType { flags: DL },
            MemoryType { flags: HV | HC },
            MemoryType { flags: DL | HV | HC },
        ],
        max_workgroups_per_dimension: 65_535,
    }
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self::with_adapters(vec![discrete_adapter("mock gpu")])
    }

    pub(crate) fn with_adapters(adapters: Vec<AdapterCaps>) -> Self {
        Self {
            adapters,
            texels: Vec::new(),
            fail_on: None,
            fault: None,
            state: RefCell::new(State::default()),
        }
    }

    /// Float data served for every mapped region (zero-padded).
    pub(crate) fn with_texels(mut self, texels: Vec<f32>) -> Self {
        self.texels = texels;
        self
    }

    /// Makes the creation of objects of `kind` fail.
    pub(crate) fn failing_on(mut self, kind: HandleKind) -> Self {
        self.fail_on = Some(kind);
        self
    }

    pub(crate) fn faulting(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub(crate) fn created(&self) -> Vec<Handle> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Create(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn destroyed(&self) -> Vec<Handle> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Destroy(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn submissions(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Submit { .. }))
            .count()
    }

    pub(crate) fn recorded_sequences(&self) -> Vec<Vec<Command>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Record(_, seq) => Some(seq),
                _ => None,
            })
            .collect()
    }

    /// Sizes passed to `allocate_memory`, in allocation order.
    pub(crate) fn allocation_sizes(&self) -> Vec<u64> {
        let st = self.state.borrow();
        self.created()
            .into_iter()
            .filter_map(|h| st.memory_sizes.get(&h).copied())
            .collect()
    }

    pub(crate) fn buffer_desc(&self, buffer: Handle) -> Option<BufferDesc> {
        self.state.borrow().buffers.get(&buffer).cloned()
    }

    /// Objects still alive (sets are owned by their pool and excluded).
    pub(crate) fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    fn create(&self, kind: HandleKind, deps: &[Handle]) -> Result<Handle> {
        if self.fail_on == Some(kind) {
            return Err(JobError::resource(format!("mock refused to create {kind:?}")));
        }
        let mut st = self.state.borrow_mut();
        for dep in deps {
            assert!(st.live.contains_key(dep), "{kind:?} created from dead {dep:?}");
        }
        st.next_id += 1;
        let handle = Handle::new(kind, st.next_id);
        st.live.insert(handle, deps.to_vec());
        if kind != HandleKind::BindingSet {
            st.events.push(Event::Create(handle));
        }
        Ok(handle)
    }

    fn add_dependency(&self, object: Handle, dep: Handle) {
        let mut st = self.state.borrow_mut();
        assert!(st.live.contains_key(&dep), "{object:?} references dead {dep:?}");
        st.live.entry(object).or_default().push(dep);
    }
}

impl ComputeDriver for MockDriver {
    fn create_instance(&self) -> Result<Handle> {
        self.create(HandleKind::Instance, &[])
    }

    fn enumerate_adapters(&self, _instance: Handle) -> Result<Vec<AdapterCaps>> {
        Ok(self.adapters.clone())
    }

    fn create_device(&self, instance: Handle, adapter: usize, queue_family: u32) -> Result<Handle> {
        assert!(adapter < self.adapters.len());
        assert!(
            self.adapters[adapter]
                .queue_families
                .get(queue_family as usize)
                .is_some_and(|f| f.flags.contains(QueueFlags::COMPUTE))
        );
        let device = self.create(HandleKind::Device, &[instance])?;
        self.state.borrow_mut().adapter = adapter;
        Ok(device)
    }

    fn create_buffer(&self, device: Handle, desc: &BufferDesc) -> Result<Handle> {
        let handle = self.create(HandleKind::Buffer, &[device])?;
        self.state.borrow_mut().buffers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn buffer_requirements(&self, buffer: Handle) -> Result<MemoryRequirements> {
        let st = self.state.borrow();
        let desc = st
            .buffers
            .get(&buffer)
            .ok_or_else(|| JobError::resource("unknown buffer"))?;
        let type_bits = if desc.usage.contains(BufferUsage::STORAGE) { 0b101 } else { 0b111 };
        Ok(MemoryRequirements {
            size: desc.size.div_ceil(MOCK_ALIGNMENT) * MOCK_ALIGNMENT,
            type_bits,
        })
    }

    fn allocate_memory(&self, device: Handle, size: u64, memory_type: u32) -> Result<Handle> {
        let handle = self.create(HandleKind::Memory, &[device])?;
        let mut st = self.state.borrow_mut();
        st.memory_types.insert(handle, memory_type);
        st.memory_sizes.insert(handle, size);
        Ok(handle)
    }

    fn bind_buffer_memory(&self, buffer: Handle, memory: Handle, offset: u64) -> Result<()> {
        assert_eq!(offset, 0);
        let st = self.state.borrow();
        assert!(st.live.contains_key(&buffer) && st.live.contains_key(&memory));
        Ok(())
    }

    fn map_memory(
        &self,
        memory: Handle,
        offset: u64,
        len: u64,
        read: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        {
            let mut st = self.state.borrow_mut();
            assert!(st.live.contains_key(&memory), "mapping dead {memory:?}");
            assert!(st.pending_fences.is_empty(), "mapping memory with device work in flight");
            let ty = st.memory_types[&memory];
            assert!(self.adapters[st.adapter].memory_types[ty as usize].flags.contains(HV));
            st.events.push(Event::Map { memory, len });
        }
        let mut bytes: Vec<u8> = bytemuck::cast_slice(&self.texels).to_vec();
        bytes.resize((offset + len) as usize, 0);
        read(&bytes[offset as usize..]);
        Ok(())
    }

    fn create_binding_layout(&self, device: Handle, slots: &[BindingSlot]) -> Result<Handle> {
        assert!(!slots.is_empty());
        self.create(HandleKind::BindingLayout, &[device])
    }

    fn create_binding_pool(
        &self,
        device: Handle,
        max_sets: u32,
        storage_buffers: u32,
    ) -> Result<Handle> {
        assert_eq!((max_sets, storage_buffers), (1, 1));
        self.create(HandleKind::BindingPool, &[device])
    }

    fn allocate_binding_set(&self, pool: Handle, layout: Handle) -> Result<Handle> {
        let set = self.create(HandleKind::BindingSet, &[pool, layout])?;
        let mut st = self.state.borrow_mut();
        let sets = st.sets_in_pool.entry(pool).or_default();
        assert!(sets.is_empty(), "pool sized for one set");
        sets.push(set);
        Ok(set)
    }

    fn write_binding(
        &self,
        set: Handle,
        binding: u32,
        buffer: Handle,
        range: Range<u64>,
    ) -> Result<()> {
        assert_eq!(binding, 0);
        assert!(range.start < range.end);
        self.add_dependency(set, buffer);
        Ok(())
    }

    fn create_kernel_module(&self, device: Handle, _bytecode: &KernelBytecode) -> Result<Handle> {
        self.create(HandleKind::KernelModule, &[device])
    }

    fn create_pipeline_layout(&self, device: Handle, binding_layouts: &[Handle]) -> Result<Handle> {
        let mut deps = vec![device];
        deps.extend_from_slice(binding_layouts);
        self.create(HandleKind::PipelineLayout, &deps)
    }

    fn create_compute_pipeline(&self, layout: Handle, module: Handle, entry: &str) -> Result<Handle> {
        assert_eq!(entry, "main");
        if self.fault == Some(Fault::PipelineInterface) {
            return Err(JobError::BindingMismatch(
                "kernel declares binding 1, layout only has binding 0".into(),
            ));
        }
        self.create(HandleKind::Pipeline, &[layout, module])
    }

    fn create_command_pool(&self, device: Handle, _queue_family: u32) -> Result<Handle> {
        self.create(HandleKind::CommandPool, &[device])
    }

    fn allocate_command_buffer(&self, pool: Handle) -> Result<Handle> {
        self.create(HandleKind::CommandBuffer, &[pool])
    }

    fn record(&self, commands: Handle, sequence: &[Command]) -> Result<()> {
        if self.fault == Some(Fault::Record) {
            return Err(JobError::submission("mock refused to record"));
        }
        {
            let mut st = self.state.borrow_mut();
            assert!(!st.recorded.contains(&commands), "command buffer recorded twice");
            st.recorded.push(commands);
            st.events.push(Event::Record(commands, sequence.to_vec()));
        }
        for cmd in sequence {
            match *cmd {
                Command::BindPipeline(p) => self.add_dependency(commands, p),
                Command::BindSet { set, .. } => self.add_dependency(commands, set),
                Command::CopyBuffer { src, dst, .. } => {
                    self.add_dependency(commands, src);
                    self.add_dependency(commands, dst);
                }
                Command::Dispatch(_) => {}
            }
        }
        Ok(())
    }

    fn create_fence(&self, device: Handle) -> Result<Handle> {
        self.create(HandleKind::Fence, &[device])
    }

    fn submit(&self, commands: Handle, fence: Handle) -> Result<()> {
        if self.fault == Some(Fault::Submit) {
            return Err(JobError::submission("queue rejected the submission"));
        }
        let mut st = self.state.borrow_mut();
        assert!(st.recorded.contains(&commands), "submitting unrecorded commands");
        assert!(!st.signaled_fences.contains(&fence) && !st.pending_fences.contains(&fence));
        st.pending_fences.push(fence);
        st.events.push(Event::Submit { commands, fence });
        Ok(())
    }

    fn wait_fence(&self, fence: Handle) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let pos = st
            .pending_fences
            .iter()
            .position(|f| *f == fence)
            .ok_or_else(|| JobError::FenceWait("fence was never submitted".into()))?;
        if self.fault == Some(Fault::Wait) {
            return Err(JobError::FenceWait("device lost".into()));
        }
        st.pending_fences.remove(pos);
        st.signaled_fences.push(fence);
        st.events.push(Event::Wait(fence));
        Ok(())
    }

    fn reset_binding_pool(&self, pool: Handle) {
        let mut st = self.state.borrow_mut();
        let sets = st.sets_in_pool.remove(&pool).unwrap_or_default();
        for set in sets {
            st.live.remove(&set);
        }
        st.events.push(Event::ResetPool(pool));
    }

    fn destroy(&self, handle: Handle) {
        let mut st = self.state.borrow_mut();
        assert!(st.live.contains_key(&handle), "{handle:?} released twice");
        let dependents: Vec<Handle> = st
            .live
            .iter()
            .filter(|(_, deps)| deps.contains(&handle))
            .map(|(h, _)| *h)
            .collect();
        assert!(dependents.is_empty(), "{handle:?} released before {dependents:?}");
        st.live.remove(&handle);
        st.events.push(Event::Destroy(handle));
    }
}
