use crate::error::{JobError, Result};

use super::caps::{AdapterCaps, ClassRequirement};

/// Adapter chosen for the job.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AdapterSelection {
    /// Index into the enumerated adapter list.
    pub adapter: usize,
    /// First queue family of that adapter that supports compute.
    pub queue_family: u32,
}

/// Returns the compute queue family of `caps` if the adapter qualifies.
#[inline]
pub fn compatible_queue_family(caps: &AdapterCaps, class: ClassRequirement) -> Option<u32> {
    if !class.accepts(caps.class) {
        return None;
    }
    caps.compute_queue_family()
}

/// Picks the first adapter that has a compute queue family and matches `class`.
///
/// Pure filter over the enumeration order. Two runs over the same list always
/// pick the same adapter.
pub fn select_adapter(adapters: &[AdapterCaps], class: ClassRequirement) -> Result<AdapterSelection> {
    if adapters.is_empty() {
        return Err(JobError::NoAdapters);
    }

    adapters
        .iter()
        .enumerate()
        .find_map(|(adapter, caps)| {
            compatible_queue_family(caps, class)
                .map(|queue_family| AdapterSelection { adapter, queue_family })
        })
        .ok_or(JobError::NoCompatibleDevice {
            inspected: adapters.len(),
        })
}
