use crate::error::{JobError, Result};

use super::caps::{MemoryProperties, MemoryType};

/// Size and compatible memory types reported for a resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRequirements {
    /// Allocation size in bytes; may exceed the requested resource size.
    pub size: u64,
    /// Bit `i` set means memory type `i` can back the resource.
    pub type_bits: u32,
}

/// First-fit memory type lookup.
///
/// Returns the lowest index `i` such that bit `i` of `type_bits` is set and
/// `types[i]` has every flag in `required`. No capacity awareness and no
/// relaxation of `required` on failure.
pub fn find_memory_type(
    type_bits: u32,
    required: MemoryProperties,
    types: &[MemoryType],
) -> Result<u32> {
    types
        .iter()
        .enumerate()
        .take(32)
        .find(|(i, ty)| type_bits & (1u32 << *i) != 0 && ty.flags.contains(required))
        .map(|(i, _)| i as u32)
        .ok_or(JobError::NoSuitableMemoryType { type_bits, required })
}
