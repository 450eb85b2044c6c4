use crate::device::{BindingSlot, DeviceContext, Handle, Scoped};
use crate::error::Result;

use super::GpuBuffer;

/// One storage buffer exposed to the kernel at set 0, binding 0.
///
/// The pool is sized for exactly this one set; the set is freed when the pool
/// is reset on release.
pub struct BindingSet<'d> {
    // Field order is release order.
    pool: Scoped<'d>,
    layout: Scoped<'d>,

    set: Handle,
    slots: Vec<BindingSlot>,
}

impl<'d> BindingSet<'d> {
    /// Binding index the kernel reads and writes the result through.
    pub const RESULT_BINDING: u32 = 0;

    /// Layout, pool and set for `buffer` bound read-write over `0..size`.
    pub fn storage_buffer(ctx: &DeviceContext<'d>, buffer: &GpuBuffer<'d>) -> Result<Self> {
        let driver = ctx.driver();
        let slots = vec![BindingSlot {
            binding: Self::RESULT_BINDING,
            read_only: false,
        }];

        let layout = Scoped::new(driver, driver.create_binding_layout(ctx.device(), &slots)?);
        let pool = Scoped::new(driver, driver.create_binding_pool(ctx.device(), 1, 1)?);
        let set = driver.allocate_binding_set(pool.handle(), layout.handle())?;
        driver.write_binding(set, Self::RESULT_BINDING, buffer.handle(), 0..buffer.size())?;
        log::debug!("binding set {set:?} exposes {:?} at binding 0", buffer.handle());

        Ok(Self {
            pool,
            layout,
            set,
            slots,
        })
    }

    #[inline]
    pub fn set(&self) -> Handle {
        self.set
    }

    #[inline]
    pub fn layout(&self) -> Handle {
        self.layout.handle()
    }

    #[inline]
    pub fn pool(&self) -> Handle {
        self.pool.handle()
    }

    #[inline]
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }
}
