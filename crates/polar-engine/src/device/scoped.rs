use super::driver::{ComputeDriver, Handle, HandleKind};

/// Release guard for one driver object.
///
/// Dropping the guard releases the object. Binding pools are reset before
/// they are destroyed. Guards declared later in a scope drop first, so a
/// run that creates objects in dependency order tears them down in strict
/// reverse order on every exit path.
pub struct Scoped<'d> {
    driver: &'d dyn ComputeDriver,
    handle: Handle,
}

impl<'d> Scoped<'d> {
    #[inline]
    pub fn new(driver: &'d dyn ComputeDriver, handle: Handle) -> Self {
        log::trace!("acquired {handle:?}");
        Self { driver, handle }
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn driver(&self) -> &'d dyn ComputeDriver {
        self.driver
    }
}

impl Drop for Scoped<'_> {
    fn drop(&mut self) {
        if self.handle.kind() == HandleKind::BindingPool {
            self.driver.reset_binding_pool(self.handle);
        }
        log::trace!("releasing {:?}", self.handle);
        self.driver.destroy(self.handle);
    }
}
