use crate::error::Result;

use super::caps::{AdapterCaps, ClassRequirement};
use super::driver::{ComputeDriver, Handle};
use super::scoped::Scoped;
use super::select::{select_adapter, AdapterSelection};

/// Instance, selected adapter and logical device for one run.
///
/// Every other GPU object is created through this context and borrows it, so
/// the borrow checker keeps the device alive until they are all released.
pub struct DeviceContext<'d> {
    // Field order is release order: device before instance.
    device: Scoped<'d>,
    _instance: Scoped<'d>,

    driver: &'d dyn ComputeDriver,
    adapter: AdapterCaps,
    selection: AdapterSelection,
}

impl<'d> DeviceContext<'d> {
    /// Creates the instance, selects an adapter and opens its compute queue.
    pub fn open(driver: &'d dyn ComputeDriver, class: ClassRequirement) -> Result<Self> {
        let instance = Scoped::new(driver, driver.create_instance()?);

        let adapters = driver.enumerate_adapters(instance.handle())?;
        log::debug!("enumerated {} adapter(s)", adapters.len());
        for (i, caps) in adapters.iter().enumerate() {
            log::debug!("  [{i}] {} ({:?}, {})", caps.name, caps.class, caps.backend);
        }

        let selection = select_adapter(&adapters, class)?;
        let adapter = adapters[selection.adapter].clone();
        log::info!(
            "selected adapter '{}' ({:?}, {}), compute queue family {}",
            adapter.name,
            adapter.class,
            adapter.backend,
            selection.queue_family
        );

        let device = Scoped::new(
            driver,
            driver.create_device(instance.handle(), selection.adapter, selection.queue_family)?,
        );

        Ok(Self {
            device,
            _instance: instance,
            driver,
            adapter,
            selection,
        })
    }

    #[inline]
    pub fn driver(&self) -> &'d dyn ComputeDriver {
        self.driver
    }

    #[inline]
    pub fn device(&self) -> Handle {
        self.device.handle()
    }

    /// Capability record of the selected adapter.
    #[inline]
    pub fn adapter(&self) -> &AdapterCaps {
        &self.adapter
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.selection.queue_family
    }
}
