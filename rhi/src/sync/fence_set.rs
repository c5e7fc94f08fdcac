//! One fence per hardware queue class.

use std::sync::Arc;

use crate::device::Device;
use crate::error::RhiError;
use crate::types::HardwareQueueClass;

use super::fence::Fence;

/// A [`Fence`] for each [`HardwareQueueClass`].
#[derive(Debug)]
pub struct FenceSet {
    device: Arc<Device>,
    fences: [Arc<Fence>; HardwareQueueClass::COUNT],
}

impl FenceSet {
    /// Create a fence for every queue class.
    pub fn new(device: Arc<Device>) -> Result<Self, RhiError> {
        let fences = Self::create_fences(&device)?;
        Ok(Self { device, fences })
    }

    fn create_fences(device: &Device) -> Result<[Arc<Fence>; HardwareQueueClass::COUNT], RhiError> {
        Ok([
            Arc::new(Fence::new(device)?),
            Arc::new(Fence::new(device)?),
            Arc::new(Fence::new(device)?),
        ])
    }

    /// Fence of a queue class.
    pub fn fence(&self, queue: HardwareQueueClass) -> &Arc<Fence> {
        &self.fences[queue.index()]
    }

    /// Every fence, indexed by [`HardwareQueueClass::index`].
    pub fn fences(&self) -> &[Arc<Fence>] {
        &self.fences
    }

    /// Block until every fence reaches its pending value.
    pub fn wait(&self) -> Result<(), RhiError> {
        for fence in &self.fences {
            fence.wait_on_cpu()?;
        }
        Ok(())
    }

    /// Replace every fence with a fresh one at value zero. Call only while
    /// the device is idle.
    pub fn reset(&mut self) -> Result<(), RhiError> {
        log::debug!("FenceSet: reset");
        self.fences = Self::create_fences(&self.device)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{BackendType, DeviceParameters};

    #[test]
    fn test_fence_per_queue() {
        let device = Device::new(DeviceParameters::new().with_backend(BackendType::Dummy)).unwrap();
        let mut set = FenceSet::new(device).unwrap();
        assert_eq!(set.fences().len(), HardwareQueueClass::COUNT);

        let copy = set.fence(HardwareQueueClass::Copy);
        let value = copy.increment();
        assert_eq!(set.fence(HardwareQueueClass::Graphics).pending_value(), 0);

        copy.signal_from_cpu_value(value).unwrap();
        set.wait().unwrap();

        set.reset().unwrap();
        assert_eq!(set.fence(HardwareQueueClass::Copy).pending_value(), 0);
    }
}
