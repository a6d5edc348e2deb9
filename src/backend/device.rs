// Logical device - the application's handle to the selected GPU
//
// Responsibilities:
// - One queue-create request per distinct queue family
// - Required extensions + feature flags
// - Graphics/present queue retrieval
// - Memory allocator setup
//
// Every device child holds an `Arc<LogicalDevice>`, so the device is only
// destroyed once all of them are gone.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use super::selector::{DeviceRequirements, PhysicalDeviceDescriptor, QueueFamilyAssignment};
use super::InstanceContext;
use crate::error::{Result, VkResultExt};

static QUEUE_PRIORITIES: [f32; 1] = [1.0];

/// Logical device wrapper with automatic cleanup
pub struct LogicalDevice {
    // Order matters for drop: allocator before device
    allocator: Mutex<Option<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    instance: Arc<InstanceContext>,
}

/// Queue-create requests for every distinct family in `queues`
pub fn queue_create_infos(queues: &QueueFamilyAssignment) -> Vec<vk::DeviceQueueCreateInfo<'static>> {
    queues
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&QUEUE_PRIORITIES)
        })
        .collect()
}

impl LogicalDevice {
    /// Create the logical device for an already selected GPU
    ///
    /// # Arguments
    /// * `instance` - Instance the physical device was enumerated from
    /// * `physical` - Selected device snapshot
    /// * `queues` - Graphics/present family assignment from selection
    /// * `required_extensions` - Device extensions to enable
    pub fn new(
        instance: &Arc<InstanceContext>,
        physical: &PhysicalDeviceDescriptor,
        queues: QueueFamilyAssignment,
        required_extensions: &[&CStr],
    ) -> Result<Arc<Self>> {
        log::info!("Creating logical device on {}", physical.name);

        let queue_infos = queue_create_infos(&queues);
        let extensions: Vec<*const c_char> = required_extensions.iter().map(|e| e.as_ptr()).collect();
        let features = DeviceRequirements::features();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical.handle, &create_info, None)
        }
        .call("vkCreateDevice")?;

        let graphics_queue = unsafe { device.get_device_queue(queues.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queues.present, 0) };

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device: physical.handle,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        log::info!(
            "Logical device ready ({} queue famil{})",
            queue_infos.len(),
            if queue_infos.len() == 1 { "y" } else { "ies" }
        );

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device: physical.handle,
            graphics_queue,
            present_queue,
            instance: Arc::clone(instance),
        }))
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    /// Exclusive access to the memory allocator
    pub fn allocator(&self) -> MutexGuard<'_, Option<Allocator>> {
        self.allocator.lock()
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Block until all submitted work has completed
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.call("vkDeviceWaitIdle")
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::info!("Destroying logical device...");

        if let Err(e) = self.wait_idle() {
            log::error!("Device did not go idle before teardown: {}", e);
        }

        // Frees the allocator's memory blocks while the device is alive
        self.allocator.lock().take();

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn families(infos: &[vk::DeviceQueueCreateInfo<'_>]) -> Vec<u32> {
        infos.iter().map(|info| info.queue_family_index).collect()
    }

    #[test]
    fn shared_family_gets_one_request() {
        let infos = queue_create_infos(&QueueFamilyAssignment { graphics: 0, present: 0 });
        assert_eq!(families(&infos), vec![0]);
        assert_eq!(infos[0].queue_count, 1);
    }

    #[test]
    fn split_families_get_one_request_each() {
        let infos = queue_create_infos(&QueueFamilyAssignment { graphics: 2, present: 1 });
        assert_eq!(families(&infos), vec![2, 1]);
        assert!(infos.iter().all(|info| info.queue_count == 1));
    }

    #[test]
    fn requests_use_maximal_priority() {
        let infos = queue_create_infos(&QueueFamilyAssignment { graphics: 0, present: 1 });
        for info in &infos {
            let priorities =
                unsafe { std::slice::from_raw_parts(info.p_queue_priorities, info.queue_count as usize) };
            assert_eq!(priorities, &[1.0f32]);
        }
    }
}
