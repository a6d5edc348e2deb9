// Physical device selection
//
// Every GPU is snapshotted into a `PhysicalDeviceDescriptor`, then judged
// without further driver calls. The first acceptable discrete GPU wins;
// otherwise the last acceptable candidate does.

use ash::vk;
use std::ffi::CStr;

use super::{InstanceContext, PresentationSurface, API_VERSION_FLOOR};
use crate::error::{RendererError, Result, VkResultExt};

/// Preferred swapchain format when the surface offers it
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Immutable capability snapshot of one candidate GPU
#[derive(Debug, Clone)]
pub struct PhysicalDeviceDescriptor {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Present support per queue family, same indexing as `queue_families`
    pub present_support: Vec<bool>,
    pub extensions: Vec<String>,
    pub features: vk::PhysicalDeviceFeatures,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub surface_capabilities: vk::SurfaceCapabilitiesKHR,
}

/// Graphics and present queue family indices; equal when one family does both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyAssignment {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, graphics first
    pub fn unique_families(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.is_shared() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        }
    }
}

/// Surface format and present mode, fixed for the lifetime of the renderer
#[derive(Debug, Clone, Copy)]
pub struct SurfaceConfiguration {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

/// What a GPU must offer to be usable
#[derive(Debug, Clone)]
pub struct DeviceRequirements<'a> {
    pub extensions: &'a [&'a CStr],
    pub api_version: u32,
}

impl<'a> DeviceRequirements<'a> {
    pub fn new(extensions: &'a [&'a CStr]) -> Self {
        Self {
            extensions,
            api_version: API_VERSION_FLOOR,
        }
    }

    /// Feature flags enabled on the logical device
    pub fn features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true)
    }
}

/// Outcome of judging one descriptor
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub missing_extensions: Vec<String>,
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    pub surface_format: Option<vk::SurfaceFormatKHR>,
    pub present_mode: vk::PresentModeKHR,
    pub present_modes_available: bool,
    pub features_supported: bool,
    pub version_supported: bool,
}

impl Evaluation {
    pub fn is_acceptable(&self) -> bool {
        self.missing_extensions.is_empty()
            && self.graphics_family.is_some()
            && self.present_family.is_some()
            && self.surface_format.is_some()
            && self.present_modes_available
            && self.features_supported
            && self.version_supported
    }

    /// Rejected only because the surface offers no format or present mode
    fn lacks_surface_support(&self) -> bool {
        (self.surface_format.is_none() || !self.present_modes_available)
            && self.missing_extensions.is_empty()
            && self.graphics_family.is_some()
            && self.present_family.is_some()
            && self.features_supported
            && self.version_supported
    }

    fn rejection_reason(&self) -> String {
        let mut reasons = Vec::new();
        if !self.missing_extensions.is_empty() {
            reasons.push(format!("missing extensions {:?}", self.missing_extensions));
        }
        if self.graphics_family.is_none() {
            reasons.push("no graphics queue family".to_string());
        }
        if self.present_family.is_none() {
            reasons.push("no present queue family".to_string());
        }
        if self.surface_format.is_none() {
            reasons.push("no surface format".to_string());
        }
        if !self.present_modes_available {
            reasons.push("no present modes".to_string());
        }
        if !self.features_supported {
            reasons.push("missing sampler anisotropy".to_string());
        }
        if !self.version_supported {
            reasons.push("API version below floor".to_string());
        }
        reasons.join(", ")
    }
}

/// Result of selection
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub descriptor: PhysicalDeviceDescriptor,
    pub queues: QueueFamilyAssignment,
    pub surface: SurfaceConfiguration,
}

impl PhysicalDeviceDescriptor {
    /// Snapshot a GPU's capabilities relevant to `surface`
    pub fn query(
        instance: &InstanceContext,
        surface: &PresentationSurface,
        handle: vk::PhysicalDevice,
    ) -> Result<Self> {
        let instance_fn = &instance.instance;

        let properties = unsafe { instance_fn.get_physical_device_properties(handle) };
        let features = unsafe { instance_fn.get_physical_device_features(handle) };
        let queue_families = unsafe { instance_fn.get_physical_device_queue_family_properties(handle) };

        let extensions = unsafe { instance_fn.enumerate_device_extension_properties(handle) }
            .call("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        let present_support = (0..queue_families.len() as u32)
            .map(|family| surface.supports_present(handle, family))
            .collect::<Result<Vec<_>>>()?;

        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_string());

        Ok(Self {
            handle,
            name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            queue_families,
            present_support,
            extensions,
            features,
            surface_formats: surface.formats(handle)?,
            present_modes: surface.present_modes(handle)?,
            surface_capabilities: surface.capabilities(handle)?,
        })
    }

    pub fn evaluate(&self, requirements: &DeviceRequirements<'_>) -> Evaluation {
        let missing_extensions = requirements
            .extensions
            .iter()
            .map(|name| name.to_string_lossy())
            .filter(|name| !self.extensions.iter().any(|ext| ext == name))
            .map(|name| name.into_owned())
            .collect();

        let graphics_family = self
            .queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|index| index as u32);

        let present_family = self
            .present_support
            .iter()
            .take(self.queue_families.len())
            .position(|&supported| supported)
            .map(|index| index as u32);

        Evaluation {
            missing_extensions,
            graphics_family,
            present_family,
            surface_format: choose_surface_format(&self.surface_formats),
            present_mode: choose_present_mode(&self.present_modes),
            present_modes_available: !self.present_modes.is_empty(),
            features_supported: self.features.sampler_anisotropy == vk::TRUE,
            version_supported: meets_version_floor(self.api_version, requirements.api_version),
        }
    }

    pub fn is_discrete(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}

/// Preferred pair if offered (or if the surface has no preference), else the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_SURFACE_FORMAT);
        }
    }

    formats
        .iter()
        .copied()
        .find(|f| same_format(f, &PREFERRED_SURFACE_FORMAT))
        .or_else(|| formats.first().copied())
        .filter(|f| f.format != vk::Format::UNDEFINED)
}

pub fn same_format(a: &vk::SurfaceFormatKHR, b: &vk::SurfaceFormatKHR) -> bool {
    a.format == b.format && a.color_space == b.color_space
}

/// MAILBOX when available, FIFO otherwise (FIFO is always supported)
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Component-wise comparison of major, minor and patch against the floor
pub fn meets_version_floor(version: u32, floor: u32) -> bool {
    vk::api_version_major(version) >= vk::api_version_major(floor)
        && vk::api_version_minor(version) >= vk::api_version_minor(floor)
        && vk::api_version_patch(version) >= vk::api_version_patch(floor)
}

/// Pick a device from already-queried descriptors
pub fn select(
    candidates: Vec<PhysicalDeviceDescriptor>,
    requirements: &DeviceRequirements<'_>,
) -> Result<SelectedDevice> {
    if candidates.is_empty() {
        return Err(RendererError::NoPhysicalDevices);
    }

    let mut chosen = None;
    let mut only_surface_rejections = true;

    for descriptor in candidates {
        let evaluation = descriptor.evaluate(requirements);

        if !evaluation.is_acceptable() {
            only_surface_rejections &= evaluation.lacks_surface_support();
            log::debug!("Rejected GPU {}: {}", descriptor.name, evaluation.rejection_reason());
            continue;
        }

        let (Some(graphics), Some(present), Some(format)) = (
            evaluation.graphics_family,
            evaluation.present_family,
            evaluation.surface_format,
        ) else {
            continue;
        };

        let discrete = descriptor.is_discrete();
        chosen = Some(SelectedDevice {
            descriptor,
            queues: QueueFamilyAssignment { graphics, present },
            surface: SurfaceConfiguration {
                format,
                present_mode: evaluation.present_mode,
            },
        });

        if discrete {
            break;
        }
    }

    match chosen {
        Some(selected) => Ok(selected),
        None if only_surface_rejections => Err(RendererError::NoSurfaceFormats),
        None => Err(RendererError::NoSuitableDevice),
    }
}

/// Enumerate, snapshot and select a GPU able to present to `surface`
pub fn select_physical_device(
    instance: &InstanceContext,
    surface: &PresentationSurface,
    requirements: &DeviceRequirements<'_>,
) -> Result<SelectedDevice> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }
        .call("vkEnumeratePhysicalDevices")?;

    let candidates = devices
        .into_iter()
        .map(|device| PhysicalDeviceDescriptor::query(instance, surface, device))
        .collect::<Result<Vec<_>>>()?;

    let selected = select(candidates, requirements)?;

    let version = selected.descriptor.api_version;
    log::info!("Selected GPU: {} ({:?})", selected.descriptor.name, selected.descriptor.device_type);
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    );
    log::info!(
        "Queues: graphics={} present={}, format {:?}/{:?}, present mode {:?}",
        selected.queues.graphics,
        selected.queues.present,
        selected.surface.format.format,
        selected.surface.format.color_space,
        selected.surface.present_mode
    );
    let caps = &selected.descriptor.surface_capabilities;
    log::debug!(
        "Surface images: min {} max {} (0 = unbounded)",
        caps.min_image_count,
        caps.max_image_count
    );

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use pretty_assertions::assert_eq;

    const SWAPCHAIN: &CStr = c"VK_KHR_swapchain";

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    /// A GPU with one graphics+present family that satisfies every requirement
    fn descriptor(raw: u64, device_type: vk::PhysicalDeviceType) -> PhysicalDeviceDescriptor {
        PhysicalDeviceDescriptor {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{raw}"),
            device_type,
            api_version: vk::API_VERSION_1_3,
            queue_families: vec![family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)],
            present_support: vec![true],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            features: DeviceRequirements::features(),
            surface_formats: vec![PREFERRED_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            surface_capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                ..Default::default()
            },
        }
    }

    fn requirements() -> DeviceRequirements<'static> {
        const EXTENSIONS: &[&CStr] = &[SWAPCHAIN];
        DeviceRequirements::new(EXTENSIONS)
    }

    #[test]
    fn single_family_end_to_end() {
        let selected = select(
            vec![descriptor(1, vk::PhysicalDeviceType::INTEGRATED_GPU)],
            &requirements(),
        )
        .unwrap();

        assert_eq!(selected.queues, QueueFamilyAssignment { graphics: 0, present: 0 });
        assert_eq!(selected.queues.sharing_mode(), vk::SharingMode::EXCLUSIVE);
        assert!(same_format(&selected.surface.format, &PREFERRED_SURFACE_FORMAT));
        assert_eq!(selected.surface.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn only_acceptable_candidate_is_chosen_in_either_order() {
        let good = descriptor(1, vk::PhysicalDeviceType::INTEGRATED_GPU);
        let mut bad = descriptor(2, vk::PhysicalDeviceType::INTEGRATED_GPU);
        bad.extensions.clear();

        let forward = select(vec![good.clone(), bad.clone()], &requirements()).unwrap();
        let backward = select(vec![bad, good], &requirements()).unwrap();

        assert_eq!(forward.descriptor.handle, vk::PhysicalDevice::from_raw(1));
        assert_eq!(backward.descriptor.handle, vk::PhysicalDevice::from_raw(1));
    }

    #[test]
    fn discrete_gpu_short_circuits_selection() {
        let candidates = vec![
            descriptor(1, vk::PhysicalDeviceType::INTEGRATED_GPU),
            descriptor(2, vk::PhysicalDeviceType::DISCRETE_GPU),
            descriptor(3, vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];

        let selected = select(candidates, &requirements()).unwrap();
        assert_eq!(selected.descriptor.handle, vk::PhysicalDevice::from_raw(2));
    }

    #[test]
    fn last_acceptable_wins_without_discrete() {
        let candidates = vec![
            descriptor(1, vk::PhysicalDeviceType::INTEGRATED_GPU),
            descriptor(2, vk::PhysicalDeviceType::VIRTUAL_GPU),
            descriptor(3, vk::PhysicalDeviceType::CPU),
        ];

        let selected = select(candidates, &requirements()).unwrap();
        assert_eq!(selected.descriptor.handle, vk::PhysicalDevice::from_raw(3));
    }

    #[test]
    fn empty_enumeration_is_exhaustion() {
        assert!(matches!(
            select(Vec::new(), &requirements()),
            Err(RendererError::NoPhysicalDevices)
        ));
    }

    #[test]
    fn no_acceptable_candidate_fails() {
        let mut no_present = descriptor(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.present_support = vec![false];
        let mut no_anisotropy = descriptor(2, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_anisotropy.features.sampler_anisotropy = vk::FALSE;
        let mut old = descriptor(3, vk::PhysicalDeviceType::DISCRETE_GPU);
        old.api_version = vk::API_VERSION_1_0;
        let mut no_formats = descriptor(4, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_formats.surface_formats.clear();

        assert!(matches!(
            select(vec![no_present, no_anisotropy, old, no_formats], &requirements()),
            Err(RendererError::NoSuitableDevice)
        ));
    }

    #[test]
    fn surface_without_formats_or_modes_is_reported_as_such() {
        let mut no_formats = descriptor(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_formats.surface_formats.clear();
        let mut no_modes = descriptor(2, vk::PhysicalDeviceType::INTEGRATED_GPU);
        no_modes.present_modes.clear();

        assert!(!no_modes.evaluate(&requirements()).is_acceptable());
        assert!(matches!(
            select(vec![no_formats, no_modes], &requirements()),
            Err(RendererError::NoSurfaceFormats)
        ));
    }

    #[test]
    fn split_graphics_and_present_families() {
        let mut gpu = descriptor(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        gpu.queue_families = vec![
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        gpu.present_support = vec![false, false, true];

        let evaluation = gpu.evaluate(&requirements());
        assert_eq!(evaluation.graphics_family, Some(1));
        assert_eq!(evaluation.present_family, Some(2));

        let queues = QueueFamilyAssignment { graphics: 1, present: 2 };
        assert_eq!(queues.unique_families(), vec![1, 2]);
        assert_eq!(queues.sharing_mode(), vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn evaluation_lists_missing_extensions() {
        let mut gpu = descriptor(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        gpu.extensions = vec!["VK_KHR_maintenance1".to_string()];

        let evaluation = gpu.evaluate(&requirements());
        assert_eq!(evaluation.missing_extensions, vec!["VK_KHR_swapchain".to_string()]);
        assert!(!evaluation.is_acceptable());
    }

    #[test]
    fn surface_format_preference() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let undefined = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        let chosen = |formats: &[vk::SurfaceFormatKHR]| {
            choose_surface_format(formats).map(|f| (f.format, f.color_space))
        };
        let preferred = Some((PREFERRED_SURFACE_FORMAT.format, PREFERRED_SURFACE_FORMAT.color_space));

        assert_eq!(chosen(&[srgb, PREFERRED_SURFACE_FORMAT]), preferred);
        assert_eq!(chosen(&[srgb]), Some((srgb.format, srgb.color_space)));
        assert_eq!(chosen(&[undefined]), preferred);
        assert_eq!(chosen(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn version_floor_is_component_wise() {
        assert!(meets_version_floor(vk::API_VERSION_1_1, API_VERSION_FLOOR));
        assert!(meets_version_floor(vk::make_api_version(0, 1, 3, 250), API_VERSION_FLOOR));
        assert!(!meets_version_floor(vk::make_api_version(0, 1, 0, 300), API_VERSION_FLOOR));
    }
}
