// Vulkan instance - process-wide connection to the driver
//
// Responsibilities:
// - Validation layer check (debug builds)
// - Instance extension check
// - Debug messenger forwarding driver messages to the log

use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::error::{RendererError, Result, VkResultExt};

const VALIDATION_LAYERS: [&CStr; 1] = [c"VK_LAYER_KHRONOS_validation"];

const ENGINE_NAME: &CStr = c"BrickEngine";

/// Oldest Vulkan version the renderer accepts, for instances and devices alike
pub const API_VERSION_FLOOR: u32 = vk::API_VERSION_1_1;

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owns the Vulkan entry, instance and (when validating) the debug messenger
pub struct InstanceContext {
    debug: Option<DebugMessenger>,
    pub instance: ash::Instance,
    pub entry: Entry,
    validation: bool,
}

impl InstanceContext {
    /// Create the instance after checking every required layer and extension
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `required_extensions` - Instance extensions the caller depends on
    /// * `enable_validation` - Enable validation layers and the debug messenger
    pub fn new(
        app_name: &str,
        required_extensions: &[&CStr],
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let mut extensions: Vec<&CStr> = required_extensions.to_vec();
        let mut layers: Vec<&CStr> = Vec::new();

        if enable_validation {
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .call("vkEnumerateInstanceLayerProperties")?;
            let available: Vec<&CStr> = available
                .iter()
                .filter_map(|layer| layer.layer_name_as_c_str().ok())
                .collect();

            if let Some(missing) = find_missing(&VALIDATION_LAYERS, &available).first() {
                return Err(RendererError::MissingLayer(missing.to_string_lossy().into_owned()));
            }

            layers.extend_from_slice(&VALIDATION_LAYERS);
            extensions.push(ash::ext::debug_utils::NAME);
        }

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .call("vkEnumerateInstanceExtensionProperties")?;
        let available: Vec<&CStr> = available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();

        if let Some(missing) = find_missing(&extensions, &available).first() {
            return Err(RendererError::MissingInstanceExtension(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let app_name = CString::new(app_name).unwrap_or_else(|_| CString::from(c"BrickEngine Application"));
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(API_VERSION_FLOOR);

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }.call("vkCreateInstance")?;

        let debug = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug) => Some(debug),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Instance ready ({} extension(s), validation {})",
            extensions.len(),
            if enable_validation { "on" } else { "off" }
        );

        Ok(Arc::new(Self {
            debug,
            instance,
            entry,
            validation: enable_validation,
        }))
    }

    fn setup_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .call("vkCreateDebugUtilsMessengerEXT")?;

        Ok(DebugMessenger { loader, messenger })
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Entries of `required` that are absent from `available`, in request order
pub fn find_missing<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

/// Route a driver message to the matching log level
fn forward_message(severity: vk::DebugUtilsMessageSeverityFlagsEXT, message: &str) {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("[Vulkan] {}", message),
        _ => log::trace!("[Vulkan] {}", message),
    }
}

// May run on driver-internal threads; must never unwind into the driver.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    let _ = std::panic::catch_unwind(|| forward_message(message_severity, &message));

    vk::FALSE
}
