//! Vulkan context management
//!
//! Instance creation with optional validation, physical device selection and
//! logical device creation. Everything downstream is created from the
//! [`LogicalDevice`] built here and lives no longer than it.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};
use thiserror::Error;

use super::surface::Surface;
use crate::config::{ConfigError, RendererConfig};
use crate::render::window::PresentationWindow;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// The Vulkan loader library could not be loaded
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// Instance creation failed
    #[error("Instance creation failed: {0:?}")]
    InstanceCreation(vk::Result),

    /// Validation was requested but the Khronos layer is not installed
    #[error("Validation layers requested but not available")]
    ValidationLayersUnavailable,

    /// The window layer could not create a surface
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// No physical device met the requirements and the suitability policy
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Logical device creation failed
    #[error("Logical device creation failed: {0:?}")]
    DeviceCreation(vk::Result),

    /// Swapchain creation failed
    #[error("Swapchain creation failed: {0:?}")]
    SwapchainCreation(vk::Result),

    /// Any other object creation failed
    #[error("Failed to create {resource}: {result:?}")]
    ResourceCreation {
        /// What was being created
        resource: &'static str,
        /// The Vulkan result code
        result: vk::Result,
    },

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// None of the candidate depth formats supports depth attachments
    #[error("No supported depth format")]
    NoSupportedDepthFormat,

    /// Descriptor set allocation failed
    #[error("Descriptor set allocation failed: {0:?}")]
    DescriptorAllocation(vk::Result),

    /// A SPIR-V file could not be read or parsed
    #[error("Failed to load shader {path}: {reason}")]
    ShaderLoad {
        /// Path of the shader file
        path: String,
        /// Description of the failure
        reason: String,
    },

    /// Swapchain image acquisition failed with an unexpected code
    #[error("Failed to acquire swapchain image: {0:?}")]
    AcquireFailed(vk::Result),

    /// Queue submission failed
    #[error("Failed to submit draw command buffer: {0:?}")]
    SubmitFailed(vk::Result),

    /// Presentation failed with an unexpected code
    #[error("Failed to present swapchain image: {0:?}")]
    PresentFailed(vk::Result),

    /// The recording callback reported a failure
    #[error("Command recording failed: {0}")]
    Recording(String),

    /// `init` was called while the window has no drawable area
    #[error("Window framebuffer is {width}x{height}; cannot create a swapchain")]
    WindowMinimized {
        /// Framebuffer width in pixels
        width: u32,
        /// Framebuffer height in pixels
        height: u32,
    },

    /// An operation needing GPU objects was called before `init`
    #[error("Renderer is not initialized")]
    NotInitialized,

    /// A frame slot index outside `[0, frames_in_flight)`
    #[error("Frame index {index} out of range for {frames} frames in flight")]
    InvalidFrameIndex {
        /// The offending index
        index: usize,
        /// Number of frame slots
        frames: usize,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Device extensions every candidate must support
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [SwapchainLoader::name()]
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("String contains an interior NUL byte: {value:?}"),
    })
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, with validation and a debug messenger when enabled
    pub fn new(window: &dyn PresentationWindow, config: &RendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| VulkanError::Loading(e.to_string()))?;
        let enable_validation = config.validation_enabled();

        if enable_validation && !Self::validation_layer_available(&entry)? {
            return Err(VulkanError::ValidationLayersUnavailable);
        }

        let app_name = to_cstring(&config.application_name)?;
        let engine_name = to_cstring(&config.engine_name)?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let window_extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::SurfaceCreation(e.to_string()))?;
        let window_extensions = window_extensions
            .iter()
            .map(|ext| to_cstring(ext))
            .collect::<VulkanResult<Vec<_>>>()?;

        let mut extensions: Vec<*const c_char> = window_extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_names = if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
            vec![to_cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layers: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        // Chained so instance creation and destruction themselves are covered
        let mut instance_debug_info = debug_messenger_info();
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if enable_validation {
            create_info = create_info.push_next(&mut instance_debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(VulkanError::InstanceCreation)?;

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match unsafe { debug_utils.create_debug_utils_messenger(&debug_messenger_info(), None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(result) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(VulkanError::ResourceCreation { resource: "debug messenger", result });
                }
            }
        } else {
            None
        };

        log::debug!(
            "Created Vulkan instance for '{}' (validation: {})",
            config.application_name,
            enable_validation
        );

        Ok(Self { entry, instance, debug })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry.enumerate_instance_layer_properties().map_err(VulkanError::Api)?;
        Ok(layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name.to_bytes() == VALIDATION_LAYER.as_bytes()
        }))
    }

    /// Vulkan entry point
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Whether validation layers were enabled on this instance
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Destroyed Vulkan instance");
    }
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::trace!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// What a device-suitability policy gets to look at
pub struct DeviceCandidate<'a> {
    /// Instance, for any further queries the policy wants to make
    pub instance: &'a Instance,
    /// The physical device under consideration
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: &'a vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: &'a vk::PhysicalDeviceFeatures,
}

impl DeviceCandidate<'_> {
    /// Human readable device name
    pub fn name(&self) -> String {
        device_name(self.properties)
    }

    /// Whether this is a discrete GPU
    pub fn is_discrete(&self) -> bool {
        self.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Why a physical device was passed over
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceRejection {
    /// No graphics family, or no family able to present to the surface
    #[error("missing graphics or present queue family")]
    MissingQueueFamilies,
    /// Required device extensions are absent
    #[error("missing device extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    /// The surface reports no formats or no present modes for this device
    #[error("surface reports no formats or present modes")]
    InadequateSwapchainSupport,
    /// The injected suitability policy said no
    #[error("rejected by device suitability policy")]
    RejectedByPolicy,
}

/// Queue family indices found on a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics: Option<u32>,
    /// First family able to present to the surface
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan families in order, stopping once both roles are filled
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> VulkanResult<bool>,
    ) -> VulkanResult<Self> {
        let mut indices = Self::default();

        for (index, family) in (0u32..).zip(families) {
            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }
            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    /// Both roles have a family
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }
}

/// Names of `required` extensions absent from `available`
pub fn missing_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|required| {
            !available
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == **required)
        })
        .map(|required| required.to_string_lossy().into_owned())
        .collect()
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first device meeting every requirement and the suitability policy
    pub fn select(
        instance: &Instance,
        surface: &Surface,
        suitability: &dyn Fn(&DeviceCandidate<'_>) -> bool,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;

        for device in devices {
            match Self::evaluate(instance, device, surface, suitability)? {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(rejection) => {
                    let properties = unsafe { instance.get_physical_device_properties(device) };
                    log::debug!("Skipping GPU {}: {}", device_name(&properties), rejection);
                }
            }
        }

        Err(VulkanError::NoSuitableDevice)
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &Surface,
        suitability: &dyn Fn(&DeviceCandidate<'_>) -> bool,
    ) -> VulkanResult<Result<Self, DeviceRejection>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let indices = QueueFamilyIndices::find(&queue_families, |index| surface.supports_present(device, index))?;
        let (Some(graphics_family), Some(present_family)) = (indices.graphics, indices.present) else {
            return Ok(Err(DeviceRejection::MissingQueueFamilies));
        };

        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.map_err(VulkanError::Api)?;
        let missing = missing_extensions(&extensions, &required_device_extensions());
        if !missing.is_empty() {
            return Ok(Err(DeviceRejection::MissingExtensions(missing)));
        }

        if !surface.support(device)?.is_adequate() {
            return Ok(Err(DeviceRejection::InadequateSwapchainSupport));
        }

        let candidate = DeviceCandidate {
            instance,
            device,
            properties: &properties,
            features: &features,
        };
        if !suitability(&candidate) {
            return Ok(Err(DeviceRejection::RejectedByPolicy));
        }

        Ok(Ok(Self {
            device,
            properties,
            features,
            graphics_family,
            present_family,
        }))
    }

    /// Human readable device name
    pub fn name(&self) -> String {
        device_name(&self.properties)
    }

    /// Whether graphics and present use separate queue families
    pub fn has_separate_present_family(&self) -> bool {
        self.graphics_family != self.present_family
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the logical device with one queue per unique family
    ///
    /// Feature selection starts from the built-in minimum (anisotropic
    /// sampling) and is then handed to `configure_features`.
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        configure_features: &dyn Fn(&mut vk::PhysicalDeviceFeatures),
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let unique_families: HashSet<u32> =
            [physical_device.graphics_family, physical_device.present_family].into_iter().collect();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> =
            required_device_extensions().iter().map(|ext| ext.as_ptr()).collect();

        let mut features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        configure_features(&mut features);

        // Device layers are deprecated but older loaders still read them
        let layer_names = if enable_validation {
            vec![to_cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layers: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device.device, &create_info, None) }
            .map_err(VulkanError::DeviceCreation)?;

        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        log::debug!(
            "Created logical device (graphics family {}, present family {})",
            physical_device.graphics_family,
            physical_device.present_family
        );

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }

    /// Device function table
    pub fn handle(&self) -> &Device {
        &self.device
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::Api)
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        log::debug!("Destroyed logical device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (slot, byte) in props.extension_name.iter_mut().zip(name.bytes()) {
            *slot = byte as c_char;
        }
        props
    }

    #[test]
    fn test_queue_families_shared() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn test_queue_families_split() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 2)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
    }

    #[test]
    fn test_queue_family_search_takes_first_match_and_stops() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut queried = Vec::new();
        let indices = QueueFamilyIndices::find(&families, |index| {
            queried.push(index);
            Ok(true)
        })
        .unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn test_queue_families_incomplete_without_present() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_queue_family_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)));
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))));
    }

    #[test]
    fn test_missing_extensions() {
        let available = [extension("VK_KHR_maintenance1"), extension("VK_KHR_swapchain")];
        assert!(missing_extensions(&available, &required_device_extensions()).is_empty());

        let available = [extension("VK_KHR_maintenance1")];
        assert_eq!(
            missing_extensions(&available, &required_device_extensions()),
            vec!["VK_KHR_swapchain".to_string()]
        );
    }

    #[test]
    fn test_error_messages() {
        let err = VulkanError::InvalidFrameIndex { index: 3, frames: 2 };
        assert_eq!(err.to_string(), "Frame index 3 out of range for 2 frames in flight");

        let err = VulkanError::ResourceCreation {
            resource: "sampler",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        };
        assert!(err.to_string().contains("sampler"));
    }
}
