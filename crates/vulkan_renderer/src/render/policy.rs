//! Injectable renderer policies
//!
//! Applications can replace the built-in choice for device suitability,
//! device features, surface format, present mode and command recording.
//! Every entry is a [`Strategy`]; unset entries fall back to the built-ins
//! when the renderer is constructed, so nothing is looked up per frame.

use ash::vk;

use super::frame::{clear_only, FrameTarget, RecordFn};
use super::vulkan::swapchain::SwapchainPreferences;
use super::vulkan::{DeviceCandidate, VulkanResult};

/// Decides whether a device that meets the hard requirements may be used
pub type DeviceSuitabilityFn = Box<dyn Fn(&DeviceCandidate<'_>) -> bool>;

/// Adjusts the features requested from the logical device
pub type DeviceFeaturesFn = Box<dyn Fn(&mut vk::PhysicalDeviceFeatures)>;

/// Accepts or rejects a surface format
pub type SurfaceFormatFn = Box<dyn Fn(&vk::SurfaceFormatKHR) -> bool>;

/// Accepts or rejects a present mode
pub type PresentModeFn = Box<dyn Fn(vk::PresentModeKHR) -> bool>;

/// Either the built-in behaviour or a replacement
pub enum Strategy<T> {
    /// Use the renderer's built-in behaviour
    UseDefault,
    /// Use the supplied value instead
    Override(T),
}

impl<T> Default for Strategy<T> {
    fn default() -> Self {
        Self::UseDefault
    }
}

impl<T> Strategy<T> {
    /// The override, or the default built by `default`
    pub fn resolve(self, default: impl FnOnce() -> T) -> T {
        match self {
            Self::UseDefault => default(),
            Self::Override(value) => value,
        }
    }

    /// Whether a replacement was supplied
    pub fn is_override(&self) -> bool {
        matches!(self, Self::Override(_))
    }
}

impl<T> std::fmt::Debug for Strategy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseDefault => f.write_str("UseDefault"),
            Self::Override(_) => f.write_str("Override(..)"),
        }
    }
}

/// Built-in device policy: any device meeting the hard requirements
pub fn default_device_suitability(_candidate: &DeviceCandidate<'_>) -> bool {
    true
}

/// Built-in feature policy: keep the renderer's minimum feature set
pub fn default_device_features(_features: &mut vk::PhysicalDeviceFeatures) {}

/// Built-in format policy: 8-bit sRGB with the sRGB non-linear colour space
pub fn default_surface_format(format: &vk::SurfaceFormatKHR) -> bool {
    matches!(format.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB)
        && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
}

/// Built-in present mode policy: mailbox when available
pub fn default_present_mode(mode: vk::PresentModeKHR) -> bool {
    mode == vk::PresentModeKHR::MAILBOX
}

/// Policy overrides handed to [`Renderer::new`](super::renderer::Renderer::new)
#[derive(Default)]
pub struct RendererPolicies {
    /// Device suitability predicate
    pub device_suitability: Strategy<DeviceSuitabilityFn>,
    /// Device feature selection
    pub device_features: Strategy<DeviceFeaturesFn>,
    /// Surface format predicate
    pub surface_format: Strategy<SurfaceFormatFn>,
    /// Present mode predicate
    pub present_mode: Strategy<PresentModeFn>,
    /// Per-frame command recording
    pub record: Strategy<RecordFn>,
}

impl RendererPolicies {
    /// All built-in policies
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept devices the predicate approves
    pub fn with_device_suitability(mut self, predicate: impl Fn(&DeviceCandidate<'_>) -> bool + 'static) -> Self {
        self.device_suitability = Strategy::Override(Box::new(predicate));
        self
    }

    /// Adjust the requested device features
    pub fn with_device_features(mut self, configure: impl Fn(&mut vk::PhysicalDeviceFeatures) + 'static) -> Self {
        self.device_features = Strategy::Override(Box::new(configure));
        self
    }

    /// Prefer surface formats the predicate accepts
    pub fn with_surface_format(mut self, predicate: impl Fn(&vk::SurfaceFormatKHR) -> bool + 'static) -> Self {
        self.surface_format = Strategy::Override(Box::new(predicate));
        self
    }

    /// Prefer present modes the predicate accepts
    pub fn with_present_mode(mut self, predicate: impl Fn(vk::PresentModeKHR) -> bool + 'static) -> Self {
        self.present_mode = Strategy::Override(Box::new(predicate));
        self
    }

    /// Record each frame with `record` instead of the clear-only pass
    pub fn with_record(mut self, record: impl FnMut(&FrameTarget<'_>) -> VulkanResult<()> + 'static) -> Self {
        self.record = Strategy::Override(Box::new(record));
        self
    }

    /// Fill every unset entry with its built-in
    pub fn resolve(self) -> ResolvedPolicies {
        let overrides = [
            ("device suitability", self.device_suitability.is_override()),
            ("device features", self.device_features.is_override()),
            ("surface format", self.surface_format.is_override()),
            ("present mode", self.present_mode.is_override()),
            ("record", self.record.is_override()),
        ];
        for (name, _) in overrides.iter().filter(|(_, overridden)| *overridden) {
            log::debug!("Using custom {} policy", name);
        }

        ResolvedPolicies {
            device_suitability: self
                .device_suitability
                .resolve(|| Box::new(default_device_suitability)),
            device_features: self.device_features.resolve(|| Box::new(default_device_features)),
            surface_format: self.surface_format.resolve(|| Box::new(default_surface_format)),
            present_mode: self.present_mode.resolve(|| Box::new(default_present_mode)),
            record: self.record.resolve(|| Box::new(clear_only)),
        }
    }
}

/// Policies with every entry filled in
pub struct ResolvedPolicies {
    device_suitability: DeviceSuitabilityFn,
    device_features: DeviceFeaturesFn,
    surface_format: SurfaceFormatFn,
    present_mode: PresentModeFn,
    record: RecordFn,
}

impl ResolvedPolicies {
    /// Device suitability predicate
    pub fn device_suitability(&self) -> &dyn Fn(&DeviceCandidate<'_>) -> bool {
        &*self.device_suitability
    }

    /// Device feature selection
    pub fn device_features(&self) -> &dyn Fn(&mut vk::PhysicalDeviceFeatures) {
        &*self.device_features
    }

    /// Format and present mode predicates for swapchain creation
    pub fn swapchain_preferences(&self) -> SwapchainPreferences<'_> {
        SwapchainPreferences {
            surface_format: &*self.surface_format,
            present_mode: &*self.present_mode,
        }
    }

    /// Run the recording policy for one frame
    pub fn record(&mut self, target: &FrameTarget<'_>) -> VulkanResult<()> {
        (self.record)(target)
    }
}

impl std::fmt::Debug for ResolvedPolicies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedPolicies").finish_non_exhaustive()
    }
}
