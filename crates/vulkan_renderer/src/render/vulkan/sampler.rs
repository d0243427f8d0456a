//! Texture samplers

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// Enough mip levels for an 8k texture
pub const DEFAULT_MAX_LOD: f32 = 14.0;

/// Sampler settings, defaulting to trilinear repeat sampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerBuilder {
    /// Min and mag filter
    pub filter: vk::Filter,
    /// Filter between mip levels
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Addressing on all three axes
    pub address_mode: vk::SamplerAddressMode,
    /// `None` disables anisotropic filtering
    pub max_anisotropy: Option<f32>,
    /// Highest mip level sampled
    pub max_lod: f32,
    /// Border for clamp-to-border addressing
    pub border_color: vk::BorderColor,
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
            max_lod: DEFAULT_MAX_LOD,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        }
    }
}

impl SamplerBuilder {
    /// Default settings with anisotropy at the device maximum
    pub fn for_device(properties: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            max_anisotropy: Some(properties.limits.max_sampler_anisotropy),
            ..Self::default()
        }
    }

    /// Fill the Vulkan create info for these settings
    pub fn create_info(&self) -> vk::SamplerCreateInfo {
        vk::SamplerCreateInfo::builder()
            .mag_filter(self.filter)
            .min_filter(self.filter)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .anisotropy_enable(self.max_anisotropy.is_some())
            .max_anisotropy(self.max_anisotropy.unwrap_or(1.0))
            .border_color(self.border_color)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(self.mipmap_mode)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(self.max_lod)
            .build()
    }

    /// Create the sampler
    pub fn build(&self, device: Device) -> VulkanResult<Sampler> {
        let sampler = unsafe { device.create_sampler(&self.create_info(), None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "sampler", result })?;

        log::debug!("Created sampler (anisotropy: {:?})", self.max_anisotropy);
        Ok(Sampler { device, sampler })
    }
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_device_sampler_uses_max_anisotropy() {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.limits.max_sampler_anisotropy = 16.0;

        let info = SamplerBuilder::for_device(&properties).create_info();
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_relative_eq!(info.max_anisotropy, 16.0);
        assert_relative_eq!(info.max_lod, DEFAULT_MAX_LOD);
    }

    #[test]
    fn test_default_sampler_settings() {
        let info = SamplerBuilder::default().create_info();
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
        assert_eq!(info.compare_enable, vk::FALSE);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_relative_eq!(info.min_lod, 0.0);
    }
}
