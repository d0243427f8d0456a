//! SPIR-V shader modules and the graphics pipeline
//!
//! The pipeline layout is owned separately from the pipeline: it only
//! depends on the descriptor layout and exists even when no shaders were
//! configured, so recording callbacks can always bind descriptor sets.

use ash::{vk, Device};
use std::ffi::CStr;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use super::context::{VulkanError, VulkanResult};

fn entry_point() -> &'static CStr {
    // SAFETY: literal is nul-terminated with no interior nul
    unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") }
}

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    ///
    /// The bytes are copied into an aligned word buffer, so any slice whose
    /// length is a multiple of four is accepted.
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| VulkanError::ShaderLoad {
            path: "<memory>".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_words(device, &code)
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let shader_error = |reason: String| VulkanError::ShaderLoad {
            path: path.display().to_string(),
            reason,
        };

        let mut file = File::open(path).map_err(|e| shader_error(e.to_string()))?;
        let code = ash::util::read_spv(&mut file).map_err(|e| shader_error(e.to_string()))?;

        log::debug!("Loaded {} SPIR-V words from {}", code.len(), path.display());
        Self::from_words(device, &code)
    }

    fn from_words(device: Device, code: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "shader module", result })?;

        Ok(Self { device, module })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description using the `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(entry_point())
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout over the given descriptor set layouts and push constant ranges
    pub fn new(
        device: Device,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "pipeline layout", result })?;

        Ok(Self { device, layout })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Build the default pipeline: vertices come from the shader, triangle list,
    /// dynamic viewport and scissor, depth test and write with `LESS`, no blending
    pub fn new_default(
        device: Device,
        render_pass: vk::RenderPass,
        layout: &PipelineLayout,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
    ) -> VulkanResult<Self> {
        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // The projection flips Y, so winding is not culled
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) }
            .map_err(|(_, result)| VulkanError::ResourceCreation { resource: "graphics pipeline", result })?;

        let pipeline = pipelines.into_iter().next().ok_or(VulkanError::InvalidOperation {
            reason: "driver returned no pipeline".to_string(),
        })?;

        log::debug!("Created graphics pipeline");
        Ok(Self { device, pipeline })
    }

    /// Load both stages from SPIR-V files and build the default pipeline
    pub fn from_files(
        device: &Device,
        render_pass: vk::RenderPass,
        layout: &PipelineLayout,
        vertex_path: &str,
        fragment_path: &str,
    ) -> VulkanResult<Self> {
        let vertex_shader = ShaderModule::from_file(device.clone(), vertex_path)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), fragment_path)?;

        // Modules may be destroyed once the pipeline exists
        Self::new_default(device.clone(), render_pass, layout, &vertex_shader, &fragment_shader)
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_name() {
        assert_eq!(entry_point().to_str().unwrap(), "main");
    }

    #[test]
    fn test_spirv_words_are_read_little_endian() {
        let truncated = [0u8; 6];
        assert!(ash::util::read_spv(&mut Cursor::new(&truncated[..])).is_err());

        let mut header = 0x0723_0203u32.to_le_bytes().to_vec();
        header.extend_from_slice(&[0u8; 4]);
        let words = ash::util::read_spv(&mut Cursor::new(&header[..])).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0]);
    }
}
