//! Graphics pipeline construction
//!
//! [`PipelineBuilder`] collects the handful of settings that differ between the
//! geometry and lighting pipelines; everything else (triangle lists, back-face
//! culling with clockwise front faces, depth LESS_OR_EQUAL, dynamic viewport and
//! scissor) is shared.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};
use super::render_pass::RenderPass;
use super::shader::{ShaderCode, ShaderModule};
use super::vertex_layout::VertexLayout;

/// How fragment output combines with the attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Overwrite
    #[default]
    Opaque,
    /// Color accumulates (ONE + ONE); alpha uses SRC_ALPHA + DST_ALPHA
    Additive,
}

impl BlendMode {
    /// Attachment blend state for this mode
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        match self {
            Self::Opaque => vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::FALSE,
                color_write_mask: vk::ColorComponentFlags::RGBA,
                ..Default::default()
            },
            Self::Additive => vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::TRUE,
                src_color_blend_factor: vk::BlendFactor::ONE,
                dst_color_blend_factor: vk::BlendFactor::ONE,
                color_blend_op: vk::BlendOp::ADD,
                src_alpha_blend_factor: vk::BlendFactor::SRC_ALPHA,
                dst_alpha_blend_factor: vk::BlendFactor::DST_ALPHA,
                alpha_blend_op: vk::BlendOp::ADD,
                color_write_mask: vk::ColorComponentFlags::RGBA,
            },
        }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Layout over `set_layouts` with the given push constant ranges
    pub fn new(
        device: Device,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device, layout })
    }

    /// Get layout handle
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
    /// Get pipeline handle
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

/// Builder for the renderer's graphics pipelines
#[derive(Debug, Clone)]
pub struct PipelineBuilder<'a> {
    vertex_shader: &'a ShaderCode,
    fragment_shader: &'a ShaderCode,
    vertex_layout: Option<VertexLayout>,
    color_attachment_count: u32,
    blend: BlendMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
}

impl<'a> PipelineBuilder<'a> {
    /// Start from the shared defaults with the given shader pair
    pub fn new(vertex_shader: &'a ShaderCode, fragment_shader: &'a ShaderCode) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            vertex_layout: None,
            color_attachment_count: 1,
            blend: BlendMode::Opaque,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
        }
    }

    /// Read vertices with `layout`; without one the pipeline takes no vertex input
    #[must_use]
    pub fn vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = Some(layout);
        self
    }

    /// Number of color attachments written, all sharing one blend state
    #[must_use]
    pub fn color_attachments(mut self, count: u32) -> Self {
        self.color_attachment_count = count;
        self
    }

    /// Blend mode for every color attachment
    #[must_use]
    pub fn blend(mut self, mode: BlendMode) -> Self {
        self.blend = mode;
        self
    }

    /// Face culling
    #[must_use]
    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Winding treated as front-facing
    #[must_use]
    pub fn front_face(mut self, front_face: vk::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    /// Depth test, depth write and comparison
    #[must_use]
    pub fn depth(mut self, test: bool, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }

    /// Blend states for all color attachments
    pub fn blend_attachments(&self) -> Vec<vk::PipelineColorBlendAttachmentState> {
        vec![self.blend.attachment_state(); self.color_attachment_count as usize]
    }

    /// Create the pipeline for subpass 0 of `render_pass`
    pub fn build(&self, device: &Device, render_pass: &RenderPass, layout: &PipelineLayout) -> VulkanResult<GraphicsPipeline> {
        if self.color_attachment_count != render_pass.color_attachment_count() {
            return Err(VulkanError::PipelineCreation(format!(
                "pipeline writes {} color attachments but the render pass has {}",
                self.color_attachment_count,
                render_pass.color_attachment_count()
            )));
        }

        let vertex = ShaderModule::new(device.clone(), self.vertex_shader, vk::ShaderStageFlags::VERTEX)?;
        let fragment = ShaderModule::new(device.clone(), self.fragment_shader, vk::ShaderStageFlags::FRAGMENT)?;
        let stages = [vertex.stage_info(), fragment.stage_info()];

        let bindings: Vec<vk::VertexInputBindingDescription> =
            self.vertex_layout.iter().map(VertexLayout::binding_description).collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> = self
            .vertex_layout
            .iter()
            .flat_map(VertexLayout::attribute_descriptions)
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts matter here
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = self.blend_attachments();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(0)
            .build();

        let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) }
            .map_err(|(_, err)| VulkanError::PipelineCreation(format!("vkCreateGraphicsPipelines: {err:?}")))?;

        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::PipelineCreation("no pipeline returned".to_string()))?;

        Ok(GraphicsPipeline {
            device: device.clone(),
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_code() -> ShaderCode {
        let words = [crate::render::vulkan::shader::SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        ShaderCode::from_bytes(&bytes, "dummy.spv").unwrap()
    }

    #[test]
    fn test_opaque_blend_writes_rgba_without_blending() {
        let state = BlendMode::Opaque.attachment_state();
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_additive_blend_factors() {
        let state = BlendMode::Additive.attachment_state();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.alpha_blend_op, vk::BlendOp::ADD);
        assert_eq!(state.src_alpha_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(state.dst_alpha_blend_factor, vk::BlendFactor::DST_ALPHA);
    }

    #[test]
    fn test_builder_defaults_and_overrides() {
        let code = dummy_code();
        let builder = PipelineBuilder::new(&code, &code);
        assert_eq!(builder.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(builder.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(builder.depth_compare, vk::CompareOp::LESS_OR_EQUAL);
        assert!(builder.vertex_layout.is_none());

        let gbuffer = builder.color_attachments(4).vertex_layout(VertexLayout::standard());
        let attachments = gbuffer.blend_attachments();
        assert_eq!(attachments.len(), 4);
        assert!(attachments.iter().all(|a| a.blend_enable == vk::FALSE));
    }
}
