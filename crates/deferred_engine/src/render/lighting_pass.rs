//! Deferred lighting pass
//!
//! Samples the G-buffer and draws one procedurally generated fullscreen quad per
//! point light, blending each draw additively into the swapchain image. Nothing
//! here survives a swapchain rebuild: framebuffers wrap swapchain views and the
//! descriptor sets point at G-buffer views, so the whole pass is recreated.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::foundation::logging::RenderLog;
use crate::foundation::math::Vec3;

use super::geometry_pass::GBuffer;
use super::scene::PointLight;
use super::vulkan::commands::{full_scissor, full_viewport};
use super::vulkan::context::report_idle_failure;
use super::vulkan::{
    BlendMode, CommandRecorder, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter,
    DeviceContext, Framebuffer, GraphicsPipeline, PipelineBuilder, PipelineLayout, RenderPass, ShaderSet, Swapchain,
    UniformBuffer, VulkanError, VulkanResult,
};

/// Light block read by the lighting fragment shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingUniform {
    /// Camera world position; `w` is zero
    pub camera_position: [f32; 4],
}

impl LightingUniform {
    /// Block for a camera at `position`
    pub fn new(position: Vec3) -> Self {
        Self {
            camera_position: [position.x, position.y, position.z, 0.0],
        }
    }
}

/// Size of the per-light push constant
pub const LIGHT_PUSH_CONSTANT_SIZE: u32 = 32;

/// Vertices of the fullscreen quad generated in the vertex shader
pub const FULLSCREEN_VERTEX_COUNT: u32 = 6;

/// First of the position, normal, albedo and material sampler bindings
pub const FIRST_GBUFFER_BINDING: u32 = 1;

/// Binding of the light uniform
pub const LIGHT_UNIFORM_BINDING: u32 = 5;

/// Push constant range holding one [`PointLight`]
pub fn push_constant_ranges() -> [vk::PushConstantRange; 1] {
    [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: LIGHT_PUSH_CONSTANT_SIZE,
    }]
}

/// G-buffer samplers at bindings 1 to 4, light uniform at 5
pub fn descriptor_layout() -> DescriptorSetLayoutBuilder {
    (0..4)
        .fold(DescriptorSetLayout::builder(), |builder, i| {
            builder.binding(
                FIRST_GBUFFER_BINDING + i,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
        })
        .binding(
            LIGHT_UNIFORM_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT,
        )
}

/// Clear value for the swapchain image
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 1] {
    [vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }]
}

/// The lighting pass for one swapchain generation.
///
/// Field order is drop order.
pub struct LightingPass {
    pipeline: GraphicsPipeline,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    pipeline_layout: PipelineLayout,
    descriptor_sets: Vec<vk::DescriptorSet>,
    descriptor_pool: DescriptorPool,
    uniforms: Vec<UniformBuffer<LightingUniform>>,
    set_layout: DescriptorSetLayout,
    clear_color: [f32; 4],
    extent: vk::Extent2D,
    log: RenderLog,
    device: Device,
}

impl LightingPass {
    /// Build the pass over `swapchain`, reading `gbuffer`, with one descriptor set per frame slot
    pub fn new(
        context: &DeviceContext,
        shaders: &ShaderSet,
        swapchain: &Swapchain,
        gbuffer: &GBuffer,
        frames: usize,
        clear_color: [f32; 4],
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let extent = swapchain.extent();

        let set_layout = descriptor_layout().build(device.clone())?;
        let frame_count = u32::try_from(frames).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{frames} frame slots"),
        })?;
        let mut descriptor_pool = DescriptorPool::for_layout(device.clone(), &set_layout, frame_count)?;
        let descriptor_sets = descriptor_pool.allocate(&set_layout, frame_count)?;

        let initial = LightingUniform::zeroed();
        let uniforms = (0..frames)
            .map(|_| UniformBuffer::new(context, &initial))
            .collect::<VulkanResult<Vec<_>>>()?;

        let gbuffer_infos = gbuffer.descriptor_infos();
        for (set, uniform) in descriptor_sets.iter().zip(&uniforms) {
            let writer = (0u32..)
                .zip(gbuffer_infos.iter())
                .fold(DescriptorWriter::new(), |writer, (i, info)| {
                    writer.combined_image_sampler(FIRST_GBUFFER_BINDING + i, *info)
                })
                .uniform_buffer(LIGHT_UNIFORM_BINDING, uniform.descriptor_info());
            writer.write(&device, *set);
        }

        let pipeline_layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &push_constant_ranges())?;
        let render_pass = RenderPass::present(device.clone(), swapchain.format().format)?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(device.clone(), &render_pass, &[view], extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        // no depth attachment in this pass; the quad comes from the vertex shader
        let pipeline = PipelineBuilder::new(&shaders.lighting_vertex, &shaders.lighting_fragment)
            .blend(BlendMode::Additive)
            .depth(false, false, vk::CompareOp::ALWAYS)
            .build(&device, &render_pass, &pipeline_layout)?;

        Ok(Self {
            pipeline,
            framebuffers,
            render_pass,
            pipeline_layout,
            descriptor_sets,
            descriptor_pool,
            uniforms,
            set_layout,
            clear_color,
            extent,
            log: context.log().clone(),
            device,
        })
    }

    /// Write the camera position for frame slot `slot`
    pub fn update_camera(&mut self, slot: usize, position: Vec3) -> VulkanResult<()> {
        let uniform = self.uniforms.get_mut(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("frame slot {slot} out of range"),
        })?;
        uniform.update(&LightingUniform::new(position))
    }

    /// Record the pass into `recorder` for swapchain image `image_index`; returns the number of draws.
    ///
    /// With no lights the pass still runs and leaves the clear color.
    pub fn record(
        &self,
        recorder: &mut CommandRecorder,
        slot: usize,
        image_index: u32,
        lights: &[PointLight],
    ) -> VulkanResult<u32> {
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("swapchain image {image_index} has no framebuffer"),
            })?;
        let descriptor_set = *self
            .descriptor_sets
            .get(slot)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("frame slot {slot} out of range"),
            })?;

        let clears = clear_values(self.clear_color);
        let mut pass = recorder.begin_render_pass(
            self.render_pass.handle(),
            framebuffer.handle(),
            full_scissor(self.extent),
            &clears,
            vk::SubpassContents::INLINE,
        )?;
        pass.set_viewport(full_viewport(self.extent));
        pass.set_scissor(full_scissor(self.extent));
        pass.bind_pipeline(self.pipeline.handle());
        pass.bind_descriptor_sets(self.pipeline_layout.handle(), &[descriptor_set]);

        let mut draws = 0;
        for light in lights {
            let pushed = light.to_push_constant();
            pass.push_constants(
                self.pipeline_layout.handle(),
                vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&pushed),
            );
            pass.draw(FULLSCREEN_VERTEX_COUNT, 1, 0, 0);
            draws += 1;
        }
        drop(pass);

        Ok(draws)
    }

    /// Extent of the swapchain the pass was built for
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of swapchain framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Background color
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }
}

impl Drop for LightingPass {
    fn drop(&mut self) {
        // sets go back with the pool; nothing may still be reading them
        report_idle_failure(&self.log, "lighting pass", unsafe { self.device.device_wait_idle() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_layout_bindings() {
        let builder = descriptor_layout();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 5);
        for (i, binding) in bindings[..4].iter().enumerate() {
            assert_eq!(binding.binding, i as u32 + 1);
            assert_eq!(binding.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        }
        assert_eq!(bindings[4].binding, 5);
        assert_eq!(bindings[4].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert!(bindings.iter().all(|b| b.stage_flags == vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_push_constant_matches_point_light() {
        let [range] = push_constant_ranges();
        assert_eq!(range.size as usize, std::mem::size_of::<PointLight>());
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_clear_value_uses_background_color() {
        let [value] = clear_values([0.1, 0.2, 0.3, 1.0]);
        assert_eq!(unsafe { value.color.float32 }, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_lighting_uniform_w_is_zero() {
        let uniform = LightingUniform::new(Vec3::new(3.0, -4.0, 5.0));
        assert_eq!(uniform.camera_position, [3.0, -4.0, 5.0, 0.0]);
        assert_eq!(std::mem::size_of::<LightingUniform>(), 16);
    }

    #[test]
    fn test_additive_blend_accumulates_lights() {
        let state = BlendMode::Additive.attachment_state();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
    }
}
