//! Offscreen G-buffer pass
//!
//! Rasterizes every submitted instance into four color targets plus depth. Each
//! instance is recorded into its own secondary command buffer that inherits the
//! render pass and framebuffer; the frame's primary buffer then executes them.
//!
//! The pass is split along swapchain lifetime. [`GBuffer`] holds everything sized
//! to the swapchain extent and is rebuilt on resize. [`GeometryPass`] keeps the
//! descriptor layout, pool and per-slot camera uniforms alive across rebuilds, so
//! model descriptor sets stay valid when the window changes size.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::foundation::logging::RenderLog;
use crate::foundation::math::mat4_to_cols;

use super::camera::Camera;
use super::frame::SecondaryPool;
use super::model::{MaterialTextures, ModelStore};
use super::scene::ModelInstance;
use super::vulkan::commands::{full_scissor, full_viewport};
use super::vulkan::render_pass::offscreen_clear_values;
use super::vulkan::{
    CommandPool, CommandRecorder, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter,
    DeviceContext, Framebuffer, GraphicsPipeline, Image, ImageRole, PipelineBuilder, PipelineLayout, RenderPass,
    ShaderSet, UniformBuffer, VertexLayout, VulkanError, VulkanResult,
};

/// One color target of the G-buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GBufferTarget {
    /// World-space position
    Position,
    /// World-space normal
    Normal,
    /// Base color
    Albedo,
    /// Material parameters
    Material,
}

impl GBufferTarget {
    /// Targets in attachment order
    pub const ALL: [Self; 4] = [Self::Position, Self::Normal, Self::Albedo, Self::Material];

    /// Attachment slot of the target, matching [`GBufferTarget::ALL`]
    pub const fn index(self) -> usize {
        match self {
            Self::Position => 0,
            Self::Normal => 1,
            Self::Albedo => 2,
            Self::Material => 3,
        }
    }

    /// Storage format of the target
    pub const fn format(self) -> vk::Format {
        match self {
            Self::Albedo => vk::Format::R8G8B8A8_UNORM,
            Self::Position | Self::Normal | Self::Material => vk::Format::R16G16B16A16_SFLOAT,
        }
    }

    /// Formats of every target in attachment order
    pub fn formats() -> [vk::Format; 4] {
        Self::ALL.map(Self::format)
    }
}

/// Camera block read by the geometry vertex shader at binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    /// World-to-view, column major
    pub view: [f32; 16],
    /// View-to-clip, column major
    pub projection: [f32; 16],
}

impl CameraUniform {
    /// Matrices of `camera`
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            view: mat4_to_cols(&camera.view_matrix()),
            projection: mat4_to_cols(&camera.projection_matrix()),
        }
    }
}

/// Size of the per-draw model matrix push constant
pub const MODEL_PUSH_CONSTANT_SIZE: u32 = 64;

/// Binding of the camera uniform
pub const CAMERA_BINDING: u32 = 0;

/// First of the diffuse, normal and material sampler bindings
pub const FIRST_TEXTURE_BINDING: u32 = 1;

/// Push constant range holding the model matrix
pub fn push_constant_ranges() -> [vk::PushConstantRange; 1] {
    [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: MODEL_PUSH_CONSTANT_SIZE,
    }]
}

/// Per-model set: camera uniform, then diffuse, normal and material samplers
pub fn descriptor_layout() -> DescriptorSetLayoutBuilder {
    (0..3).fold(
        DescriptorSetLayout::builder().binding(
            CAMERA_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        ),
        |builder, i| {
            builder.binding(
                FIRST_TEXTURE_BINDING + i,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
        },
    )
}

/// Clear values for the four color targets and depth
pub fn clear_values() -> Vec<vk::ClearValue> {
    offscreen_clear_values(GBufferTarget::ALL.len())
}

/// Swapchain-sized attachments, render pass, framebuffer and pipeline.
///
/// Field order is drop order.
pub struct GBuffer {
    pipeline: GraphicsPipeline,
    framebuffer: Framebuffer,
    render_pass: RenderPass,
    colors: Vec<Image>,
    depth: Image,
    extent: vk::Extent2D,
}

impl GBuffer {
    /// Build every extent-dependent object of the pass
    pub fn new(
        context: &DeviceContext,
        pool: &CommandPool,
        shaders: &ShaderSet,
        layout: &PipelineLayout,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let samples = vk::SampleCountFlags::TYPE_1;
        let colors = GBufferTarget::ALL
            .iter()
            .map(|target| Image::attachment(context, pool, ImageRole::ColorAttachment, target.format(), extent, samples))
            .collect::<VulkanResult<Vec<_>>>()?;
        let depth = Image::attachment(context, pool, ImageRole::Depth, context.depth_format(), extent, samples)?;

        let render_pass = RenderPass::offscreen(context.raw_device(), &GBufferTarget::formats(), context.depth_format())?;

        let views: Vec<vk::ImageView> = colors
            .iter()
            .map(Image::view)
            .chain(std::iter::once(depth.view()))
            .collect();
        let framebuffer = Framebuffer::new(context.raw_device(), &render_pass, &views, extent)?;

        let pipeline = PipelineBuilder::new(&shaders.geometry_vertex, &shaders.geometry_fragment)
            .vertex_layout(VertexLayout::standard())
            .color_attachments(render_pass.color_attachment_count())
            .build(context.device(), &render_pass, layout)?;

        Ok(Self {
            pipeline,
            framebuffer,
            render_pass,
            colors,
            depth,
            extent,
        })
    }

    /// Color target `target`
    pub fn target(&self, target: GBufferTarget) -> &Image {
        &self.colors[target.index()]
    }

    /// Sampler descriptors for position, normal, albedo and material, in that order
    pub fn descriptor_infos(&self) -> Vec<vk::DescriptorImageInfo> {
        self.colors.iter().map(Image::descriptor_info).collect()
    }

    /// Depth attachment
    pub fn depth(&self) -> &Image {
        &self.depth
    }

    /// Render pass the pipeline was built for
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Size of every attachment
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// The geometry pass and the state that outlives swapchain rebuilds.
///
/// Field order is drop order: the G-buffer's pipeline goes before its layout.
pub struct GeometryPass {
    gbuffer: GBuffer,
    secondaries: Vec<SecondaryPool>,
    camera_uniforms: Vec<UniformBuffer<CameraUniform>>,
    pipeline_layout: PipelineLayout,
    descriptor_pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
    device: Device,
    log: RenderLog,
}

impl GeometryPass {
    /// Create the pass for `frames` slots and up to `max_models` models
    pub fn new(
        context: &DeviceContext,
        pool: &CommandPool,
        shaders: &ShaderSet,
        extent: vk::Extent2D,
        frames: usize,
        max_models: u32,
        log: &RenderLog,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let set_layout = descriptor_layout().build(device.clone())?;

        let frame_count = u32::try_from(frames).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{frames} frame slots"),
        })?;
        let max_sets = max_models.saturating_mul(frame_count);
        let descriptor_pool = DescriptorPool::for_layout(device.clone(), &set_layout, max_sets)?;

        let pipeline_layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &push_constant_ranges())?;

        let initial = CameraUniform::zeroed();
        let camera_uniforms = (0..frames)
            .map(|_| UniformBuffer::new(context, &initial))
            .collect::<VulkanResult<Vec<_>>>()?;

        let gbuffer = GBuffer::new(context, pool, shaders, &pipeline_layout, extent)?;
        log.debug(format_args!(
            "Geometry pass ready: {}x{}, {} descriptor sets for {} models",
            extent.width, extent.height, max_sets, max_models
        ));

        Ok(Self {
            gbuffer,
            secondaries: (0..frames).map(|_| SecondaryPool::new()).collect(),
            camera_uniforms,
            pipeline_layout,
            descriptor_pool,
            set_layout,
            device,
            log: log.clone(),
        })
    }

    /// Rebuild the G-buffer at `extent`. The device must be idle.
    pub fn recreate(
        &mut self,
        context: &DeviceContext,
        pool: &CommandPool,
        shaders: &ShaderSet,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        self.gbuffer = GBuffer::new(context, pool, shaders, &self.pipeline_layout, extent)?;
        Ok(())
    }

    /// Free every secondary command buffer. The device must be idle.
    pub fn release_secondaries(&mut self, pool: &CommandPool) {
        for secondaries in &mut self.secondaries {
            let buffers = secondaries.take();
            if !buffers.is_empty() {
                pool.free(&buffers);
            }
        }
    }

    /// Allocate and fill one descriptor set per frame slot for a model with `textures`
    pub fn allocate_model_sets(&mut self, textures: &MaterialTextures) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let count = u32::try_from(self.camera_uniforms.len()).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{} frame slots", self.camera_uniforms.len()),
        })?;
        let sets = self.descriptor_pool.allocate(&self.set_layout, count)?;

        for (set, uniform) in sets.iter().zip(&self.camera_uniforms) {
            let writer = (0u32..)
                .zip(textures.descriptor_infos())
                .fold(
                    DescriptorWriter::new().uniform_buffer(CAMERA_BINDING, uniform.descriptor_info()),
                    |writer, (i, info)| writer.combined_image_sampler(FIRST_TEXTURE_BINDING + i, info),
                );
            writer.write(&self.device, *set);
        }
        Ok(sets)
    }

    /// Return a model's sets to the pool. No pending frame may reference them.
    pub fn free_model_sets(&mut self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        self.descriptor_pool.free(sets)
    }

    /// Write the camera block of frame slot `slot`
    pub fn update_camera(&mut self, slot: usize, camera: &Camera) -> VulkanResult<()> {
        let uniform = self.camera_uniforms.get_mut(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("frame slot {slot} out of range"),
        })?;
        uniform.update(&CameraUniform::from_camera(camera))
    }

    /// Record the pass into `primary` for frame slot `slot`; returns the number of indexed draws.
    ///
    /// The secondary pool of the slot grows first if there are more instances than buffers.
    pub fn record(
        &mut self,
        pool: &CommandPool,
        primary: &mut CommandRecorder,
        slot: usize,
        instances: &[ModelInstance],
        models: &ModelStore,
    ) -> VulkanResult<u32> {
        debug_assert!(slot < self.secondaries.len(), "frame slot {slot} out of range");
        let secondaries = self.secondaries.get_mut(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("frame slot {slot} out of range"),
        })?;

        let added = secondaries.ensure(instances.len(), |count| pool.allocate_secondary(count))?;
        if added > 0 {
            self.log.debug(format_args!(
                "Frame slot {slot}: secondary command buffers grown to {}",
                secondaries.capacity()
            ));
        }

        let inheritance = vk::CommandBufferInheritanceInfo::builder()
            .render_pass(self.gbuffer.render_pass.handle())
            .subpass(0)
            .framebuffer(self.gbuffer.framebuffer.handle())
            .build();

        let mut draws = 0;
        let mut recorded = Vec::with_capacity(instances.len());
        for (instance, &command_buffer) in instances.iter().zip(secondaries.buffers()) {
            debug_assert!(models.contains(instance.model), "instance refers to a removed model");
            let Some(model) = models.get(instance.model) else {
                continue;
            };
            let Some(descriptor_set) = model.descriptor_set(slot) else {
                continue;
            };

            let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
            recorder.begin_secondary(&inheritance)?;
            recorder.set_viewport(full_viewport(self.gbuffer.extent));
            recorder.set_scissor(full_scissor(self.gbuffer.extent));
            recorder.bind_pipeline(self.gbuffer.pipeline.handle());
            recorder.bind_descriptor_sets(self.pipeline_layout.handle(), &[descriptor_set]);

            let mesh = model.mesh();
            recorder.bind_vertex_buffers(0, &[mesh.vertex_buffer()], &[0]);
            recorder.bind_index_buffer(mesh.index_buffer(), 0, vk::IndexType::UINT32);

            let transform = mat4_to_cols(&instance.world_matrix());
            recorder.push_constants(
                self.pipeline_layout.handle(),
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&transform),
            );

            for part in mesh.draw_ranges() {
                let vertex_offset = i32::try_from(part.vertex_base).map_err(|_| VulkanError::InvalidOperation {
                    reason: format!("vertex base {} exceeds a draw's vertex offset", part.vertex_base),
                })?;
                recorder.draw_indexed(part.index_count, 1, part.index_base, vertex_offset, 0);
                draws += 1;
            }
            recorded.push(recorder.end()?);
        }

        let clears = clear_values();
        let mut pass = primary.begin_render_pass(
            self.gbuffer.render_pass.handle(),
            self.gbuffer.framebuffer.handle(),
            full_scissor(self.gbuffer.extent),
            &clears,
            vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        )?;
        pass.execute_commands(&recorded);
        drop(pass);

        Ok(draws)
    }

    /// Secondary buffers owned by frame slot `slot`
    pub fn secondary_capacity(&self, slot: usize) -> usize {
        self.secondaries.get(slot).map_or(0, SecondaryPool::capacity)
    }

    /// Current G-buffer
    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    /// Descriptor sets allocated to models
    pub fn allocated_sets(&self) -> u32 {
        self.descriptor_pool.allocated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_index_matches_attachment_order() {
        for (slot, target) in GBufferTarget::ALL.into_iter().enumerate() {
            assert_eq!(target.index(), slot, "{target:?}");
        }
    }

    #[test]
    fn test_gbuffer_formats() {
        assert_eq!(
            GBufferTarget::formats(),
            [
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R8G8B8A8_UNORM,
                vk::Format::R16G16B16A16_SFLOAT,
            ]
        );
    }

    #[test]
    fn test_descriptor_layout_bindings() {
        let builder = descriptor_layout();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 4);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        for (i, binding) in bindings[1..].iter().enumerate() {
            assert_eq!(binding.binding, i as u32 + 1);
            assert_eq!(binding.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        }
    }

    #[test]
    fn test_push_constant_holds_one_matrix() {
        let [range] = push_constant_ranges();
        assert_eq!(range.size as usize, std::mem::size_of::<[f32; 16]>());
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(range.offset, 0);
    }

    #[test]
    fn test_clear_values_zero_colors_then_depth() {
        let values = clear_values();
        assert_eq!(values.len(), 5);
        unsafe {
            for value in &values[..4] {
                assert_eq!(value.color.float32, [0.0; 4]);
            }
            assert_eq!(values[4].depth_stencil.depth, 1.0);
            assert_eq!(values[4].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn test_camera_uniform_layout() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 128);
        let camera = Camera::default();
        let uniform = CameraUniform::from_camera(&camera);
        assert_eq!(uniform.view, mat4_to_cols(&camera.view_matrix()));
        assert_eq!(uniform.projection, mat4_to_cols(&camera.projection_matrix()));
    }
}
