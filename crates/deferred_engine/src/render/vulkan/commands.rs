//! Vulkan command buffer management
//!
//! [`CommandPool`] owns the pool and hands out primary and secondary buffers.
//! [`CommandRecorder`] wraps one buffer while it records, and
//! [`ActiveRenderPass`] ends its render pass instance when dropped.

use ash::{vk, Device};
use std::ops::{Deref, DerefMut};

use crate::foundation::logging::RenderLog;

use super::context::{report_idle_failure, VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
    log: RenderLog,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32, log: RenderLog) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool =
            unsafe { device.create_command_pool(&pool_create_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            device,
            command_pool,
            log,
        })
    }

    /// Allocate `count` buffers at `level`
    pub fn allocate(&self, level: vk::CommandBufferLevel, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(level)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)
    }

    /// Allocate primary command buffers
    pub fn allocate_primary(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        self.allocate(vk::CommandBufferLevel::PRIMARY, count)
    }

    /// Allocate secondary command buffers
    pub fn allocate_secondary(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        self.allocate(vk::CommandBufferLevel::SECONDARY, count)
    }

    /// Return buffers to the pool
    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.command_pool, command_buffers);
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Record with `record`, submit to `queue`, and block until it completes
    pub fn submit_single_time<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let command_buffer = self
            .allocate_primary(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("command buffer allocation returned nothing".into()))?;

        let result = self.record_and_submit(command_buffer, queue, record);
        self.free(&[command_buffer]);
        result
    }

    fn record_and_submit<F>(&self, command_buffer: vk::CommandBuffer, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&mut recorder)?;
        let command_buffer = recorder.end()?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device.queue_wait_idle(queue).map_err(VulkanError::Api)
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        report_idle_failure(&self.log, "command pool", unsafe { self.device.device_wait_idle() });
        unsafe { self.device.destroy_command_pool(self.command_pool, None) };
    }
}

/// Command buffer recorder
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Wrap a command buffer that is not yet recording
    pub fn new(command_buffer: vk::CommandBuffer, device: Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Begin recording a primary buffer
    pub fn begin(&mut self, usage: vk::CommandBufferUsageFlags) -> VulkanResult<&mut Self> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
        self.begin_with(&begin_info)
    }

    /// Begin recording a secondary buffer that continues the render pass in `inheritance`
    pub fn begin_secondary(&mut self, inheritance: &vk::CommandBufferInheritanceInfo) -> VulkanResult<&mut Self> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .inheritance_info(inheritance);
        self.begin_with(&begin_info)
    }

    fn begin_with(&mut self, begin_info: &vk::CommandBufferBeginInfo) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string(),
            });
        }

        unsafe { self.device.begin_command_buffer(self.command_buffer, begin_info) }.map_err(VulkanError::Api)?;

        self.recording = true;
        Ok(self)
    }

    /// Begin a render pass instance
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &render_pass_begin, contents);
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// End command recording
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }

        unsafe { self.device.end_command_buffer(self.command_buffer) }.map_err(VulkanError::Api)?;

        self.recording = false;
        Ok(self.command_buffer)
    }

    /// Raw handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Whether `begin` has been called and `end` has not
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Bind graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    /// Bind descriptor sets starting at set 0
    pub fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                sets,
                &[],
            );
        }
    }

    /// Bind vertex buffers
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, offsets);
        }
    }

    /// Bind index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type);
        }
    }

    /// Push constants to shaders
    pub fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, stages, offset, data);
        }
    }

    /// Set viewport 0
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe {
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
        }
    }

    /// Set scissor 0
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe {
            self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(self.command_buffer, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    /// Draw indexed
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Record image memory barriers
    pub fn image_barriers(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
        }
    }

    /// Buffer to buffer copy
    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, regions);
        }
    }

    /// Buffer to image copy; the image must be in TRANSFER_DST_OPTIMAL
    pub fn copy_buffer_to_image(&mut self, src: vk::Buffer, dst: vk::Image, regions: &[vk::BufferImageCopy]) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    /// Blit within one image between mip levels
    pub fn blit_image(&mut self, image: vk::Image, region: vk::ImageBlit, filter: vk::Filter) {
        unsafe {
            self.device.cmd_blit_image(
                self.command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                filter,
            );
        }
    }
}

/// Render pass instance that ends when dropped
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl ActiveRenderPass<'_> {
    /// Run secondary buffers; the pass must have been begun with SECONDARY_COMMAND_BUFFERS
    pub fn execute_commands(&mut self, secondaries: &[vk::CommandBuffer]) {
        if secondaries.is_empty() {
            return;
        }
        unsafe {
            self.recorder
                .device
                .cmd_execute_commands(self.recorder.command_buffer, secondaries);
        }
    }
}

impl Deref for ActiveRenderPass<'_> {
    type Target = CommandRecorder;

    fn deref(&self) -> &Self::Target {
        self.recorder
    }
}

impl DerefMut for ActiveRenderPass<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.recorder
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}

/// Viewport covering `extent` with depth 0..1
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.height, 720.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn test_full_scissor_starts_at_origin() {
        let scissor = full_scissor(vk::Extent2D { width: 64, height: 32 });
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
        assert_eq!((scissor.extent.width, scissor.extent.height), (64, 32));
    }
}
