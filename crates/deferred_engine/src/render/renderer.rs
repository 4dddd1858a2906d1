//! Frame orchestration
//!
//! [`DeferredRenderer`] is the one object the engine loop calls every frame. Each
//! call to [`DeferredRenderer::render`] walks the frame state machine:
//!
//! 1. wait on the slot's fence, bounding the frames in flight
//! 2. acquire a swapchain image; an out-of-date result rebuilds the swapchain and drops the frame
//! 3. record the geometry pass, reset the fence, submit waiting on "image available"
//!    and signaling "offscreen complete"
//! 4. record the lighting pass and submit waiting on "offscreen complete",
//!    signaling "render finished" and the slot's fence
//! 5. present waiting on "render finished", rebuilding the swapchain if it went stale
//!    or a resize is pending
//! 6. advance to the next slot
//!
//! When a frame fails part way the state machine returns to idle before the error
//! is handed back. If an image was already acquired the device is drained and the
//! slot's fence and semaphores are replaced, so the next call starts clean. Errors
//! for which [`VulkanError::is_fatal`] holds should still be logged and end the loop.

use ash::vk;
use std::rc::Rc;

use crate::config::RendererConfig;
use crate::foundation::logging::RenderLog;

use super::camera::Camera;
use super::frame::{AcquireOutcome, FrameOutcome, FrameState, FrameStats, PresentOutcome};
use super::geometry_pass::GeometryPass;
use super::lighting_pass::LightingPass;
use super::model::{MaterialTextures, Mesh, MeshData, Model, ModelKey, ModelStore};
use super::scene::{ModelInstance, PointLight};
use super::vulkan::{
    CommandPool, CommandRecorder, DeviceContext, FrameRing, FrameSync, Image, PixelData, ShaderSet, SurfaceSource,
    Swapchain, VulkanError, VulkanResult,
};

/// Primary command buffers of one frame slot
#[derive(Debug, Clone, Copy)]
struct SlotCommands {
    geometry: vk::CommandBuffer,
    lighting: vk::CommandBuffer,
}

/// Two-pass deferred renderer.
///
/// Field order is drop order: passes and swapchain first, then per-frame sync and
/// command buffers, and the device context last.
pub struct DeferredRenderer {
    lighting: LightingPass,
    geometry: GeometryPass,
    swapchain: Swapchain,
    frames: Vec<FrameSync>,
    commands: Vec<SlotCommands>,
    command_pool: CommandPool,
    shaders: ShaderSet,
    ring: FrameRing,
    state: FrameState,
    window_extent: vk::Extent2D,
    resize_pending: bool,
    config: RendererConfig,
    log: RenderLog,
    context: DeviceContext,
}

impl DeferredRenderer {
    /// Bring up the device, swapchain and both passes for `window`
    pub fn new(config: RendererConfig, window: &mut dyn SurfaceSource, log: RenderLog) -> VulkanResult<Self> {
        config
            .validate()
            .and_then(|()| config.shaders.validate())
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let shaders = ShaderSet::load(&config.shaders)?;

        let context = DeviceContext::new(window, &config.application_name, &config.graphics, log.clone())?;
        let (width, height) = window.framebuffer_size();
        let window_extent = vk::Extent2D { width, height };

        let frame_count = config.frames_in_flight as usize;
        let command_pool = CommandPool::new(context.raw_device(), context.graphics_family(), log.clone())?;
        let swapchain = Swapchain::new(
            &context,
            window_extent,
            config.graphics.vsync,
            vk::SwapchainKHR::null(),
            &log,
        )?;

        let geometry = GeometryPass::new(
            &context,
            &command_pool,
            &shaders,
            swapchain.extent(),
            frame_count,
            config.max_models,
            &log,
        )?;
        let lighting = LightingPass::new(
            &context,
            &shaders,
            &swapchain,
            geometry.gbuffer(),
            frame_count,
            config.clear_color,
        )?;

        let frames = (0..frame_count)
            .map(|_| FrameSync::new(context.device()))
            .collect::<VulkanResult<Vec<_>>>()?;
        let commands = allocate_slot_commands(&command_pool, frame_count)?;

        log.info(format_args!(
            "Deferred renderer ready: {}x{}, {} frames in flight, {} swapchain images",
            swapchain.extent().width,
            swapchain.extent().height,
            frame_count,
            swapchain.image_count()
        ));

        Ok(Self {
            lighting,
            geometry,
            swapchain,
            frames,
            commands,
            command_pool,
            shaders,
            ring: FrameRing::new(frame_count),
            state: FrameState::Idle,
            window_extent,
            resize_pending: false,
            config,
            log,
            context,
        })
    }

    /// Render one frame of `instances` lit by `lights` as seen from `camera`
    pub fn render(
        &mut self,
        camera: &Camera,
        instances: &[ModelInstance],
        lights: &[PointLight],
        models: &ModelStore,
    ) -> VulkanResult<FrameStats> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(FrameStats::empty(FrameOutcome::Skipped));
        }

        let slot = self.ring.current();
        debug_assert!(slot < self.frames.len(), "frame slot {slot} out of range");
        self.render_frame(slot, camera, instances, lights, models)
            .map_err(|e| self.recover(slot, e))
    }

    fn render_frame(
        &mut self,
        slot: usize,
        camera: &Camera,
        instances: &[ModelInstance],
        lights: &[PointLight],
        models: &ModelStore,
    ) -> VulkanResult<FrameStats> {
        self.state = self.state.transition(FrameState::Acquiring)?;

        self.frames[slot].in_flight.wait(self.config.fence_timeout_ns())?;
        self.ring.mark_retired();

        let acquired = self
            .swapchain
            .acquire_next_image(self.frames[slot].image_available.handle(), u64::MAX);
        let (image_index, acquire_suboptimal) = match AcquireOutcome::classify(acquired)? {
            AcquireOutcome::Image { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::Stale => {
                self.state = self.state.transition(FrameState::Idle)?;
                self.log.debug("Swapchain out of date on acquire; dropping frame");
                self.recreate_swapchain()?;
                return Ok(FrameStats::empty(FrameOutcome::Dropped));
            }
        };

        self.state = self.state.transition(FrameState::Recording)?;
        self.geometry.update_camera(slot, camera)?;
        self.lighting.update_camera(slot, camera.position)?;

        let slot_commands = self.commands[slot];
        let geometry_draws = self.record_geometry(slot_commands.geometry, slot, instances, models)?;
        let light_draws = self.record_lighting(slot_commands.lighting, slot, image_index, lights)?;

        self.submit(slot, slot_commands)?;
        self.ring.mark_submitted();
        self.state = self.state.transition(FrameState::Submitted)?;

        self.state = self.state.transition(FrameState::Presenting)?;
        let presented = self.swapchain.present(
            self.context.present_queue(),
            image_index,
            self.frames[slot].render_finished.handle(),
        );
        let present = PresentOutcome::classify(presented, self.resize_pending || acquire_suboptimal)?;

        self.ring.advance();
        self.state = self.state.transition(FrameState::Idle)?;

        let outcome = match present {
            PresentOutcome::Presented => FrameOutcome::Presented,
            PresentOutcome::Stale => {
                if self.recreate_swapchain()? {
                    FrameOutcome::Recreated
                } else {
                    FrameOutcome::Presented
                }
            }
        };

        let capacity = self.geometry.secondary_capacity(slot);
        Ok(FrameStats {
            geometry_draws,
            light_draws,
            secondary_capacity: u32::try_from(capacity).map_err(|_| VulkanError::InvalidOperation {
                reason: format!("{capacity} secondary command buffers"),
            })?,
            image_index: Some(image_index),
            outcome,
        })
    }

    /// Put the frame machine back to `Idle` after `render_frame` failed and hand the error on
    fn recover(&mut self, slot: usize, error: VulkanError) -> VulkanError {
        let failed = self.state;
        let (state, recovery) = failed.abort();
        self.state = state;
        self.log
            .warn(format_args!("Frame slot {slot} abandoned while {failed:?}: {error}"));

        if recovery.reset_slot {
            if let Err(e) = self.reset_slot(slot, recovery.release_image) {
                self.log.error(format_args!("Could not reset frame slot {slot}: {e}"));
            }
        }
        error
    }

    fn reset_slot(&mut self, slot: usize, release_image: bool) -> VulkanResult<()> {
        self.context.wait_idle()?;
        self.frames[slot] = FrameSync::new(self.context.device())?;
        self.ring.mark_retired();
        if release_image {
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    fn record_geometry(
        &mut self,
        command_buffer: vk::CommandBuffer,
        slot: usize,
        instances: &[ModelInstance],
        models: &ModelStore,
    ) -> VulkanResult<u32> {
        let mut recorder = CommandRecorder::new(command_buffer, self.context.raw_device());
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        let draws = self
            .geometry
            .record(&self.command_pool, &mut recorder, slot, instances, models)?;
        recorder.end()?;
        Ok(draws)
    }

    fn record_lighting(
        &self,
        command_buffer: vk::CommandBuffer,
        slot: usize,
        image_index: u32,
        lights: &[PointLight],
    ) -> VulkanResult<u32> {
        let mut recorder = CommandRecorder::new(command_buffer, self.context.raw_device());
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        let draws = self.lighting.record(&mut recorder, slot, image_index, lights)?;
        recorder.end()?;
        Ok(draws)
    }

    fn submit(&self, slot: usize, commands: SlotCommands) -> VulkanResult<()> {
        let sync = &self.frames[slot];
        let device = self.context.device();
        let queue = self.context.graphics_queue();

        // only reset once work that will signal the fence is about to be submitted
        sync.in_flight.reset()?;

        let geometry_wait = [sync.image_available.handle()];
        let geometry_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let geometry_buffers = [commands.geometry];
        let geometry_signal = [sync.offscreen_complete.handle()];
        let geometry_submit = vk::SubmitInfo::builder()
            .wait_semaphores(&geometry_wait)
            .wait_dst_stage_mask(&geometry_stages)
            .command_buffers(&geometry_buffers)
            .signal_semaphores(&geometry_signal)
            .build();
        unsafe { device.queue_submit(queue, &[geometry_submit], vk::Fence::null()) }.map_err(VulkanError::Api)?;

        let lighting_wait = [sync.offscreen_complete.handle()];
        let lighting_stages =
            [vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let lighting_buffers = [commands.lighting];
        let lighting_signal = [sync.render_finished.handle()];
        let lighting_submit = vk::SubmitInfo::builder()
            .wait_semaphores(&lighting_wait)
            .wait_dst_stage_mask(&lighting_stages)
            .command_buffers(&lighting_buffers)
            .signal_semaphores(&lighting_signal)
            .build();
        unsafe { device.queue_submit(queue, &[lighting_submit], sync.in_flight.handle()) }.map_err(VulkanError::Api)
    }

    /// Record the new framebuffer size; the swapchain is rebuilt at the end of the next frame
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.resize_pending = true;
    }

    /// Whether a resize is waiting to be applied
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Tear down and rebuild everything sized to the swapchain.
    ///
    /// Returns `false` without touching anything while the window has no area; the
    /// resize then stays pending.
    pub fn recreate_swapchain(&mut self) -> VulkanResult<bool> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            self.resize_pending = true;
            return Ok(false);
        }

        self.context.wait_idle()?;

        self.geometry.release_secondaries(&self.command_pool);
        let buffers: Vec<vk::CommandBuffer> = self
            .commands
            .drain(..)
            .flat_map(|slot| [slot.geometry, slot.lighting])
            .collect();
        self.command_pool.free(&buffers);

        let swapchain = Swapchain::new(
            &self.context,
            self.window_extent,
            self.config.graphics.vsync,
            self.swapchain.handle(),
            &self.log,
        )?;
        self.swapchain = swapchain;
        let extent = self.swapchain.extent();

        self.geometry
            .recreate(&self.context, &self.command_pool, &self.shaders, extent)?;
        self.lighting = LightingPass::new(
            &self.context,
            &self.shaders,
            &self.swapchain,
            self.geometry.gbuffer(),
            self.frames.len(),
            self.config.clear_color,
        )?;
        self.commands = allocate_slot_commands(&self.command_pool, self.frames.len())?;

        self.resize_pending = false;
        self.log.info(format_args!(
            "Swapchain recreated at {}x{} ({:?})",
            extent.width,
            extent.height,
            self.swapchain.format().format
        ));
        Ok(true)
    }

    /// Upload mesh data to device-local buffers
    pub fn upload_mesh(&self, data: &MeshData) -> VulkanResult<Mesh> {
        Mesh::upload(&self.context, &self.command_pool, data)
    }

    /// Upload one texture
    pub fn upload_texture(&self, pixels: &PixelData, generate_mips: bool) -> VulkanResult<Image> {
        Image::texture(&self.context, &self.command_pool, pixels, generate_mips)
    }

    /// Upload diffuse, normal and material maps
    pub fn upload_material(
        &self,
        diffuse: &PixelData,
        normal: &PixelData,
        material: &PixelData,
        generate_mips: bool,
    ) -> VulkanResult<MaterialTextures> {
        MaterialTextures::upload(&self.context, &self.command_pool, diffuse, normal, material, generate_mips)
    }

    /// Placeholder textures for untextured models
    pub fn placeholder_material(&self) -> VulkanResult<MaterialTextures> {
        MaterialTextures::placeholder(&self.context, &self.command_pool)
    }

    /// Give `mesh` and `textures` descriptor sets and store the result
    pub fn create_model(
        &mut self,
        models: &mut ModelStore,
        mesh: Rc<Mesh>,
        textures: MaterialTextures,
    ) -> VulkanResult<ModelKey> {
        let sets = self.geometry.allocate_model_sets(&textures)?;
        Ok(models.insert(Model::new(mesh, textures, sets)))
    }

    /// Remove a model and return its descriptor sets. Waits for the device to go idle.
    pub fn destroy_model(&mut self, models: &mut ModelStore, key: ModelKey) -> VulkanResult<()> {
        if !models.contains(key) {
            return Err(VulkanError::ResourceNotFound {
                id: format!("{key:?}"),
            });
        }
        self.context.wait_idle()?;
        let model = models.remove(key).ok_or_else(|| VulkanError::ResourceNotFound {
            id: format!("{key:?}"),
        })?;
        self.geometry.free_model_sets(model.descriptor_sets())
    }

    /// Remove every model and return their descriptor sets; returns how many were removed.
    /// Waits for the device to go idle first.
    pub fn destroy_all_models(&mut self, models: &mut ModelStore) -> VulkanResult<usize> {
        self.context.wait_idle()?;
        let drained = models.drain();
        for model in &drained {
            self.geometry.free_model_sets(model.descriptor_sets())?;
        }
        Ok(drained.len())
    }

    /// Block until the GPU has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    /// Current swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Current swapchain surface format
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.swapchain.format()
    }

    /// Frame slots in flight
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Slots with submitted work that has not been waited on
    pub fn outstanding_frames(&self) -> usize {
        self.ring.outstanding()
    }

    /// Where the frame state machine currently is
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Device capabilities
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Configuration the renderer was created with
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for DeferredRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            self.log.error(format_args!("wait_idle failed during renderer shutdown: {e}"));
        }
        self.geometry.release_secondaries(&self.command_pool);
    }
}

fn allocate_slot_commands(pool: &CommandPool, frames: usize) -> VulkanResult<Vec<SlotCommands>> {
    let count = u32::try_from(frames * 2).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("{frames} frame slots"),
    })?;
    Ok(pair_slot_commands(&pool.allocate_primary(count)?))
}

/// Split primaries into per-slot geometry and lighting buffers; an odd trailing buffer is ignored
fn pair_slot_commands(buffers: &[vk::CommandBuffer]) -> Vec<SlotCommands> {
    buffers
        .chunks_exact(2)
        .map(|pair| SlotCommands {
            geometry: pair[0],
            lighting: pair[1],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_pair_slot_commands_keeps_order() {
        let buffers: Vec<_> = (1..=4).map(vk::CommandBuffer::from_raw).collect();
        let slots = pair_slot_commands(&buffers);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].geometry.as_raw(), 1);
        assert_eq!(slots[0].lighting.as_raw(), 2);
        assert_eq!(slots[1].geometry.as_raw(), 3);
        assert_eq!(slots[1].lighting.as_raw(), 4);
    }

    #[test]
    fn test_pair_slot_commands_drops_odd_buffer() {
        let buffers: Vec<_> = (1..=3).map(vk::CommandBuffer::from_raw).collect();
        assert_eq!(pair_slot_commands(&buffers).len(), 1);
    }
}
