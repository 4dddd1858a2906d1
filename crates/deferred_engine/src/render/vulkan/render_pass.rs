//! Render passes and framebuffers
//!
//! Two render pass shapes exist: the offscreen G-buffer pass with several color
//! targets plus depth, and the presentation pass that writes one swapchain image.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// Offscreen pass dependencies: wait for prior reads before writing the
/// G-buffer, then make the writes visible to fragment shaders that sample it.
pub fn offscreen_dependencies() -> [vk::SubpassDependency; 2] {
    [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::MEMORY_READ,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ]
}

/// Clear values for `color_count` zeroed color targets followed by depth 1.0
pub fn offscreen_clear_values(color_count: usize) -> Vec<vk::ClearValue> {
    let mut values = vec![
        vk::ClearValue {
            color: vk::ClearColorValue { float32: [0.0; 4] },
        };
        color_count
    ];
    values.push(vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
    });
    values
}

fn color_attachment(format: vk::Format, final_layout: vk::ImageLayout) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout)
        .build()
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
    color_attachment_count: u32,
}

impl RenderPass {
    /// G-buffer pass: every color target ends shader-readable, depth stays an attachment
    pub fn offscreen(device: Device, color_formats: &[vk::Format], depth_format: vk::Format) -> VulkanResult<Self> {
        let color_count = u32::try_from(color_formats.len()).map_err(|_| VulkanError::InvalidOperation {
            reason: "too many color attachments".to_string(),
        })?;

        let mut attachments: Vec<vk::AttachmentDescription> = color_formats
            .iter()
            .map(|&format| color_attachment(format, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
            .collect();
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );

        let color_refs: Vec<vk::AttachmentReference> = (0..color_count)
            .map(|attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = vk::AttachmentReference {
            attachment: color_count,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];
        let dependencies = offscreen_dependencies();

        Self::create(device, &attachments, &subpasses, &dependencies, color_count)
    }

    /// Presentation pass writing a single swapchain image
    pub fn present(device: Device, color_format: vk::Format) -> VulkanResult<Self> {
        let attachments = [color_attachment(color_format, vk::ImageLayout::PRESENT_SRC_KHR)];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];
        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        }];

        Self::create(device, &attachments, &subpasses, &dependencies, 1)
    }

    fn create(
        device: Device,
        attachments: &[vk::AttachmentDescription],
        subpasses: &[vk::SubpassDescription],
        dependencies: &[vk::SubpassDependency],
        color_attachment_count: u32,
    ) -> VulkanResult<Self> {
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let render_pass = unsafe { device.create_render_pass(&create_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            device,
            render_pass,
            color_attachment_count,
        })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of color attachments in subpass 0
    pub fn color_attachment_count(&self) -> u32 {
        self.color_attachment_count
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Bind `attachments` to `render_pass` at `extent`
    pub fn new(
        device: Device,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.create_framebuffer(&create_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Size the framebuffer was created with
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offscreen_dependencies_are_by_region() {
        let deps = offscreen_dependencies();
        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, 0);
        assert_eq!(deps[1].src_subpass, 0);
        assert_eq!(deps[1].dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(deps
            .iter()
            .all(|d| d.dependency_flags == vk::DependencyFlags::BY_REGION));
        assert!(deps[1].dst_access_mask.contains(vk::AccessFlags::SHADER_READ));
    }

    #[test]
    fn test_offscreen_clear_values() {
        let values = offscreen_clear_values(4);
        assert_eq!(values.len(), 5);
        unsafe {
            assert_eq!(values[0].color.float32, [0.0; 4]);
            assert_eq!(values[4].depth_stencil.depth, 1.0);
            assert_eq!(values[4].depth_stencil.stencil, 0);
        }
    }
}
