//! Vulkan images, views and samplers
//!
//! Every image the renderer creates falls into one of three roles. The role fixes
//! usage, aspect and sampler so call sites only pick a role, a format and an
//! extent.

use ash::{vk, Device};

use super::buffer::{Buffer, HOST_COHERENT};
use super::commands::{CommandPool, CommandRecorder};
use super::context::{has_stencil_component, DeviceContext, VulkanError, VulkanResult};

/// Format textures are uploaded in
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Anisotropy requested for textures before clamping to the device limit
pub const TEXTURE_ANISOTROPY: f32 = 4.0;

/// What an image is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageRole {
    /// Depth attachment, kept in DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    Depth,
    /// Sampled texture uploaded from pixel data
    Texture,
    /// G-buffer color target, later sampled by the lighting pass
    ColorAttachment,
}

impl ImageRole {
    /// Usage flags for the role
    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            Self::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            Self::Texture => {
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
            }
            Self::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        }
    }

    /// Aspect used by the image view
    pub fn view_aspect(self) -> vk::ImageAspectFlags {
        match self {
            Self::Depth => vk::ImageAspectFlags::DEPTH,
            Self::Texture | Self::ColorAttachment => vk::ImageAspectFlags::COLOR,
        }
    }

    /// Aspect used by layout barriers; depth formats with stencil include it
    pub fn barrier_aspect(self, format: vk::Format) -> vk::ImageAspectFlags {
        match self {
            Self::Depth if has_stencil_component(format) => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            other => other.view_aspect(),
        }
    }
}

/// Number of levels in a full mip chain
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Source and destination extents for each blit in a mip chain
pub fn mip_chain(width: u32, height: u32, levels: u32) -> VulkanResult<Vec<((i32, i32), (i32, i32))>> {
    let offset = |v: u32| {
        i32::try_from(v).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("texture size {width}x{height} exceeds blit offsets"),
        })
    };
    let mut w = offset(width)?;
    let mut h = offset(height)?;
    Ok((1..levels)
        .map(|_| {
            let src = (w, h);
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            (src, (w, h))
        })
        .collect())
}

/// Level count and downsampling blits for one texture upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexturePlan {
    /// Levels allocated for the image
    pub mip_levels: u32,
    /// Source and destination extents of each blit, level 1 first
    pub blits: Vec<((i32, i32), (i32, i32))>,
}

impl TexturePlan {
    /// Whether levels beyond 0 are filled by blitting
    pub fn generates_mips(&self) -> bool {
        self.mip_levels > 1
    }

    /// Layouts `level` passes through after the buffer copy, ending shader-readable
    pub fn level_layouts(&self, level: u32) -> Vec<vk::ImageLayout> {
        if level + 1 < self.mip_levels {
            vec![
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ]
        } else {
            vec![
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ]
        }
    }
}

/// Plan the upload of a `width` x `height` texture.
///
/// Without mips the image has a single level that goes straight from transfer-dst
/// to shader-read-only. A chain needs `linear_blit`, the format's support for
/// linear filtering in optimal tiling.
pub fn plan_texture(width: u32, height: u32, generate_mips: bool, linear_blit: bool) -> VulkanResult<TexturePlan> {
    if width == 0 || height == 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("texture size {width}x{height} has a zero dimension"),
        });
    }
    let levels = if generate_mips { mip_levels(width, height) } else { 1 };
    if levels > 1 && !linear_blit {
        return Err(VulkanError::UnsupportedFormat(format!(
            "{TEXTURE_FORMAT:?} does not support linear blitting"
        )));
    }
    Ok(TexturePlan {
        mip_levels: levels,
        blits: mip_chain(width, height, levels)?,
    })
}

/// Access masks and stages for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Writes that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage producing the source accesses
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming the destination accesses
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the layout transitions the renderer performs
pub fn access_masks_for(old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<LayoutTransition> {
    use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        _ => {
            return Err(VulkanError::InvalidOperation {
                reason: format!("unsupported layout transition {old:?} -> {new:?}"),
            })
        }
    };

    Ok(LayoutTransition {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Sampler parameters derived from an image's role
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Address mode on all three axes
    pub address_mode: vk::SamplerAddressMode,
    /// Anisotropy level, `None` when disabled
    pub anisotropy: Option<f32>,
    /// Filtering between mip levels
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Highest LOD the sampler may select
    pub max_lod: f32,
}

impl SamplerSettings {
    /// Sampler for `role`; depth images get none
    pub fn for_role(role: ImageRole, mip_levels: u32, device_max_anisotropy: f32) -> Option<Self> {
        match role {
            ImageRole::Depth => None,
            ImageRole::ColorAttachment => Some(Self {
                filter: vk::Filter::NEAREST,
                address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                anisotropy: None,
                mipmap_mode: vk::SamplerMipmapMode::LINEAR,
                max_lod: mip_levels as f32,
            }),
            ImageRole::Texture => Some(Self {
                filter: vk::Filter::LINEAR,
                address_mode: vk::SamplerAddressMode::REPEAT,
                anisotropy: Some(TEXTURE_ANISOTROPY.min(device_max_anisotropy)),
                mipmap_mode: vk::SamplerMipmapMode::LINEAR,
                max_lod: mip_levels as f32,
            }),
        }
    }

    fn create(&self, device: &Device) -> VulkanResult<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(self.filter)
            .min_filter(self.filter)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .anisotropy_enable(self.anisotropy.is_some())
            .max_anisotropy(self.anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(self.mipmap_mode)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(self.max_lod);

        unsafe { device.create_sampler(&info, None) }.map_err(VulkanError::Api)
    }
}

/// CPU-side RGBA8 pixels ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelData {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl PixelData {
    /// Interpret `bytes` as `channels` 8-bit channels per pixel and expand to RGBA.
    ///
    /// One channel is treated as grey, two as grey plus alpha.
    pub fn from_raw(width: u32, height: u32, channels: u8, bytes: &[u8]) -> VulkanResult<Self> {
        if width == 0 || height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("texture size {width}x{height} has a zero dimension"),
            });
        }
        if !(1..=4).contains(&channels) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{channels} channels per pixel is not supported"),
            });
        }
        let pixel_count = width as usize * height as usize;
        let expected = pixel_count * channels as usize;
        if bytes.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!("expected {expected} bytes of pixel data, got {}", bytes.len()),
            });
        }

        let rgba = match channels {
            4 => bytes.to_vec(),
            3 => bytes.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect(),
            2 => bytes.chunks_exact(2).flat_map(|p| [p[0], p[0], p[0], p[1]]).collect(),
            _ => bytes.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        };

        Ok(Self { width, height, rgba })
    }

    /// 1x1 texture of a single color
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: rgba.to_vec(),
        }
    }

    /// Plain white diffuse
    pub fn white() -> Self {
        Self::solid([255, 255, 255, 255])
    }

    /// Tangent-space normal pointing straight out of the surface
    pub fn flat_normal() -> Self {
        Self::solid([128, 128, 255, 255])
    }

    /// Neutral material parameters
    pub fn default_material() -> Self {
        Self::solid([0, 128, 0, 255])
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Tightly packed RGBA8 bytes
    pub fn bytes(&self) -> &[u8] {
        &self.rgba
    }
}

impl TryFrom<image::RgbaImage> for PixelData {
    type Error = VulkanError;

    fn try_from(img: image::RgbaImage) -> VulkanResult<Self> {
        Self::from_raw(img.width(), img.height(), 4, img.as_raw())
    }
}

/// Image, memory, view and optional sampler
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    role: ImageRole,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
    layout: vk::ImageLayout,
}

impl Image {
    /// Create an attachment image. Depth images are moved to their attachment layout.
    pub fn attachment(
        context: &DeviceContext,
        pool: &CommandPool,
        role: ImageRole,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> VulkanResult<Self> {
        if role == ImageRole::Texture {
            return Err(VulkanError::InvalidOperation {
                reason: "textures are created from pixel data".to_string(),
            });
        }
        let mut image = Self::allocate(context, role, format, extent, 1, samples)?;

        if role == ImageRole::Depth {
            pool.submit_single_time(context.graphics_queue(), |recorder| {
                image.transition_layout(recorder, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            })?;
        }

        image.create_sampler(context)?;
        Ok(image)
    }

    /// Upload `pixels` as a sampled texture, optionally with a full mip chain
    pub fn texture(
        context: &DeviceContext,
        pool: &CommandPool,
        pixels: &PixelData,
        generate_mips: bool,
    ) -> VulkanResult<Self> {
        let linear_blit = context
            .format_properties(TEXTURE_FORMAT)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);
        let plan = plan_texture(pixels.width(), pixels.height(), generate_mips, linear_blit)?;

        let staging = Buffer::create(
            context,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_COHERENT,
            pixels.bytes().len() as vk::DeviceSize,
            Some(pixels.bytes()),
        )?;

        let extent = vk::Extent2D {
            width: pixels.width(),
            height: pixels.height(),
        };
        let mut image = Self::allocate(
            context,
            ImageRole::Texture,
            TEXTURE_FORMAT,
            extent,
            plan.mip_levels,
            vk::SampleCountFlags::TYPE_1,
        )?;

        pool.submit_single_time(context.graphics_queue(), |recorder| {
            image.transition_layout(recorder, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();
            recorder.copy_buffer_to_image(staging.handle(), image.image, &[region]);

            if plan.generates_mips() {
                image.generate_mipmaps(recorder, &plan.blits)
            } else {
                image.transition_layout(recorder, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            }
        })?;

        image.create_sampler(context)?;
        Ok(image)
    }

    fn allocate(
        context: &DeviceContext,
        role: ImageRole,
        format: vk::Format,
        extent: vk::Extent2D,
        mip_levels: u32,
        samples: vk::SampleCountFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(role.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(samples);

        let image = unsafe { device.create_image(&info, None) }.map_err(VulkanError::Api)?;

        let mut this = Self {
            device,
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            role,
            format,
            extent,
            mip_levels,
            layout: vk::ImageLayout::UNDEFINED,
        };

        let requirements = unsafe { this.device.get_image_memory_requirements(image) };
        let memory_type_index =
            context.find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        this.memory = unsafe { this.device.allocate_memory(&alloc_info, None) }
            .map_err(|e| VulkanError::from_allocation(e, requirements.size))?;
        unsafe { this.device.bind_image_memory(image, this.memory, 0) }.map_err(VulkanError::Api)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: role.view_aspect(),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        this.view = unsafe { this.device.create_image_view(&view_info, None) }.map_err(VulkanError::Api)?;

        Ok(this)
    }

    fn create_sampler(&mut self, context: &DeviceContext) -> VulkanResult<()> {
        if let Some(settings) = SamplerSettings::for_role(self.role, self.mip_levels, context.max_sampler_anisotropy()) {
            self.sampler = settings.create(&self.device)?;
        }
        Ok(())
    }

    fn barrier(
        &self,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        transition: &LayoutTransition,
        base_mip_level: u32,
        level_count: u32,
    ) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.role.barrier_aspect(self.format),
                base_mip_level,
                level_count,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .build()
    }

    /// Record a whole-image layout transition and remember the new layout
    pub fn transition_layout(&mut self, recorder: &mut CommandRecorder, new_layout: vk::ImageLayout) -> VulkanResult<()> {
        let transition = access_masks_for(self.layout, new_layout)?;
        let barrier = self.barrier(self.layout, new_layout, &transition, 0, self.mip_levels);
        recorder.image_barriers(transition.src_stage, transition.dst_stage, &[barrier]);
        self.layout = new_layout;
        Ok(())
    }

    /// Fill levels 1.. by blitting down from level 0, leaving every level shader-readable
    fn generate_mipmaps(
        &mut self,
        recorder: &mut CommandRecorder,
        blits: &[((i32, i32), (i32, i32))],
    ) -> VulkanResult<()> {
        let to_src = access_masks_for(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        let src_to_read =
            access_masks_for(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        let dst_to_read =
            access_masks_for(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;

        for (level, &(src, dst)) in (1u32..).zip(blits) {
            let source = level - 1;
            let barrier = self.barrier(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                &to_src,
                source,
                1,
            );
            recorder.image_barriers(to_src.src_stage, to_src.dst_stage, &[barrier]);

            let blit = vk::ImageBlit {
                src_subresource: color_layer(source),
                src_offsets: [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: src.0, y: src.1, z: 1 }],
                dst_subresource: color_layer(level),
                dst_offsets: [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: dst.0, y: dst.1, z: 1 }],
            };
            recorder.blit_image(self.image, blit, vk::Filter::LINEAR);

            let barrier = self.barrier(
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                &src_to_read,
                source,
                1,
            );
            recorder.image_barriers(src_to_read.src_stage, src_to_read.dst_stage, &[barrier]);
        }

        let barrier = self.barrier(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            &dst_to_read,
            self.mip_levels - 1,
            1,
        );
        recorder.image_barriers(dst_to_read.src_stage, dst_to_read.dst_stage, &[barrier]);

        self.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Ok(())
    }

    /// Descriptor info for sampling this image in shaders
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Release every handle; safe to call more than once
    pub fn destroy(&mut self) {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(self.sampler, None);
                self.sampler = vk::Sampler::null();
            }
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
            if self.image != vk::Image::null() {
                self.device.destroy_image(self.image, None);
                self.image = vk::Image::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View over all mip levels
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Sampler, null for depth images
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Role the image was created for
    pub fn role(&self) -> ImageRole {
        self.role
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size of level 0
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Layout after the last recorded transition
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn color_layer(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_levels() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(512, 512), 10);
        assert_eq!(mip_levels(1024, 300), 11);
        assert_eq!(mip_levels(1023, 1), 10);
        assert_eq!(mip_levels(0, 0), 1);
    }

    #[test]
    fn test_mip_chain_halves_to_one() {
        let chain = mip_chain(8, 2, mip_levels(8, 2)).unwrap();
        assert_eq!(chain, vec![((8, 2), (4, 1)), ((4, 1), (2, 1)), ((2, 1), (1, 1))]);
        assert!(mip_chain(64, 64, 1).unwrap().is_empty());
    }

    #[test]
    fn test_mip_chain_rejects_sizes_past_blit_range() {
        assert!(mip_chain(u32::MAX, 4, 2).is_err());
    }

    #[test]
    fn test_transition_table() {
        let upload = access_masks_for(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(upload.src_access, vk::AccessFlags::empty());
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);

        let read = access_masks_for(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(read.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let depth = access_masks_for(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn test_unsupported_transition_is_rejected() {
        let result = access_masks_for(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_role_usage_and_aspect() {
        assert!(ImageRole::Depth
            .usage()
            .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(ImageRole::ColorAttachment.usage().contains(vk::ImageUsageFlags::SAMPLED));
        assert!(ImageRole::Texture.usage().contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert_eq!(
            ImageRole::Depth.barrier_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            ImageRole::Depth.barrier_aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn test_sampler_settings_by_role() {
        assert!(SamplerSettings::for_role(ImageRole::Depth, 1, 16.0).is_none());

        let gbuffer = SamplerSettings::for_role(ImageRole::ColorAttachment, 1, 16.0).unwrap();
        assert_eq!(gbuffer.filter, vk::Filter::NEAREST);
        assert_eq!(gbuffer.address_mode, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(gbuffer.anisotropy, None);

        let texture = SamplerSettings::for_role(ImageRole::Texture, 9, 2.0).unwrap();
        assert_eq!(texture.filter, vk::Filter::LINEAR);
        assert_eq!(texture.address_mode, vk::SamplerAddressMode::REPEAT);
        assert_eq!(texture.anisotropy, Some(2.0));
        assert_eq!(texture.max_lod, 9.0);
    }

    #[test]
    fn test_pixel_data_expands_channels() {
        let rgb = PixelData::from_raw(2, 1, 3, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(rgb.bytes(), &[1, 2, 3, 255, 4, 5, 6, 255]);

        let grey = PixelData::from_raw(1, 1, 1, &[7]).unwrap();
        assert_eq!(grey.bytes(), &[7, 7, 7, 255]);

        let grey_alpha = PixelData::from_raw(1, 1, 2, &[9, 100]).unwrap();
        assert_eq!(grey_alpha.bytes(), &[9, 9, 9, 100]);
    }

    #[test]
    fn test_pixel_data_rejects_bad_input() {
        assert!(PixelData::from_raw(0, 4, 4, &[]).is_err());
        assert!(PixelData::from_raw(1, 1, 5, &[0; 5]).is_err());
        assert!(PixelData::from_raw(2, 2, 4, &[0; 15]).is_err());
    }

    #[test]
    fn test_pixel_data_from_image() {
        let img = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 40]));
        let pixels = PixelData::try_from(img).unwrap();
        assert_eq!((pixels.width(), pixels.height()), (3, 2));
        assert_eq!(pixels.bytes().len(), 24);
        assert_eq!(&pixels.bytes()[..4], &[10, 20, 30, 40]);
    }

    #[test]
    fn test_empty_decoded_image_is_rejected() {
        let img = image::RgbaImage::new(0, 0);
        assert!(matches!(
            PixelData::try_from(img),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(PixelData::try_from(image::RgbaImage::new(4, 0)).is_err());
    }

    #[test]
    fn test_texture_without_mips_has_one_level() {
        let plan = plan_texture(256, 128, false, false).unwrap();
        assert_eq!(plan.mip_levels, 1);
        assert!(!plan.generates_mips());
        assert!(plan.blits.is_empty());
        assert_eq!(
            plan.level_layouts(0),
            vec![
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            ]
        );
    }

    #[test]
    fn test_texture_with_mips_blits_every_level() {
        let plan = plan_texture(256, 128, true, true).unwrap();
        assert_eq!(plan.mip_levels, 9);
        assert!(plan.generates_mips());
        assert_eq!(plan.blits.len(), 8);
        assert_eq!(plan.blits[0], ((256, 128), (128, 64)));
        assert_eq!(plan.blits[7].1, (1, 1));

        for level in 0..plan.mip_levels {
            let layouts = plan.level_layouts(level);
            let expected_len = if level + 1 < plan.mip_levels { 3 } else { 2 };
            assert_eq!(layouts.len(), expected_len, "level {level}");
            assert_eq!(layouts.last(), Some(&vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
            for pair in layouts.windows(2) {
                assert!(access_masks_for(pair[0], pair[1]).is_ok(), "level {level}: {pair:?}");
            }
        }
    }

    #[test]
    fn test_mip_chain_requires_linear_blit() {
        assert!(matches!(
            plan_texture(64, 64, true, false),
            Err(VulkanError::UnsupportedFormat(_))
        ));
        // a 1x1 texture has nothing to blit, so the filter does not matter
        assert_eq!(plan_texture(1, 1, true, false).unwrap().mip_levels, 1);
        // neither does an upload without mips
        assert!(plan_texture(64, 64, false, false).is_ok());
    }

    #[test]
    fn test_zero_sized_texture_is_rejected() {
        assert!(matches!(
            plan_texture(0, 16, false, true),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_solid_defaults() {
        assert_eq!(PixelData::flat_normal().bytes(), &[128, 128, 255, 255]);
        assert_eq!(PixelData::white().width(), 1);
    }
}
