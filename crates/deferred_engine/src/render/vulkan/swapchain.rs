//! Vulkan swapchain management
//!
//! Handles swapchain creation and recreation following RAII principles. The
//! selection rules (format, present mode, extent, image count, sharing) are plain
//! functions so they can be checked without a device.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::context::{DeviceContext, VulkanError, VulkanResult};
use crate::foundation::logging::RenderLog;

/// Surface format the renderer asks for first
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick the surface format, preferring BGRA8 UNORM with sRGB-nonlinear color space
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match available {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(PREFERRED_SURFACE_FORMAT),
        formats => formats
            .iter()
            .copied()
            .find(|sf| {
                sf.format == PREFERRED_SURFACE_FORMAT.format && sf.color_space == PREFERRED_SURFACE_FORMAT.color_space
            })
            .or_else(|| formats.first().copied()),
    }
}

/// Pick the present mode; vsync forces FIFO, otherwise MAILBOX then IMMEDIATE
pub fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface-dictated extent, or the window size clamped to the surface limits
pub fn choose_swap_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            // max before min: a surface reporting min > max must not panic
            width: window_extent
                .width
                .max(caps.min_image_extent.width)
                .min(caps.max_image_extent.width),
            height: window_extent
                .height
                .max(caps.min_image_extent.height)
                .min(caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum when the surface has one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Sharing mode and family list for swapchain images
pub fn sharing_for(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics_family, present_family])
    }
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain; pass the previous handle as `old_swapchain` when recreating
    pub fn new(
        context: &DeviceContext,
        window_extent: vk::Extent2D,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
        log: &RenderLog,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let swapchain_loader = context.swapchain_loader().clone();
        let physical = context.physical_device().device;
        let surface = context.surface();
        let surface_loader = context.surface_loader();

        let caps = unsafe { surface_loader.get_physical_device_surface_capabilities(physical, surface) }
            .map_err(VulkanError::Api)?;
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical, surface) }
            .map_err(VulkanError::Api)?;
        let present_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical, surface) }
            .map_err(VulkanError::Api)?;

        let format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::UnsupportedFormat("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&present_modes, vsync);
        let extent = choose_swap_extent(&caps, window_extent);
        let image_count = choose_image_count(&caps);
        let (sharing_mode, families) = sharing_for(context.graphics_family(), context.present_family());

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain =
            unsafe { swapchain_loader.create_swapchain(&create_info, None) }.map_err(VulkanError::Api)?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_color_view(&device, image, format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => unsafe {
                    for view in image_views {
                        device.destroy_image_view(view, None);
                    }
                    swapchain_loader.destroy_swapchain(swapchain, None);
                    return Err(e);
                },
            }
        }

        log.info(format_args!(
            "Swapchain {}x{} with {} images, {:?} / {:?}",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode
        ));

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            format,
            present_mode,
            extent,
        })
    }

    /// Acquire the next image; `Ok((index, suboptimal))`
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout: u64) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    /// Queue `image_index` for presentation once `wait` is signaled; `Ok(suboptimal)`
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Present mode in use
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Number of images the implementation actually created
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_color_view(device: &Device, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.map_err(VulkanError::Api)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_present_mode_vsync_forces_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_present_mode_fallback_order() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);

        let no_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&no_mailbox, false), vk::PresentModeKHR::IMMEDIATE);

        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_surface_format_preference() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(
            choose_surface_format(&[srgb, PREFERRED_SURFACE_FORMAT]),
            Some(PREFERRED_SURFACE_FORMAT)
        );
        assert_eq!(choose_surface_format(&[srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_surface_format_undefined_means_any() {
        let undefined = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[undefined]), Some(PREFERRED_SURFACE_FORMAT));
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let c = caps((1024, 768), (1, 1), (4096, 4096));
        let extent = choose_swap_extent(&c, vk::Extent2D { width: 10, height: 10 });
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn test_extent_clamps_window_size() {
        let c = caps((u32::MAX, u32::MAX), (100, 100), (1920, 1080));
        let extent = choose_swap_extent(&c, vk::Extent2D { width: 4000, height: 50 });
        assert_eq!((extent.width, extent.height), (1920, 100));
    }

    #[test]
    fn test_extent_sweep() {
        let sizes = [0, 1, 2, 99, 100, 640, 1079, 1080, 1920, 4096, 16384, u32::MAX - 1];
        let bounds = [(1, 1), (1, 4096), (100, 1080), (640, 640), (1080, 1920), (0, u32::MAX - 1)];

        for &(min, max) in &bounds {
            for &w in &sizes {
                for &h in &sizes {
                    let window = vk::Extent2D { width: w, height: h };

                    let undefined = caps((u32::MAX, u32::MAX), (min, min), (max, max));
                    let extent = choose_swap_extent(&undefined, window);
                    assert!((min..=max).contains(&extent.width), "{w}x{h} in {min}..={max}");
                    assert!((min..=max).contains(&extent.height), "{w}x{h} in {min}..={max}");
                    if (min..=max).contains(&w) {
                        assert_eq!(extent.width, w);
                    }
                    if (min..=max).contains(&h) {
                        assert_eq!(extent.height, h);
                    }
                    if min == max {
                        assert_eq!((extent.width, extent.height), (min, min));
                    }

                    let defined = caps((min.max(1), max.max(1)), (min, min), (max, max));
                    let extent = choose_swap_extent(&defined, window);
                    assert_eq!((extent.width, extent.height), (min.max(1), max.max(1)));
                }
            }
        }
    }

    #[test]
    fn test_extent_with_inverted_bounds_does_not_panic() {
        let c = caps((u32::MAX, u32::MAX), (800, 600), (400, 300));
        let extent = choose_swap_extent(&c, vk::Extent2D { width: 1000, height: 10 });
        assert_eq!((extent.width, extent.height), (400, 300));
    }

    #[test]
    fn test_image_count() {
        let mut c = caps((800, 600), (1, 1), (800, 600));
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
    }

    #[test]
    fn test_sharing_mode_for_split_families() {
        assert_eq!(sharing_for(0, 0), (vk::SharingMode::EXCLUSIVE, Vec::new()));
        assert_eq!(sharing_for(0, 2), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }
}
