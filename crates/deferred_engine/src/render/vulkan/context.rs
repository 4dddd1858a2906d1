//! Vulkan context management
//!
//! Instance, validation layers, physical device selection and the logical device.
//! [`DeviceContext`] owns all of it together with the presentation surface and is
//! the first thing created and the last thing destroyed.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};
use thiserror::Error;

use super::window::{SurfaceSource, WindowError};
use crate::config::{GraphicsSettings, ValidationCategory, ValidationSeverity};
use crate::foundation::logging::{Level, RenderLog};

/// Name of the Khronos validation layer
pub const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Score bonus for discrete adapters
pub const DISCRETE_GPU_BONUS: u32 = 500;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The Vulkan loader could not be found
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No adapter met the renderer's requirements
    #[error("No suitable physical device found")]
    NoSuitableDevice,

    /// Validation was requested but the layer is not installed
    #[error("Validation layer {0} is not available")]
    MissingValidationLayer(String),

    /// A required instance or device extension is missing
    #[error("Required extension {0} is not supported")]
    MissingExtension(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// None of the candidate formats support the requested features
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Shader binary could not be read or turned into a module
    #[error("Shader error: {0}")]
    Shader(String),

    /// Graphics pipeline creation failed
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The identifier of the resource
        id: String,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Windowing layer failure
    #[error(transparent)]
    Window(#[from] WindowError),
}

impl VulkanError {
    /// Whether the error leaves the GPU context in a state that cannot continue
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidOperation { .. } | Self::ResourceNotFound { .. })
    }

    /// Map an allocation result, keeping the requested size for out-of-memory codes
    pub fn from_allocation(result: vk::Result, requested: u64) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfMemory { requested }
            }
            other => Self::Api(other),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
    // Referenced by the callback through p_user_data; must outlive the messenger
    _log: Box<RenderLog>,
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
}

impl VulkanInstance {
    /// Create an instance with the extensions `window` needs and, when enabled, validation
    pub fn new(
        window: &dyn SurfaceSource,
        app_name: &str,
        graphics: &GraphicsSettings,
        log: &RenderLog,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| VulkanError::Loading(e.to_string()))?;
        let validation = graphics.validation_enabled();

        if validation {
            let layers = entry
                .enumerate_instance_layer_properties()
                .map_err(VulkanError::Api)?;
            if !layers.iter().any(|layer| fixed_name_matches(&layer.layer_name, VALIDATION_LAYER)) {
                return Err(VulkanError::MissingValidationLayer(
                    VALIDATION_LAYER.to_string_lossy().into_owned(),
                ));
            }
        }

        let app_name_cstr = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name_cstr = CString::new("DeferredEngine")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let window_extensions = window.required_instance_extensions()?;
        let mut extensions: Vec<*const c_char> = window_extensions.iter().map(|ext| ext.as_ptr()).collect();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::Api)?;

        let debug = if validation {
            match Self::setup_debug_messenger(&entry, &instance, graphics, log) {
                Ok(debug) => Some(debug),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log.info(format_args!(
            "Vulkan instance created (validation {})",
            if validation { "enabled" } else { "disabled" }
        ));

        Ok(Self { entry, instance, debug })
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &Instance,
        graphics: &GraphicsSettings,
        log: &RenderLog,
    ) -> VulkanResult<DebugMessenger> {
        let loader = DebugUtils::new(entry, instance);
        let user_log = Box::new(log.with_target("vulkan"));
        let user_data = std::ptr::addr_of!(*user_log).cast_mut().cast::<std::ffi::c_void>();

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(severity_flags(graphics.validation))
            .message_type(category_flags(graphics.validation_category))
            .pfn_user_callback(Some(debug_callback))
            .user_data(user_data);

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(DebugMessenger {
            loader,
            messenger,
            _log: user_log,
        })
    }

    /// Vulkan entry points
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance handle and function table
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Map the configured severity filter onto debug-utils flags
pub fn severity_flags(severity: ValidationSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let mut flags = vk::DebugUtilsMessageSeverityFlagsEXT::empty();
    if severity.contains(ValidationSeverity::VERBOSE) {
        flags |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }
    if severity.contains(ValidationSeverity::INFO) {
        flags |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
    }
    if severity.contains(ValidationSeverity::WARNING) {
        flags |= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
    }
    if severity.contains(ValidationSeverity::ERROR) {
        flags |= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    }
    flags
}

/// Map the configured category filter onto debug-utils flags
pub fn category_flags(category: ValidationCategory) -> vk::DebugUtilsMessageTypeFlagsEXT {
    let mut flags = vk::DebugUtilsMessageTypeFlagsEXT::empty();
    if category.contains(ValidationCategory::GENERAL) {
        flags |= vk::DebugUtilsMessageTypeFlagsEXT::GENERAL;
    }
    if category.contains(ValidationCategory::VALIDATION) {
        flags |= vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;
    }
    if category.contains(ValidationCategory::PERFORMANCE) {
        flags |= vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    }
    flags
}

/// Log level for a validation message severity
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Level::Info
    } else {
        Level::Debug
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };
    let level = severity_level(message_severity);

    match user_data.cast::<RenderLog>().as_ref() {
        Some(log) => log.log(level, format_args!("[Vulkan] {message_type:?} - {message}")),
        None => log::log!(level, "[Vulkan] {:?} - {}", message_type, message),
    }

    vk::FALSE
}

fn fixed_name_matches(raw: &[c_char], name: &CStr) -> bool {
    let wanted = name.to_bytes();
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    len == wanted.len() && raw[..len].iter().zip(wanted).all(|(&a, &b)| a as u8 == b)
}

/// Graphics and present queue family indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family with graphics support
    pub graphics: Option<u32>,
    /// Family that can present to the surface
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both families were found
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Pick families from the device's list, preferring one family that does both
    pub fn find(families: &[vk::QueueFamilyProperties], supports_present: impl Fn(u32) -> bool) -> Self {
        let mut indices = Self::default();

        for (index, family) in (0u32..).zip(families) {
            if family.queue_count == 0 {
                continue;
            }
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = supports_present(index);

            if graphics && present {
                return Self {
                    graphics: Some(index),
                    present: Some(index),
                };
            }
            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if present && indices.present.is_none() {
                indices.present = Some(index);
            }
        }

        indices
    }
}

/// Properties that decide how attractive an adapter is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Discrete, integrated, virtual, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Largest supported 2D texture dimension
    pub max_image_dimension_2d: u32,
    /// Anisotropic filtering support
    pub sampler_anisotropy: bool,
}

/// Rank an adapter; zero means unusable
pub fn rate_device(candidate: &DeviceCandidate) -> u32 {
    if !candidate.sampler_anisotropy {
        return 0;
    }
    let mut score = candidate.max_image_dimension_2d;
    if candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score = score.saturating_add(DISCRETE_GPU_BONUS);
    }
    score
}

/// Highest-scoring entry with a non-zero score
pub fn pick_highest_score<T>(candidates: impl IntoIterator<Item = (u32, T)>) -> Option<T> {
    candidates
        .into_iter()
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, item)| item)
}

/// Evaluate every adapter. Ones that fail to answer a query are skipped with a warning
/// so that a single broken driver does not hide the rest.
pub fn gather_candidates<D: Copy, T>(
    devices: impl IntoIterator<Item = D>,
    mut evaluate: impl FnMut(D) -> VulkanResult<Option<(u32, T)>>,
    mut name: impl FnMut(D) -> String,
    log: &RenderLog,
) -> Vec<(u32, T)> {
    let mut candidates = Vec::new();
    for device in devices {
        match evaluate(device) {
            Ok(Some(candidate)) => candidates.push(candidate),
            Ok(None) => log.debug(format_args!("Rejected adapter {}", name(device))),
            Err(e) => log.warn(format_args!("Skipping adapter {}: {e}", name(device))),
        }
    }
    candidates
}

/// Report a failed idle wait from a destructor, where the error cannot be returned
pub fn report_idle_failure(log: &RenderLog, owner: &str, result: Result<(), vk::Result>) {
    if let Err(e) = result {
        log.warn(format_args!("wait_idle failed while dropping {owner}: {e}"));
    }
}

/// Find memory type with required properties
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// First candidate whose tiling features contain `features`
pub fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: impl Fn(vk::Format) -> vk::FormatProperties,
) -> VulkanResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties_of(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| VulkanError::UnsupportedFormat(format!("none of {candidates:?} support {features:?}")))
}

/// Whether a depth format also carries a stencil aspect
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(format, vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT)
}

/// Highest sample count usable for both color and depth framebuffers
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Ranking score the device was selected with
    pub score: u32,
}

impl PhysicalDeviceInfo {
    /// Select the highest-ranked suitable adapter
    pub fn select(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        log: &RenderLog,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;
        if devices.is_empty() {
            return Err(VulkanError::NoSuitableDevice);
        }

        let candidates = gather_candidates(
            devices,
            |device| {
                Ok(Self::evaluate(instance, device, surface, surface_loader)?.map(|info| (info.score, info)))
            },
            |device| device_name(instance, device),
            log,
        );

        let info = pick_highest_score(candidates).ok_or(VulkanError::NoSuitableDevice)?;
        let vram_mib = info.memory_properties.memory_heaps[0].size / 1024 / 1024;
        log.info(format_args!(
            "Picked physical device: {} with {}MB VRAM (score {})",
            device_name(instance, info.device),
            vram_mib,
            info.score
        ));
        Ok(info)
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let indices = QueueFamilyIndices::find(&queue_families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        });
        let (Some(graphics_family), Some(present_family)) = (indices.graphics, indices.present) else {
            return Ok(None);
        };

        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.map_err(VulkanError::Api)?;
        let has_swapchain = extensions
            .iter()
            .any(|ext| fixed_name_matches(&ext.extension_name, SwapchainLoader::name()));
        if !has_swapchain {
            return Ok(None);
        }

        let formats = unsafe { surface_loader.get_physical_device_surface_formats(device, surface) }
            .map_err(VulkanError::Api)?;
        let present_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface) }
            .map_err(VulkanError::Api)?;
        if formats.is_empty() || present_modes.is_empty() {
            return Ok(None);
        }

        let score = rate_device(&DeviceCandidate {
            device_type: properties.device_type,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        });
        if score == 0 {
            return Ok(None);
        }

        Ok(Some(Self {
            device,
            properties,
            features,
            memory_properties,
            graphics_family,
            present_family,
            score,
        }))
    }
}

fn device_name(instance: &Instance, device: vk::PhysicalDevice) -> String {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with required queues
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let unique_families: HashSet<u32> = [physical.graphics_family, physical.present_family].into_iter().collect();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true).build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device =
            unsafe { instance.create_device(physical.device, &create_info, None) }.map_err(VulkanError::Api)?;

        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        // the owning DeviceContext waits for idle before its fields drop
        unsafe { self.device.destroy_device(None) };
    }
}

/// Owner of the instance, surface, adapter and logical device.
///
/// Field order is drop order: the surface goes in `Drop`, then the logical device,
/// then the instance.
pub struct DeviceContext {
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    physical: PhysicalDeviceInfo,
    depth_format: vk::Format,
    device: LogicalDevice,
    instance: VulkanInstance,
    log: RenderLog,
}

impl DeviceContext {
    /// Bring up Vulkan for `window`
    pub fn new(
        window: &mut dyn SurfaceSource,
        app_name: &str,
        graphics: &GraphicsSettings,
        log: RenderLog,
    ) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, graphics, &log)?;

        let surface_loader = Surface::new(instance.entry(), instance.instance());
        let surface = window.create_surface(instance.entry(), instance.instance())?;

        let physical = match PhysicalDeviceInfo::select(instance.instance(), surface, &surface_loader, &log) {
            Ok(physical) => physical,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let depth_format = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| unsafe {
                instance
                    .instance()
                    .get_physical_device_format_properties(physical.device, format)
            },
        )
        .and_then(|format| Ok((format, LogicalDevice::new(instance.instance(), &physical)?)));
        let (depth_format, device) = match depth_format {
            Ok(created) => created,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        log.debug(format_args!(
            "Queue families: graphics {}, present {}; depth format {:?}",
            physical.graphics_family, physical.present_family, depth_format
        ));

        Ok(Self {
            surface,
            surface_loader,
            physical,
            depth_format,
            device,
            instance,
            log,
        })
    }

    /// Vulkan entry points
    pub fn entry(&self) -> &Entry {
        self.instance.entry()
    }

    /// Instance handle and function table
    pub fn instance(&self) -> &Instance {
        self.instance.instance()
    }

    /// Logical device function table
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Cloned device handle for RAII wrappers
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Selected adapter
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Presentation surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Queue used for all rendering submissions
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Queue used for presentation
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Graphics and present families; they may differ
    pub fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: Some(self.physical.graphics_family),
            present: Some(self.physical.present_family),
        }
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> u32 {
        self.physical.graphics_family
    }

    /// Present queue family index
    pub fn present_family(&self) -> u32 {
        self.physical.present_family
    }

    /// Depth format discovered at startup
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Highest MSAA level usable for color and depth together
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        max_usable_sample_count(&self.physical.properties.limits)
    }

    /// Device limit for sampler anisotropy
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.physical.properties.limits.max_sampler_anisotropy
    }

    /// Format feature support on the selected adapter
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance()
                .get_physical_device_format_properties(self.physical.device, format)
        }
    }

    /// Memory type index for an allocation
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.physical.memory_properties, type_filter, properties)
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle() }.map_err(VulkanError::Api)
    }

    /// Logging handle shared with dependent components
    pub fn log(&self) -> &RenderLog {
        &self.log
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        report_idle_failure(&self.log, "device context", unsafe { self.device.device.device_wait_idle() });
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::logging::MemorySink;
    use std::sync::Arc;

    #[test]
    fn test_failing_adapter_is_skipped() {
        let sink = Arc::new(MemorySink::new());
        let log = RenderLog::new(sink.clone());

        let candidates = gather_candidates(
            [0u32, 1, 2],
            |id| match id {
                0 => Err(VulkanError::Api(vk::Result::ERROR_INITIALIZATION_FAILED)),
                1 => Ok(None),
                _ => Ok(Some((500, "discrete"))),
            },
            |id| format!("adapter {id}"),
            &log,
        );

        assert_eq!(pick_highest_score(candidates), Some("discrete"));
        assert_eq!(sink.count(Level::Warn), 1);
        assert_eq!(sink.count(Level::Debug), 1);
        assert!(sink.records()[0].1.contains("adapter 0"));
    }

    #[test]
    fn test_idle_failure_is_logged() {
        let sink = Arc::new(MemorySink::new());
        let log = RenderLog::new(sink.clone());

        report_idle_failure(&log, "command pool", Ok(()));
        assert!(sink.records().is_empty());

        report_idle_failure(&log, "command pool", Err(vk::Result::ERROR_DEVICE_LOST));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, Level::Warn);
        assert!(records[0].1.contains("command pool"));
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_rate_device_prefers_discrete() {
        let integrated = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            max_image_dimension_2d: 16384,
            sampler_anisotropy: true,
        };
        let discrete = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..integrated
        };
        assert_eq!(rate_device(&integrated), 16384);
        assert_eq!(rate_device(&discrete), 16384 + DISCRETE_GPU_BONUS);
    }

    #[test]
    fn test_rate_device_rejects_missing_anisotropy() {
        let candidate = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            max_image_dimension_2d: 32768,
            sampler_anisotropy: false,
        };
        assert_eq!(rate_device(&candidate), 0);
    }

    #[test]
    fn test_pick_highest_score() {
        assert_eq!(pick_highest_score(vec![(10, "a"), (900, "b"), (20, "c")]), Some("b"));
        assert_eq!(pick_highest_score(vec![(0, "a"), (0, "b")]), None);
        assert_eq!(pick_highest_score(Vec::<(u32, &str)>::new()), None);
    }

    #[test]
    fn test_queue_families_prefer_shared_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i != 0);
        assert_eq!(indices.graphics, Some(2));
        assert_eq!(indices.present, Some(2));
    }

    #[test]
    fn test_queue_families_may_be_distinct() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |i| i == 1);
        assert!(indices.is_complete());
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn test_queue_families_incomplete_without_present() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_find_memory_type_respects_filter_and_flags() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, host).ok(), Some(1));
        assert_eq!(
            find_memory_type(&props, 0b101, vk::MemoryPropertyFlags::HOST_VISIBLE).ok(),
            Some(2)
        );
        assert!(matches!(
            find_memory_type(&props, 0b001, host),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_pick_supported_depth_format() {
        let format = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| vk::FormatProperties {
                optimal_tiling_features: if format == vk::Format::D24_UNORM_S8_UINT {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::FormatFeatureFlags::empty()
                },
                ..Default::default()
            },
        );
        assert_eq!(format.ok(), Some(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_pick_supported_format_fails_when_nothing_matches() {
        let result = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties::default(),
        );
        assert!(matches!(result, Err(VulkanError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_max_usable_sample_count() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            max_usable_sample_count(&vk::PhysicalDeviceLimits::default()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_validation_filters() {
        let severity = severity_flags(ValidationSeverity::WARNING | ValidationSeverity::ERROR);
        assert_eq!(
            severity,
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        );
        assert_eq!(
            category_flags(ValidationCategory::all()),
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
        );
        assert!(severity_flags(ValidationSeverity::empty()).is_empty());
    }

    #[test]
    fn test_severity_level_mapping() {
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), Level::Error);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING), Level::Warn);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO), Level::Info);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), Level::Debug);
    }

    #[test]
    fn test_fixed_name_matches() {
        let mut raw = [0 as c_char; 64];
        for (slot, byte) in raw.iter_mut().zip(b"VK_LAYER_KHRONOS_validation") {
            *slot = *byte as c_char;
        }
        assert!(fixed_name_matches(&raw, VALIDATION_LAYER));
        assert!(!fixed_name_matches(&raw, CStr::from_bytes_with_nul(b"VK_LAYER_KHRONOS\0").unwrap()));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(VulkanError::NoSuitableDevice.is_fatal());
        assert!(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).is_fatal());
        assert!(!VulkanError::InvalidOperation { reason: "x".into() }.is_fatal());
        assert!(matches!(
            VulkanError::from_allocation(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, 4096),
            VulkanError::OutOfMemory { requested: 4096 }
        ));
    }
}
