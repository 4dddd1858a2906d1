//! Vulkan rendering backend
//!
//! Thin RAII wrappers over ash. Every wrapper holds a cloned `ash::Device` and
//! releases its handles on drop; owners order their fields so children drop
//! before parents.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor_set;
pub mod image;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex_layout;
pub mod window;

pub use buffer::{Buffer, IndexBuffer, UniformBuffer, VertexBuffer};
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use context::{DeviceContext, LogicalDevice, PhysicalDeviceInfo, VulkanError, VulkanInstance, VulkanResult};
pub use descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter};
pub use image::{Image, ImageRole, PixelData};
pub use pipeline::{BlendMode, GraphicsPipeline, PipelineBuilder, PipelineLayout};
pub use render_pass::{Framebuffer, RenderPass};
pub use shader::{ShaderCode, ShaderModule, ShaderSet};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameRing, FrameSync, Semaphore};
pub use vertex_layout::{VertexComponent, VertexLayout};
pub use window::{RawWindowSurface, SurfaceSource, Window, WindowError};
