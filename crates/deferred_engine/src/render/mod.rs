//! # Rendering
//!
//! Two-pass deferred shading on Vulkan.
//!
//! - **Geometry pass**: rasterizes every model instance into a G-buffer of world
//!   position, normal, albedo and material targets plus depth
//! - **Lighting pass**: samples the G-buffer once per point light and blends the
//!   results additively into the swapchain image
//! - **Orchestration**: [`DeferredRenderer`] owns the device, swapchain, frame slots
//!   and both passes, and drives one frame per [`DeferredRenderer::render`] call
//!
//! The [`vulkan`] module holds the RAII wrappers everything above is built from.

pub mod camera;
pub mod frame;
pub mod geometry_pass;
pub mod lighting_pass;
pub mod model;
pub mod renderer;
pub mod scene;
pub mod vulkan;

pub use camera::Camera;
pub use frame::{FrameOutcome, FrameState, FrameStats};
pub use geometry_pass::{GBuffer, GBufferTarget, GeometryPass};
pub use lighting_pass::LightingPass;
pub use model::{MaterialTextures, Mesh, MeshCache, MeshData, MeshDimensions, MeshPart, Model, ModelKey, ModelStore};
pub use renderer::DeferredRenderer;
pub use scene::{ModelInstance, PointLight, Scene};
