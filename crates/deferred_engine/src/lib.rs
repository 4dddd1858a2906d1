//! # Deferred Engine
//!
//! The GPU core of a Vulkan deferred-shading renderer.
//!
//! ## Features
//!
//! - **Device bring-up**: instance, optional validation, adapter selection and queues
//! - **Swapchain management**: format and present-mode policy, rebuilds on resize
//! - **G-buffer geometry pass**: per-instance secondary command buffers
//! - **Point-light lighting pass**: one additive fullscreen draw per light
//! - **Frames in flight**: fence and semaphore ring with a bounded GPU wait
//! - **Configuration**: TOML or RON renderer settings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deferred_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     deferred_engine::foundation::logging::init();
//!     let config = RendererConfig::new("Quick Start");
//!     let mut window = Window::new(&config.window)?;
//!     let mut renderer = DeferredRenderer::new(config, &mut window, RenderLog::facade())?;
//!
//!     let mut models = ModelStore::new();
//!     let mesh = std::rc::Rc::new(renderer.upload_mesh(&MeshData::new(
//!         vec![0.0; 11 * 3],
//!         VertexLayout::standard(),
//!         vec![0, 1, 2],
//!     )?)?);
//!     let textures = renderer.placeholder_material()?;
//!     let triangle = renderer.create_model(&mut models, mesh, textures)?;
//!
//!     let camera = Camera::default();
//!     let mut scene = Scene::new();
//!     while !window.should_close() {
//!         window.poll_events();
//!         scene.submit_instance(ModelInstance::at(triangle, Vec3::zeros()));
//!         scene.submit_light(PointLight::new(Vec3::new(0.0, 2.0, 2.0), Vec3::new(1.0, 1.0, 1.0), 10.0));
//!         scene.render(&mut renderer, &camera, &models)?;
//!     }
//!     renderer.destroy_all_models(&mut models)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, GraphicsSettings, RendererConfig, ShaderPaths, WindowMode, WindowSettings},
        foundation::{
            logging::RenderLog,
            math::{Mat4, Quat, Transform, Vec3},
        },
        render::{
            vulkan::{PixelData, SurfaceSource, VertexComponent, VertexLayout, VulkanError, VulkanResult, Window},
            Camera, DeferredRenderer, FrameOutcome, FrameStats, MaterialTextures, MeshCache, MeshData, ModelInstance,
            ModelKey, ModelStore, PointLight, Scene,
        },
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_lint_levels_come_from_workspace() {
        let crate_attrs = include_str!("lib.rs")
            .lines()
            .filter(|line| line.starts_with("#!["))
            .count();
        assert_eq!(crate_attrs, 0, "lint levels belong in the workspace [lints] table");

        let manifest = include_str!("../Cargo.toml");
        assert!(manifest.contains("[lints]\nworkspace = true"));
    }
}
