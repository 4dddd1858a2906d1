//! Deferred shading demo
//!
//! Drives the renderer from a GLFW loop: a ring of procedurally generated cubes lit
//! by four orbiting point lights. Reads `renderer.toml` from the working directory
//! when present.

use deferred_engine::config::{Config, RendererConfig};
use deferred_engine::foundation::logging::{self, FacadeSink, Level, LogSink, RenderLog};
use deferred_engine::foundation::math::{Quat, Vec3};
use deferred_engine::render::vulkan::{PixelData, VertexLayout, VulkanError, VulkanResult, Window};
use deferred_engine::render::{
    Camera, DeferredRenderer, FrameOutcome, MeshCache, MeshData, ModelInstance, ModelKey, ModelStore, PointLight, Scene,
};
use glfw::{Action, Key, WindowEvent};
use native_dialog::{MessageDialog, MessageType};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

const CONFIG_PATH: &str = "renderer.toml";
const CUBE_COUNT: usize = 10;
const RING_RADIUS: f32 = 4.0;

struct DemoApp {
    scene: Scene,
    camera: Camera,
    cube: ModelKey,
    models: ModelStore,
    meshes: MeshCache,
    renderer: DeferredRenderer,
    window: Window,
    focus_freeze: bool,
    focused: bool,
    log: RenderLog,
}

impl DemoApp {
    fn new(config: RendererConfig, log: RenderLog) -> Result<Self, Box<dyn std::error::Error>> {
        let focus_freeze = config.window.focus_freeze;
        let mut window = Window::new(&config.window)?;
        let mut renderer = DeferredRenderer::new(config, &mut window, log.with_target("deferred_engine"))?;

        let mut meshes = MeshCache::new();
        let mesh = meshes.get_or_load(Path::new("procedural/cube"), |_| renderer.upload_mesh(&cube_mesh()?))?;

        let diffuse = PixelData::try_from(checkerboard(64, 8))?;
        let textures = renderer.upload_material(
            &diffuse,
            &PixelData::flat_normal(),
            &PixelData::default_material(),
            true,
        )?;
        let mut models = ModelStore::new();
        let cube = renderer.create_model(&mut models, Rc::clone(&mesh), textures)?;

        let extent = renderer.extent();
        let mut camera = Camera::perspective(
            Vec3::new(0.0, 4.0, 10.0),
            60.0,
            extent.width as f32 / extent.height.max(1) as f32,
            0.1,
            100.0,
        );
        camera.look_at(Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0));

        log.info(format_args!(
            "Demo ready: cube {:?} with size {:?}",
            cube,
            mesh.dimensions().map(|d| d.size())
        ));

        Ok(Self {
            scene: Scene::new(),
            camera,
            cube,
            models,
            meshes,
            renderer,
            window,
            focus_freeze,
            focused: true,
            log,
        })
    }

    fn run(&mut self) -> VulkanResult<()> {
        let start = self.window.time();
        let mut frames = 0u64;

        while !self.window.should_close() {
            if self.focus_freeze && !self.focused {
                self.window.wait_events();
            } else {
                self.window.poll_events();
            }
            self.handle_events();
            if self.focus_freeze && !self.focused {
                continue;
            }

            let elapsed = (self.window.time() - start) as f32;
            self.populate_scene(elapsed);

            let stats = self.scene.render(&mut self.renderer, &self.camera, &self.models)?;
            match stats.outcome {
                FrameOutcome::Presented => frames += 1,
                FrameOutcome::Recreated => {
                    frames += 1;
                    let extent = self.renderer.extent();
                    self.camera.update_aspect_ratio(extent.width, extent.height);
                }
                FrameOutcome::Dropped => self.log.debug("Frame dropped"),
                // minimized: block rather than spin
                FrameOutcome::Skipped => self.window.wait_events(),
            }
        }

        let released = self.renderer.destroy_all_models(&mut self.models)?;
        self.log.debug(format_args!("Released {released} models"));
        let seconds = self.window.time() - start;
        if seconds > 0.0 {
            self.log.info(format_args!(
                "{frames} frames in {seconds:.1}s ({:.1} fps), {} meshes cached",
                frames as f64 / seconds,
                self.meshes.len()
            ));
        }
        Ok(())
    }

    fn handle_events(&mut self) {
        let events: Vec<_> = self.window.flush_events().map(|(_, event)| event).collect();
        for event in events {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) | WindowEvent::Close => {
                    self.window.set_should_close(true);
                }
                WindowEvent::FramebufferSize(width, height) => {
                    let (width, height) = (width.max(0).unsigned_abs(), height.max(0).unsigned_abs());
                    self.renderer.notify_resized(width, height);
                    self.camera.update_aspect_ratio(width, height);
                }
                WindowEvent::Focus(focused) => {
                    self.focused = focused;
                    self.log.debug(format_args!("Window focus: {focused}"));
                }
                _ => {}
            }
        }
    }

    fn populate_scene(&mut self, elapsed: f32) {
        for i in 0..CUBE_COUNT {
            let angle = i as f32 / CUBE_COUNT as f32 * std::f32::consts::TAU;
            let position = Vec3::new(angle.cos() * RING_RADIUS, 0.0, angle.sin() * RING_RADIUS);
            let spin = Quat::from_axis_angle(&Vec3::y_axis(), elapsed + angle);
            self.scene.submit_instance(ModelInstance {
                model: self.cube,
                position,
                rotation: spin,
            });
        }

        let colors = [
            Vec3::new(1.0, 0.3, 0.3),
            Vec3::new(0.3, 1.0, 0.3),
            Vec3::new(0.3, 0.3, 1.0),
            Vec3::new(1.0, 1.0, 0.8),
        ];
        for (i, color) in colors.into_iter().enumerate() {
            let angle = elapsed * 0.5 + i as f32 * std::f32::consts::FRAC_PI_2;
            let position = Vec3::new(angle.cos() * 6.0, 2.0, angle.sin() * 6.0);
            self.scene.submit_light(PointLight::new(position, color, 9.0));
        }
    }
}

/// Unit cube with per-face normals, tangents and UVs in the standard layout
fn cube_mesh() -> VulkanResult<MeshData> {
    // (normal, tangent) per face; bitangent = normal x tangent
    let faces = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0]),
    ];
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    let mut vertices = Vec::with_capacity(faces.len() * 4 * 11);
    let mut indices = Vec::with_capacity(faces.len() * 6);
    for (face, (normal, tangent)) in faces.iter().enumerate() {
        let n = Vec3::from(*normal);
        let t = Vec3::from(*tangent);
        let b = n.cross(&t);
        for (u, v) in corners {
            let p = (n + t * u + b * v) * 0.5;
            vertices.extend_from_slice(&[p.x, p.y, p.z, (u + 1.0) * 0.5, (1.0 - v) * 0.5]);
            vertices.extend_from_slice(normal);
            vertices.extend_from_slice(tangent);
        }
        let base = u32::try_from(face * 4).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("cube face {face} overflows the index range"),
        })?;
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::new(vertices, VertexLayout::standard(), indices)
}

fn checkerboard(size: u32, cells: u32) -> image::RgbaImage {
    let cell = (size / cells.max(1)).max(1);
    image::RgbaImage::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            image::Rgba([230, 230, 230, 255])
        } else {
            image::Rgba([60, 90, 140, 255])
        }
    })
}

/// Console logging plus a blocking error dialog for fatal errors
struct DialogSink;

impl LogSink for DialogSink {
    fn write(&self, level: Level, target: &str, message: &str) {
        FacadeSink.write(level, target, message);
    }

    fn alert(&self, _target: &str, message: &str) {
        let shown = MessageDialog::new()
            .set_type(MessageType::Error)
            .set_title("Deferred Demo")
            .set_text(message)
            .show_alert();
        if let Err(e) = shown {
            log::warn!("Could not show error dialog: {e}");
        }
    }
}

fn load_config(log: &RenderLog) -> RendererConfig {
    if !Path::new(CONFIG_PATH).exists() {
        return RendererConfig::new("Deferred Demo");
    }
    match RendererConfig::load_from_file(CONFIG_PATH) {
        Ok(config) => {
            log.info(format_args!("Loaded {CONFIG_PATH}"));
            config
        }
        Err(e) => {
            log.warn(format_args!("Ignoring {CONFIG_PATH}: {e}"));
            RendererConfig::new("Deferred Demo")
        }
    }
}

fn main() {
    logging::init_with_level(log::LevelFilter::Info);
    let log = RenderLog::new(Arc::new(DialogSink)).with_target("deferred_demo");

    let config = load_config(&log);
    log.info(format_args!(
        "Starting {} with {} frames in flight",
        config.application_name, config.frames_in_flight
    ));

    let mut app = match DemoApp::new(config, log.clone()) {
        Ok(app) => app,
        Err(e) => log.fatal(format_args!("Renderer initialization failed: {e}")),
    };

    if let Err(e) = app.run() {
        log.fatal(format_args!("Frame failed: {e}"));
    }
    log.info("Demo finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_mesh_indices_cover_every_face() {
        let cube = cube_mesh().unwrap();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.indices().len(), 36);
        assert_eq!(cube.indices().iter().max(), Some(&23));
    }

    #[test]
    fn test_checkerboard_converts_to_pixels() {
        let pixels = PixelData::try_from(checkerboard(16, 4)).unwrap();
        assert_eq!((pixels.width(), pixels.height()), (16, 16));
    }
}
