//! Per-frame scene submission
//!
//! The renderer keeps no scene state between frames. A [`Scene`] collects the
//! instances and lights for one frame, hands them over, and starts empty again.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Quat, Transform, Vec3};

use super::camera::Camera;
use super::frame::FrameStats;
use super::model::{ModelKey, ModelStore};
use super::renderer::DeferredRenderer;
use super::vulkan::VulkanResult;

/// One placement of a stored model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInstance {
    /// Model to draw; skipped if it has been removed from the store
    pub model: ModelKey,
    /// World-space position
    pub position: Vec3,
    /// World-space orientation
    pub rotation: Quat,
}

impl ModelInstance {
    /// Instance at `position` with no rotation
    pub fn at(model: ModelKey, position: Vec3) -> Self {
        Self {
            model,
            position,
            rotation: Quat::identity(),
        }
    }

    /// World transform pushed to the geometry vertex shader
    pub fn world_matrix(&self) -> Mat4 {
        Transform::from_position_rotation(self.position, self.rotation).to_matrix()
    }
}

/// Point light in the layout the lighting fragment shader reads.
///
/// `vec4 position; vec3 color; float radius;` with no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    /// World-space position; `w` is unused
    pub position: [f32; 4],
    /// Linear RGB color
    pub color: [f32; 3],
    /// Distance at which the light's contribution reaches zero
    pub radius: f32,
}

impl PointLight {
    /// Light at `position` with `color` and `radius`
    pub fn new(position: Vec3, color: Vec3, radius: f32) -> Self {
        Self {
            position: [position.x, position.y, position.z, 0.0],
            color: [color.x, color.y, color.z],
            radius,
        }
    }

    /// Copy prepared for the push constant: the lighting shader expects Y negated
    pub fn to_push_constant(&self) -> Self {
        let mut light = *self;
        light.position[1] = -light.position[1];
        light
    }
}

/// Instances and lights for the next frame
#[derive(Debug, Default)]
pub struct Scene {
    instances: Vec<ModelInstance>,
    lights: Vec<PointLight>,
}

impl Scene {
    /// Empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an instance for the next frame
    pub fn submit_instance(&mut self, instance: ModelInstance) {
        self.instances.push(instance);
    }

    /// Queue a light for the next frame
    pub fn submit_light(&mut self, light: PointLight) {
        self.lights.push(light);
    }

    /// Instances queued so far
    pub fn instances(&self) -> &[ModelInstance] {
        &self.instances
    }

    /// Lights queued so far
    pub fn lights(&self) -> &[PointLight] {
        &self.lights
    }

    /// Remove and return everything queued
    pub fn take(&mut self) -> (Vec<ModelInstance>, Vec<PointLight>) {
        (std::mem::take(&mut self.instances), std::mem::take(&mut self.lights))
    }

    /// Render the queued work. The scene is empty afterwards, whether or not rendering succeeded.
    pub fn render(
        &mut self,
        renderer: &mut DeferredRenderer,
        camera: &Camera,
        models: &ModelStore,
    ) -> VulkanResult<FrameStats> {
        let (instances, lights) = self.take();
        renderer.render(camera, &instances, &lights, models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::foundation::math::Vec4;

    fn some_key() -> ModelKey {
        let mut store: ModelStore<()> = ModelStore::new();
        store.insert(())
    }

    #[test]
    fn test_point_light_is_32_bytes() {
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 0.25, 1.0), 8.0);
        let bytes = bytemuck::bytes_of(&light);
        assert_eq!(bytes.len(), 32);
        let floats: &[f32] = bytemuck::cast_slice(bytes);
        assert_eq!(floats, &[1.0, 2.0, 3.0, 0.0, 0.5, 0.25, 1.0, 8.0]);
    }

    #[test]
    fn test_push_constant_negates_y_only() {
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 1.0, 1.0), 5.0);
        let pushed = light.to_push_constant();
        assert_eq!(pushed.position, [1.0, -2.0, 3.0, 0.0]);
        assert_eq!(pushed.color, light.color);
        assert_eq!(pushed.radius, light.radius);
        // the stored light is untouched
        assert_eq!(light.position[1], 2.0);
    }

    #[test]
    fn test_instance_world_matrix_translates() {
        let instance = ModelInstance::at(some_key(), Vec3::new(4.0, -1.0, 2.0));
        let origin = instance.world_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin, Vec4::new(4.0, -1.0, 2.0, 1.0));
    }

    #[test]
    fn test_take_clears_submissions() {
        let key = some_key();
        let mut scene = Scene::new();
        for i in 0..10 {
            scene.submit_instance(ModelInstance::at(key, Vec3::new(i as f32, 0.0, 0.0)));
        }
        for _ in 0..4 {
            scene.submit_light(PointLight::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), 3.0));
        }

        let (instances, lights) = scene.take();
        assert_eq!(instances.len(), 10);
        assert_eq!(lights.len(), 4);
        assert!(scene.instances().is_empty());
        assert!(scene.lights().is_empty());
    }
}
