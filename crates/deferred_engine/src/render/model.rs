//! Meshes, materials and the model store
//!
//! Content arrives already decoded: a float stream in a declared
//! [`VertexLayout`], 32-bit indices and RGBA pixel buffers. This module validates
//! that data, uploads it, and keeps the uploaded results addressable.
//!
//! Ownership follows the scene's needs. A [`Mesh`] is shared between models via
//! `Rc` and cached by path in a [`MeshCache`] that never evicts. Every [`Model`]
//! lives in a [`ModelStore`]; instances refer to it through a generation-checked
//! [`ModelKey`], so a removed model can never be drawn through a stale key.

use ash::vk;
use slotmap::{new_key_type, SlotMap};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::foundation::math::Vec3;

use super::vulkan::{
    CommandPool, DeviceContext, Image, IndexBuffer, PixelData, VertexBuffer, VertexComponent, VertexLayout,
    VulkanError, VulkanResult,
};

/// Sub-range of a mesh drawn with one indexed draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshPart {
    /// First vertex of the part
    pub vertex_base: u32,
    /// Number of vertices the part uses
    pub vertex_count: u32,
    /// First index of the part
    pub index_base: u32,
    /// Number of indices in the part
    pub index_count: u32,
}

/// Axis-aligned bounds of a mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshDimensions {
    /// Smallest corner
    pub min: Vec3,
    /// Largest corner
    pub max: Vec3,
}

impl MeshDimensions {
    /// Extent along each axis
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Midpoint of the bounds
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// Vertex and index data ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    vertices: Vec<f32>,
    layout: VertexLayout,
    indices: Vec<u32>,
    parts: Vec<MeshPart>,
}

impl MeshData {
    /// Validate and wrap a float stream laid out as `layout`.
    ///
    /// The stream must hold a whole number of vertices and every index must
    /// address one of them.
    pub fn new(vertices: Vec<f32>, layout: VertexLayout, indices: Vec<u32>) -> VulkanResult<Self> {
        let floats_per_vertex = layout.floats_per_vertex() as usize;
        if floats_per_vertex == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "vertex layout has no components".to_string(),
            });
        }
        if vertices.is_empty() || vertices.len() % floats_per_vertex != 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "{} floats is not a whole number of {floats_per_vertex}-float vertices",
                    vertices.len()
                ),
            });
        }
        if indices.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "mesh has no indices".to_string(),
            });
        }

        let vertex_count = vertices.len() / floats_per_vertex;
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("index {bad} out of range for {vertex_count} vertices"),
            });
        }

        Ok(Self {
            vertices,
            layout,
            indices,
            parts: Vec::new(),
        })
    }

    /// Split the mesh into parts drawn separately.
    ///
    /// Each part's index range and vertex range must lie inside the mesh, and its
    /// indices, offset by `vertex_base`, must land inside its vertex range.
    pub fn with_parts(mut self, parts: Vec<MeshPart>) -> VulkanResult<Self> {
        for part in &parts {
            self.check_part(part)?;
        }
        self.parts = parts;
        Ok(self)
    }

    fn check_part(&self, part: &MeshPart) -> VulkanResult<()> {
        let out_of_range = |reason: String| Err(VulkanError::InvalidOperation { reason });

        let index_total = self.indices.len();
        let index_end = part.index_base.checked_add(part.index_count).map(|end| end as usize);
        let Some(index_end) = index_end.filter(|&end| end <= index_total) else {
            return out_of_range(format!(
                "mesh part indices {}+{} exceed the mesh's {index_total}",
                part.index_base, part.index_count
            ));
        };

        let vertex_total = self.vertex_count();
        let vertex_end = part.vertex_base.checked_add(part.vertex_count).map(|end| end as usize);
        let Some(vertex_end) = vertex_end.filter(|&end| end <= vertex_total) else {
            return out_of_range(format!(
                "mesh part vertices {}+{} exceed the mesh's {vertex_total}",
                part.vertex_base, part.vertex_count
            ));
        };

        if i32::try_from(part.vertex_base).is_err() {
            return out_of_range(format!("mesh part vertex base {} exceeds a draw's vertex offset", part.vertex_base));
        }

        let indices = &self.indices[part.index_base as usize..index_end];
        let stray = indices.iter().find(|&&i| {
            (i as usize)
                .checked_add(part.vertex_base as usize)
                .map_or(true, |v| v >= vertex_end)
        });
        if let Some(&bad) = stray {
            return out_of_range(format!(
                "mesh part index {bad} at vertex base {} falls outside vertices ..{vertex_end}",
                part.vertex_base
            ));
        }
        Ok(())
    }

    /// Raw float stream
    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    /// Layout of the float stream
    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// Index stream
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Declared parts; empty means one draw over every index
    pub fn parts(&self) -> &[MeshPart] {
        &self.parts
    }

    /// Number of whole vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / self.layout.floats_per_vertex() as usize
    }

    /// Bounds of the position component, if the layout has one
    pub fn dimensions(&self) -> Option<MeshDimensions> {
        let offset = self.layout.float_offset_of(VertexComponent::Position)? as usize;
        let stride = self.layout.floats_per_vertex() as usize;

        let mut min = Vec3::repeat(f32::MAX);
        let mut max = Vec3::repeat(f32::MIN);
        for vertex in self.vertices.chunks_exact(stride) {
            let p = Vec3::new(vertex[offset], vertex[offset + 1], vertex[offset + 2]);
            min = min.inf(&p);
            max = max.sup(&p);
        }
        Some(MeshDimensions { min, max })
    }

    /// Draw ranges: the declared parts, or a single range covering all indices
    pub fn draw_ranges(&self) -> VulkanResult<Vec<MeshPart>> {
        if !self.parts.is_empty() {
            return Ok(self.parts.clone());
        }
        let too_large = |what: &str, n: usize| VulkanError::InvalidOperation {
            reason: format!("mesh has {n} {what}, more than one draw can address"),
        };
        let vertex_count = self.vertex_count();
        Ok(vec![MeshPart {
            vertex_base: 0,
            vertex_count: u32::try_from(vertex_count).map_err(|_| too_large("vertices", vertex_count))?,
            index_base: 0,
            index_count: u32::try_from(self.indices.len()).map_err(|_| too_large("indices", self.indices.len()))?,
        }])
    }
}

/// Mesh resident in device-local buffers
pub struct Mesh {
    vertex_buffer: VertexBuffer,
    index_buffer: IndexBuffer,
    draw_ranges: Vec<MeshPart>,
    dimensions: Option<MeshDimensions>,
}

impl Mesh {
    /// Upload `data` through staging buffers
    pub fn upload(context: &DeviceContext, pool: &CommandPool, data: &MeshData) -> VulkanResult<Self> {
        let draw_ranges = data.draw_ranges()?;
        let vertex_buffer = VertexBuffer::new(context, pool, data.vertices(), data.layout().stride())?;
        let index_buffer = IndexBuffer::new(context, pool, data.indices())?;
        Ok(Self {
            vertex_buffer,
            index_buffer,
            draw_ranges,
            dimensions: data.dimensions(),
        })
    }

    /// Vertex buffer handle
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    /// Index buffer handle
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    /// Total index count
    pub fn index_count(&self) -> u32 {
        self.index_buffer.index_count()
    }

    /// One entry per indexed draw
    pub fn draw_ranges(&self) -> &[MeshPart] {
        &self.draw_ranges
    }

    /// Bounds computed at upload time
    pub fn dimensions(&self) -> Option<MeshDimensions> {
        self.dimensions
    }
}

/// Path-keyed cache of shared meshes. Entries are never evicted.
#[derive(Debug)]
pub struct MeshCache<M = Mesh> {
    meshes: HashMap<PathBuf, Rc<M>>,
}

impl<M> Default for MeshCache<M> {
    fn default() -> Self {
        Self { meshes: HashMap::new() }
    }
}

impl<M> MeshCache<M> {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached mesh for `path`, if loaded
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Rc<M>> {
        self.meshes.get(path.as_ref()).cloned()
    }

    /// Cached mesh for `path`, loading it with `load` on first use
    pub fn get_or_load<F>(&mut self, path: impl AsRef<Path>, load: F) -> VulkanResult<Rc<M>>
    where
        F: FnOnce(&Path) -> VulkanResult<M>,
    {
        let path = path.as_ref();
        if let Some(mesh) = self.meshes.get(path) {
            return Ok(Rc::clone(mesh));
        }
        let mesh = Rc::new(load(path)?);
        self.meshes.insert(path.to_path_buf(), Rc::clone(&mesh));
        Ok(mesh)
    }

    /// Number of cached meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Diffuse, normal and material maps of one model
pub struct MaterialTextures {
    /// Base color
    pub diffuse: Image,
    /// Tangent-space normals
    pub normal: Image,
    /// Packed material parameters
    pub material: Image,
}

impl MaterialTextures {
    /// Upload three pixel buffers
    pub fn upload(
        context: &DeviceContext,
        pool: &CommandPool,
        diffuse: &PixelData,
        normal: &PixelData,
        material: &PixelData,
        generate_mips: bool,
    ) -> VulkanResult<Self> {
        Ok(Self {
            diffuse: Image::texture(context, pool, diffuse, generate_mips)?,
            normal: Image::texture(context, pool, normal, generate_mips)?,
            material: Image::texture(context, pool, material, generate_mips)?,
        })
    }

    /// 1x1 placeholders: white albedo, flat normal, default material
    pub fn placeholder(context: &DeviceContext, pool: &CommandPool) -> VulkanResult<Self> {
        Self::upload(
            context,
            pool,
            &PixelData::white(),
            &PixelData::flat_normal(),
            &PixelData::default_material(),
            false,
        )
    }

    /// Descriptor infos in binding order: diffuse, normal, material
    pub fn descriptor_infos(&self) -> [vk::DescriptorImageInfo; 3] {
        [
            self.diffuse.descriptor_info(),
            self.normal.descriptor_info(),
            self.material.descriptor_info(),
        ]
    }
}

/// Shared mesh plus its textures and one geometry descriptor set per frame slot
pub struct Model {
    mesh: Rc<Mesh>,
    textures: MaterialTextures,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl Model {
    /// Assemble a model; the descriptor sets come from the geometry pass
    pub fn new(mesh: Rc<Mesh>, textures: MaterialTextures, descriptor_sets: Vec<vk::DescriptorSet>) -> Self {
        Self {
            mesh,
            textures,
            descriptor_sets,
        }
    }

    /// Shared mesh
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Material textures
    pub fn textures(&self) -> &MaterialTextures {
        &self.textures
    }

    /// Descriptor set for frame slot `slot`
    pub fn descriptor_set(&self, slot: usize) -> Option<vk::DescriptorSet> {
        self.descriptor_sets.get(slot).copied()
    }

    /// All per-slot descriptor sets
    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }
}

new_key_type! {
    /// Generation-checked handle to a model in a [`ModelStore`]
    pub struct ModelKey;
}

/// Owner of every model the scene can instance
#[derive(Debug)]
pub struct ModelStore<M = Model> {
    models: SlotMap<ModelKey, M>,
}

impl<M> Default for ModelStore<M> {
    fn default() -> Self {
        Self { models: SlotMap::with_key() }
    }
}

impl<M> ModelStore<M> {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `model`
    pub fn insert(&mut self, model: M) -> ModelKey {
        self.models.insert(model)
    }

    /// Model behind `key`, unless it was removed
    pub fn get(&self, key: ModelKey) -> Option<&M> {
        self.models.get(key)
    }

    /// Remove and return the model; outstanding keys stop resolving.
    ///
    /// Only the renderer removes models, after the device has gone idle, so a
    /// model cannot be freed while a frame in flight still reads it:
    ///
    /// ```compile_fail
    /// use deferred_engine::render::ModelStore;
    ///
    /// let mut store: ModelStore<u32> = ModelStore::new();
    /// let key = store.insert(7);
    /// store.remove(key);
    /// ```
    pub(crate) fn remove(&mut self, key: ModelKey) -> Option<M> {
        self.models.remove(key)
    }

    /// Whether `key` still resolves
    pub fn contains(&self, key: ModelKey) -> bool {
        self.models.contains_key(key)
    }

    /// Number of live models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Iterate over live models
    pub fn iter(&self) -> impl Iterator<Item = (ModelKey, &M)> {
        self.models.iter()
    }

    /// Remove every model, returning them
    pub(crate) fn drain(&mut self) -> Vec<M> {
        self.models.drain().map(|(_, model)| model).collect()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("index_count", &self.mesh.index_count())
            .field("descriptor_sets", &self.descriptor_sets.len())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("index_count", &self.index_count())
            .field("draw_ranges", &self.draw_ranges)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn position_only() -> VertexLayout {
        VertexLayout::new([VertexComponent::Position])
    }

    fn triangle() -> MeshData {
        MeshData::new(
            vec![0.0, 0.0, 0.0, 2.0, 0.0, -1.0, 0.0, 3.0, 1.0],
            position_only(),
            vec![0, 1, 2],
        )
        .unwrap()
    }

    #[test]
    fn test_mesh_data_rejects_partial_vertex() {
        let result = MeshData::new(vec![0.0; 10], VertexLayout::standard(), vec![0]);
        assert!(result.is_err());
        assert!(MeshData::new(vec![0.0; 22], VertexLayout::standard(), vec![0, 1]).is_ok());
    }

    #[test]
    fn test_mesh_data_rejects_out_of_range_index() {
        let result = MeshData::new(vec![0.0; 9], position_only(), vec![0, 1, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mesh_dimensions_from_positions() {
        let dims = triangle().dimensions().unwrap();
        assert_relative_eq!(dims.min, Vec3::new(0.0, 0.0, -1.0));
        assert_relative_eq!(dims.max, Vec3::new(2.0, 3.0, 1.0));
        assert_relative_eq!(dims.size(), Vec3::new(2.0, 3.0, 2.0));
        assert_relative_eq!(dims.center(), Vec3::new(1.0, 1.5, 0.0));
    }

    #[test]
    fn test_mesh_dimensions_use_position_offset() {
        let layout = VertexLayout::new([VertexComponent::Uv, VertexComponent::Position]);
        let data = MeshData::new(vec![9.0, 9.0, 1.0, 2.0, 3.0], layout, vec![0]).unwrap();
        let dims = data.dimensions().unwrap();
        assert_relative_eq!(dims.min, Vec3::new(1.0, 2.0, 3.0));
        assert!(MeshData::new(vec![0.5, 0.5], VertexLayout::new([VertexComponent::Uv]), vec![0])
            .unwrap()
            .dimensions()
            .is_none());
    }

    #[test]
    fn test_draw_ranges_default_to_whole_mesh() {
        let ranges = triangle().draw_ranges().unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].index_count, 3);
        assert_eq!(ranges[0].vertex_count, 3);
    }

    #[test]
    fn test_parts_must_fit_indices() {
        let part = MeshPart {
            vertex_base: 0,
            vertex_count: 3,
            index_base: 1,
            index_count: 3,
        };
        assert!(triangle().with_parts(vec![part]).is_err());

        let part = MeshPart { index_base: 0, ..part };
        let data = triangle().with_parts(vec![part, part]).unwrap();
        assert_eq!(data.draw_ranges().unwrap().len(), 2);
    }

    #[test]
    fn test_parts_must_fit_vertices() {
        // in range indices but a vertex range far past the three vertices
        let part = MeshPart {
            vertex_base: 100,
            vertex_count: 50,
            index_base: 0,
            index_count: 3,
        };
        assert!(matches!(
            triangle().with_parts(vec![part]),
            Err(VulkanError::InvalidOperation { .. })
        ));

        // vertex_base shifts index 2 onto a fourth vertex
        let part = MeshPart {
            vertex_base: 1,
            vertex_count: 2,
            ..part
        };
        assert!(triangle().with_parts(vec![part]).is_err());

        let part = MeshPart {
            vertex_base: 0,
            vertex_count: 3,
            ..part
        };
        assert!(triangle().with_parts(vec![part]).is_ok());
    }

    #[test]
    fn test_part_ranges_do_not_overflow() {
        let part = MeshPart {
            vertex_base: 0,
            vertex_count: 3,
            index_base: u32::MAX,
            index_count: 2,
        };
        assert!(triangle().with_parts(vec![part]).is_err());

        let part = MeshPart {
            vertex_base: u32::MAX,
            vertex_count: 2,
            index_base: 0,
            index_count: 3,
        };
        assert!(triangle().with_parts(vec![part]).is_err());
    }

    #[test]
    fn test_mesh_cache_loads_once_per_path() {
        let mut cache: MeshCache<u32> = MeshCache::new();
        let mut loads = 0;
        let first = cache
            .get_or_load("assets/cube.obj", |_| {
                loads += 1;
                Ok(7)
            })
            .unwrap();
        let second = cache.get_or_load("assets/cube.obj", |_| Ok(99)).unwrap();
        assert_eq!(loads, 1);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(*second, 7);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("assets/other.obj").is_none());
    }

    #[test]
    fn test_mesh_cache_does_not_store_failures() {
        let mut cache: MeshCache<u32> = MeshCache::new();
        let failed = cache.get_or_load("missing.obj", |path| {
            Err(VulkanError::ResourceNotFound {
                id: path.display().to_string(),
            })
        });
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_model_store_keys_go_stale_on_remove() {
        let mut store: ModelStore<&str> = ModelStore::new();
        let cube = store.insert("cube");
        let sphere = store.insert("sphere");
        assert_eq!(store.len(), 2);

        assert_eq!(store.remove(cube), Some("cube"));
        assert!(!store.contains(cube));
        assert!(store.get(cube).is_none());

        // a reused slot must not resolve through the old key
        let cone = store.insert("cone");
        assert!(store.get(cube).is_none());
        assert_eq!(store.get(cone), Some(&"cone"));
        assert_eq!(store.get(sphere), Some(&"sphere"));
    }

    #[test]
    fn test_model_store_drain_invalidates_every_key() {
        let mut store: ModelStore<u32> = ModelStore::new();
        let keys: Vec<_> = (0..3).map(|n| store.insert(n)).collect();
        let mut drained = store.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(store.is_empty());
        assert!(keys.iter().all(|&key| !store.contains(key)));
    }
}
