//! Interleaved vertex layouts
//!
//! Meshes store plain `f32` streams. A [`VertexLayout`] lists the components in
//! order and derives the stride, the attribute formats and their offsets.

use ash::vk;

/// One vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexComponent {
    /// Object-space position (3 floats)
    Position,
    /// Texture coordinates (2 floats)
    Uv,
    /// Surface normal (3 floats)
    Normal,
    /// Tangent for normal mapping (3 floats)
    Tangent,
    /// Bitangent for normal mapping (3 floats)
    Bitangent,
    /// Per-vertex color (3 floats)
    Color,
}

impl VertexComponent {
    /// Number of floats the component occupies
    pub const fn float_count(self) -> u32 {
        match self {
            Self::Uv => 2,
            Self::Position | Self::Normal | Self::Tangent | Self::Bitangent | Self::Color => 3,
        }
    }

    /// Size in bytes
    pub const fn size(self) -> u32 {
        self.float_count() * 4
    }

    /// Attribute format
    pub const fn format(self) -> vk::Format {
        match self {
            Self::Uv => vk::Format::R32G32_SFLOAT,
            Self::Position | Self::Normal | Self::Tangent | Self::Bitangent | Self::Color => {
                vk::Format::R32G32B32_SFLOAT
            }
        }
    }
}

/// Ordered list of components making up one vertex
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    components: Vec<VertexComponent>,
}

impl VertexLayout {
    /// Layout with components in the given order
    pub fn new(components: impl Into<Vec<VertexComponent>>) -> Self {
        Self {
            components: components.into(),
        }
    }

    /// Position, UV, normal, tangent: what the geometry pass shaders consume
    pub fn standard() -> Self {
        Self::new([
            VertexComponent::Position,
            VertexComponent::Uv,
            VertexComponent::Normal,
            VertexComponent::Tangent,
        ])
    }

    /// Components in order
    pub fn components(&self) -> &[VertexComponent] {
        &self.components
    }

    /// Bytes per vertex
    pub fn stride(&self) -> u32 {
        self.components.iter().map(|c| c.size()).sum()
    }

    /// Floats per vertex
    pub fn floats_per_vertex(&self) -> u32 {
        self.components.iter().map(|c| c.float_count()).sum()
    }

    /// Float offset of `component` within a vertex, if present
    pub fn float_offset_of(&self, component: VertexComponent) -> Option<u32> {
        let index = self.components.iter().position(|&c| c == component)?;
        Some(self.components[..index].iter().map(|c| c.float_count()).sum())
    }

    /// Per-vertex binding 0
    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// One attribute per component at consecutive locations
    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        let mut offset = 0;
        (0u32..)
            .zip(&self.components)
            .map(|(location, component)| {
                let attribute = vk::VertexInputAttributeDescription {
                    binding: 0,
                    location,
                    format: component.format(),
                    offset,
                };
                offset += component.size();
                attribute
            })
            .collect()
    }
}

impl Default for VertexLayout {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout_stride() {
        let layout = VertexLayout::standard();
        assert_eq!(layout.stride(), 44);
        assert_eq!(layout.floats_per_vertex(), 11);
        assert_eq!(layout.binding_description().stride, 44);
    }

    #[test]
    fn test_attribute_offsets_accumulate() {
        let attributes = VertexLayout::standard().attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(offsets, vec![0, 12, 20, 32]);
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attributes[2].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn test_float_offset_lookup() {
        let layout = VertexLayout::standard();
        assert_eq!(layout.float_offset_of(VertexComponent::Position), Some(0));
        assert_eq!(layout.float_offset_of(VertexComponent::Normal), Some(5));
        assert_eq!(layout.float_offset_of(VertexComponent::Color), None);
    }

    #[test]
    fn test_custom_layout_with_bitangent() {
        let layout = VertexLayout::new([
            VertexComponent::Position,
            VertexComponent::Normal,
            VertexComponent::Tangent,
            VertexComponent::Bitangent,
        ]);
        assert_eq!(layout.stride(), 48);
        assert_eq!(layout.attribute_descriptions()[3].offset, 36);
    }
}
