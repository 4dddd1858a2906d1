//! Descriptor set layouts, pools and writes

use ash::{vk, Device};
use std::collections::BTreeMap;

use super::context::{VulkanError, VulkanResult};

/// Descriptor set layout wrapper with RAII cleanup
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Start collecting bindings
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::default()
    }

    /// Get layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings the layout was created with
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Collects single-descriptor bindings for a set layout
#[derive(Debug, Default, Clone)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Add one descriptor at `binding`
    #[must_use]
    pub fn binding(mut self, binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stages)
                .build(),
        );
        self
    }

    /// Bindings collected so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Create the layout
    pub fn build(self, device: Device) -> VulkanResult<DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        let layout =
            unsafe { device.create_descriptor_set_layout(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(DescriptorSetLayout {
            device,
            layout,
            bindings: self.bindings,
        })
    }
}

/// Pool sizes for `sets` copies of a layout with `bindings`
pub fn pool_sizes_for(bindings: &[vk::DescriptorSetLayoutBinding], sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut per_type: BTreeMap<i32, u32> = BTreeMap::new();
    for binding in bindings {
        *per_type.entry(binding.descriptor_type.as_raw()).or_default() += binding.descriptor_count;
    }
    per_type
        .into_iter()
        .map(|(ty, count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count: count.saturating_mul(sets),
        })
        .collect()
}

/// Descriptor pool wrapper with RAII cleanup
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
    max_sets: u32,
    allocated: u32,
}

impl DescriptorPool {
    /// Pool able to hold `max_sets` sets shaped like `layout`; sets can be freed individually
    pub fn for_layout(device: Device, layout: &DescriptorSetLayout, max_sets: u32) -> VulkanResult<Self> {
        let sizes = pool_sizes_for(layout.bindings(), max_sets);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&sizes)
            .max_sets(max_sets);
        let pool = unsafe { device.create_descriptor_pool(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self {
            device,
            pool,
            max_sets,
            allocated: 0,
        })
    }

    /// Allocate `count` sets with `layout`
    pub fn allocate(&mut self, layout: &DescriptorSetLayout, count: u32) -> VulkanResult<Vec<vk::DescriptorSet>> {
        if self.allocated.saturating_add(count) > self.max_sets {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "descriptor pool exhausted: {} of {} sets used, {count} requested",
                    self.allocated, self.max_sets
                ),
            });
        }

        let layouts = vec![layout.handle(); count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)?;
        self.allocated += count;
        Ok(sets)
    }

    /// Return `sets` to the pool. The caller guarantees no pending GPU work reads them.
    pub fn free(&mut self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        let freed = u32::try_from(sets.len()).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("freeing {} descriptor sets", sets.len()),
        })?;
        unsafe { self.device.free_descriptor_sets(self.pool, sets) }.map_err(VulkanError::Api)?;
        self.allocated = self.allocated.saturating_sub(freed);
        Ok(())
    }

    /// Return every set to the pool
    pub fn reset(&mut self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(VulkanError::Api)?;
        self.allocated = 0;
        Ok(())
    }

    /// Sets handed out since creation or the last reset
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Capacity in sets
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Batches buffer and image writes into one descriptor set
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    buffers: Vec<(u32, vk::DescriptorBufferInfo)>,
    images: Vec<(u32, vk::DescriptorImageInfo)>,
}

impl DescriptorWriter {
    /// Empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Uniform buffer at `binding`
    #[must_use]
    pub fn uniform_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.buffers.push((binding, info));
        self
    }

    /// Combined image sampler at `binding`
    #[must_use]
    pub fn combined_image_sampler(mut self, binding: u32, info: vk::DescriptorImageInfo) -> Self {
        self.images.push((binding, info));
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply all queued writes to `set`
    pub fn write(&self, device: &Device, set: vk::DescriptorSet) {
        let buffer_writes = self.buffers.iter().map(|(binding, info)| {
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(*binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(info))
                .build()
        });
        let image_writes = self.images.iter().map(|(binding, info)| {
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(*binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(info))
                .build()
        });
        let writes: Vec<vk::WriteDescriptorSet> = buffer_writes.chain(image_writes).collect();

        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_aggregate_by_type() {
        let builder = DescriptorSetLayout::builder()
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)
            .binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
            .binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
            .binding(3, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT);

        let sizes = pool_sizes_for(builder.bindings(), 10);
        assert_eq!(sizes.len(), 2);
        let count_of = |ty| sizes.iter().find(|s| s.ty == ty).map(|s| s.descriptor_count);
        assert_eq!(count_of(vk::DescriptorType::UNIFORM_BUFFER), Some(10));
        assert_eq!(count_of(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(30));
    }

    #[test]
    fn test_writer_counts_queued_writes() {
        let writer = DescriptorWriter::new()
            .uniform_buffer(0, vk::DescriptorBufferInfo::default())
            .combined_image_sampler(1, vk::DescriptorImageInfo::default());
        assert_eq!(writer.len(), 2);
        assert!(DescriptorWriter::new().is_empty());
    }
}
