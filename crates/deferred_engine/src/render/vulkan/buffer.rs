//! Vulkan buffer management
//!
//! [`Buffer`] is a buffer plus its dedicated memory allocation. The typed wrappers
//! cover the three ways the renderer uses buffers: device-local vertex and index
//! data uploaded once through a staging copy, and persistently mapped uniforms.

use ash::{vk, Device};
use bytemuck::Pod;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem;

use super::commands::CommandPool;
use super::context::{DeviceContext, VulkanError, VulkanResult};

/// Host-visible memory that needs no explicit flushes
pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Reject writes that do not fit in the buffer
pub fn check_write_bounds(offset: vk::DeviceSize, len: usize, capacity: vk::DeviceSize) -> VulkanResult<()> {
    let end = offset.checked_add(len as vk::DeviceSize);
    match end {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(VulkanError::InvalidOperation {
            reason: format!("write of {len} bytes at offset {offset} exceeds buffer size {capacity}"),
        }),
    }
}

/// Round `size` up to a multiple of `min_alignment`; zero alignment leaves it unchanged
pub fn alignment(size: vk::DeviceSize, min_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_alignment > 0 {
        (size + min_alignment - 1) & !(min_alignment - 1)
    } else {
        size
    }
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    mapped: *mut c_void,
}

impl Buffer {
    /// Create a buffer, optionally filling it with `data` before binding its memory.
    ///
    /// Initial data requires host-visible memory; non-coherent memory is flushed
    /// after the copy.
    pub fn create(
        context: &DeviceContext,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        size: vk::DeviceSize,
        data: Option<&[u8]>,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer size must be non-zero".to_string(),
            });
        }
        if let Some(data) = data {
            check_write_bounds(0, data.len(), size)?;
            if !properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
                return Err(VulkanError::InvalidOperation {
                    reason: "initial data needs host-visible memory".to_string(),
                });
            }
        }

        let device = context.raw_device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(VulkanError::Api)?;

        // From here on `Drop` cleans up whatever was created
        let mut this = Self {
            device,
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            usage,
            properties,
            mapped: std::ptr::null_mut(),
        };

        let requirements = unsafe { this.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = context.find_memory_type(requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        this.memory = unsafe { this.device.allocate_memory(&alloc_info, None) }
            .map_err(|e| VulkanError::from_allocation(e, requirements.size))?;

        if let Some(data) = data {
            this.map()?;
            this.copy_from(0, data)?;
            if !this.is_coherent() {
                this.flush(vk::WHOLE_SIZE, 0)?;
            }
            this.unmap();
        }

        unsafe { this.device.bind_buffer_memory(this.buffer, this.memory, 0) }.map_err(VulkanError::Api)?;

        Ok(this)
    }

    /// Map the whole buffer; a no-op when already mapped
    pub fn map(&mut self) -> VulkanResult<*mut c_void> {
        if self.mapped.is_null() {
            self.mapped = unsafe {
                self.device
                    .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(VulkanError::Api)?;
        }
        Ok(self.mapped)
    }

    /// Unmap if mapped
    pub fn unmap(&mut self) {
        if !self.mapped.is_null() {
            unsafe { self.device.unmap_memory(self.memory) };
            self.mapped = std::ptr::null_mut();
        }
    }

    /// Copy `bytes` into the mapped range at `offset`
    pub fn copy_from(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        if self.mapped.is_null() {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer is not mapped".to_string(),
            });
        }
        check_write_bounds(offset, bytes.len(), self.size)?;

        let offset = usize::try_from(offset).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("offset {offset} does not fit in host memory"),
        })?;
        unsafe {
            let dst = self.mapped.cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        Ok(())
    }

    fn mapped_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::MappedMemoryRange {
        vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(offset)
            .size(size)
            .build()
    }

    /// Make host writes visible to the device
    pub fn flush(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        let range = self.mapped_range(size, offset);
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }.map_err(VulkanError::Api)
    }

    /// Make device writes visible to the host
    pub fn invalidate(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        let range = self.mapped_range(size, offset);
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }.map_err(VulkanError::Api)
    }

    /// Descriptor info for binding `size` bytes at `offset`
    pub fn descriptor_info(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        }
    }

    /// Release the buffer and its memory; safe to call more than once
    pub fn destroy(&mut self) {
        self.unmap();
        unsafe {
            if self.buffer != vk::Buffer::null() {
                self.device.destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Whether host writes are visible without flushing
    pub fn is_coherent(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Whether the buffer is currently mapped
    pub fn is_mapped(&self) -> bool {
        !self.mapped.is_null()
    }

    /// Device-local buffer filled through a host-visible staging copy
    pub fn device_local_with_data(
        context: &DeviceContext,
        pool: &CommandPool,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> VulkanResult<Self> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = Self::create(context, vk::BufferUsageFlags::TRANSFER_SRC, HOST_COHERENT, size, Some(bytes))?;
        let target = Self::create(
            context,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            size,
            None,
        )?;

        pool.submit_single_time(context.graphics_queue(), |recorder| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            recorder.copy_buffer(staging.handle(), target.handle(), &[region]);
            Ok(())
        })?;

        Ok(target)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Device-local vertex data
pub struct VertexBuffer {
    buffer: Buffer,
    vertex_count: u32,
}

impl VertexBuffer {
    /// Upload interleaved vertex floats; `stride` is in bytes
    pub fn new(context: &DeviceContext, pool: &CommandPool, vertices: &[f32], stride: u32) -> VulkanResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let whole = bytes.len() / stride.max(1) as usize;
        let vertex_count = u32::try_from(whole).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{whole} vertices exceed a vertex buffer's count"),
        })?;
        let buffer = Buffer::device_local_with_data(context, pool, vk::BufferUsageFlags::VERTEX_BUFFER, bytes)?;
        Ok(Self { buffer, vertex_count })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Number of whole vertices in the buffer
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Device-local 32-bit index data
pub struct IndexBuffer {
    buffer: Buffer,
    index_count: u32,
}

impl IndexBuffer {
    /// Upload indices
    pub fn new(context: &DeviceContext, pool: &CommandPool, indices: &[u32]) -> VulkanResult<Self> {
        let buffer = Buffer::device_local_with_data(
            context,
            pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
        )?;
        let index_count = u32::try_from(indices.len()).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{} indices exceed the 32-bit draw limit", indices.len()),
        })?;
        Ok(Self { buffer, index_count })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Get index count
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Persistently mapped uniform buffer holding one `T`
pub struct UniformBuffer<T: Pod> {
    buffer: Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Create and map the buffer, initialized to `initial`
    pub fn new(context: &DeviceContext, initial: &T) -> VulkanResult<Self> {
        let mut buffer = Buffer::create(
            context,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            HOST_COHERENT,
            mem::size_of::<T>() as vk::DeviceSize,
            Some(bytemuck::bytes_of(initial)),
        )?;
        buffer.map()?;
        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    /// Overwrite the uniform contents
    pub fn update(&mut self, value: &T) -> VulkanResult<()> {
        self.buffer.copy_from(0, bytemuck::bytes_of(value))
    }

    /// Descriptor info covering the whole value
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.buffer.descriptor_info(mem::size_of::<T>() as vk::DeviceSize, 0)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_bounds() {
        assert!(check_write_bounds(0, 64, 64).is_ok());
        assert!(check_write_bounds(32, 32, 64).is_ok());
        assert!(check_write_bounds(33, 32, 64).is_err());
        assert!(check_write_bounds(u64::MAX, 1, 64).is_err());
    }

    #[test]
    fn test_alignment_rounds_up() {
        assert_eq!(alignment(64, 256), 256);
        assert_eq!(alignment(256, 256), 256);
        assert_eq!(alignment(257, 256), 512);
        assert_eq!(alignment(44, 0), 44);
    }

    #[test]
    fn test_host_coherent_constant() {
        assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert!(!HOST_COHERENT.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    }
}
