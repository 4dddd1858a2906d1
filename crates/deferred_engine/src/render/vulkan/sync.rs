//! Vulkan synchronization primitives
//!
//! RAII wrappers for semaphores and fences, the per-slot [`FrameSync`] bundle and
//! the [`FrameRing`] that cycles frame slots.
//!
//! Each frame slot chains three GPU-side signals:
//!
//! ```text
//! acquire ──image_available──▶ geometry submit ──offscreen_complete──▶ lighting submit
//!                                                    ──render_finished──▶ present
//! ```
//!
//! and the `in_flight` fence, signaled by the lighting submit, lets the CPU know
//! when the slot may be reused.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.create_semaphore(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device, fence })
    }

    /// Wait for the fence; `vk::Result::TIMEOUT` is reported as an error
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns) }.map_err(VulkanError::Api)
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }.map_err(VulkanError::Api)
    }

    /// Whether the fence is currently signaled
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(self.fence) }.map_err(VulkanError::Api)
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects owned by one frame slot
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Semaphore,
    /// Signaled when the geometry pass has written the G-buffer
    pub offscreen_complete: Semaphore,
    /// Signaled when the lighting pass is done and the image can be presented
    pub render_finished: Semaphore,
    /// Signaled when all of the slot's GPU work retires; starts signaled
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            offscreen_complete: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
        })
    }
}

/// Cycles through frame slots and tracks which of them have GPU work outstanding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRing {
    current: usize,
    outstanding: Vec<bool>,
}

impl FrameRing {
    /// Ring with `frames` slots; at least one
    pub fn new(frames: usize) -> Self {
        Self {
            current: 0,
            outstanding: vec![false; frames.max(1)],
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// Always false; a ring has at least one slot
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Slot being prepared
    pub fn current(&self) -> usize {
        self.current
    }

    /// Record that the current slot's fence was waited on
    pub fn mark_retired(&mut self) {
        self.outstanding[self.current] = false;
    }

    /// Record that work guarded by the current slot's fence was submitted
    pub fn mark_submitted(&mut self) {
        self.outstanding[self.current] = true;
    }

    /// Move to the next slot, wrapping around
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.outstanding.len();
        self.current
    }

    /// Number of slots with unretired submissions
    pub fn outstanding(&self) -> usize {
        self.outstanding.iter().filter(|&&busy| busy).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps_modulo_count() {
        let mut ring = FrameRing::new(2);
        assert_eq!(ring.current(), 0);
        assert_eq!(ring.advance(), 1);
        assert_eq!(ring.advance(), 0);
        assert_eq!(ring.advance(), 1);
    }

    #[test]
    fn test_ring_never_empty() {
        let ring = FrameRing::new(0);
        assert_eq!(ring.len(), 1);
        assert!(!ring.is_empty());
    }

    #[test]
    fn test_outstanding_bounded_by_slots() {
        let mut ring = FrameRing::new(3);
        for _ in 0..10 {
            ring.mark_retired();
            ring.mark_submitted();
            assert!(ring.outstanding() <= ring.len());
            ring.advance();
        }
        assert_eq!(ring.outstanding(), 3);
    }

    #[test]
    fn test_retire_clears_only_current_slot() {
        let mut ring = FrameRing::new(2);
        ring.mark_submitted();
        ring.advance();
        ring.mark_submitted();
        ring.mark_retired();
        assert_eq!(ring.outstanding(), 1);
    }
}
