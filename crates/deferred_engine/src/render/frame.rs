//! Per-frame protocol state
//!
//! Everything here is plain data: the frame state machine, the classification of
//! acquire and present results, the statistics a frame reports, and the growth
//! policy of the geometry pass's secondary command buffers. The renderer drives
//! these with real Vulkan results; tests drive them with constructed ones.

use ash::vk;

use super::vulkan::{VulkanError, VulkanResult};

/// Where the renderer is within one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    /// No frame in progress
    #[default]
    Idle,
    /// Waiting on the slot fence and acquiring a swapchain image
    Acquiring,
    /// Recording geometry and lighting commands
    Recording,
    /// Both passes submitted
    Submitted,
    /// Handing the image to the presentation engine
    Presenting,
}

impl FrameState {
    /// Whether `self -> next` is a legal step
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Acquiring)
                | (Self::Acquiring, Self::Recording)
                // stale acquire aborts the frame before anything is recorded
                | (Self::Acquiring, Self::Idle)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Presenting)
                | (Self::Presenting, Self::Idle)
        )
    }

    /// Step to `next`, rejecting illegal transitions
    pub fn transition(self, next: Self) -> VulkanResult<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(VulkanError::InvalidOperation {
                reason: format!("illegal frame state transition {self:?} -> {next:?}"),
            })
        }
    }

    /// Abandon a frame that failed in this state. The machine always restarts from `Idle`.
    pub fn abort(self) -> (Self, FrameRecovery) {
        let recovery = FrameRecovery {
            // acquire succeeded: image_available carries a signal nothing will wait on,
            // and once submission starts the fence may be reset without a signal coming
            reset_slot: matches!(self, Self::Recording | Self::Submitted | Self::Presenting),
            release_image: matches!(self, Self::Recording | Self::Submitted),
        };
        (Self::Idle, recovery)
    }
}

/// Cleanup needed after a frame fails part way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRecovery {
    /// Wait for the device and replace the slot's fence and semaphores
    pub reset_slot: bool,
    /// Rebuild the swapchain to release an acquired image that will never be presented
    pub release_image: bool,
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready; `suboptimal` asks for recreation after this frame
    Image {
        /// Index into the swapchain images
        index: u32,
        /// The surface no longer matches the swapchain exactly
        suboptimal: bool,
    },
    /// The swapchain is out of date and the frame must be dropped
    Stale,
}

impl AcquireOutcome {
    /// Classify a raw acquire result. Out-of-date is staleness, anything else failing is an error.
    pub fn classify(result: Result<(u32, bool), vk::Result>) -> VulkanResult<Self> {
        match result {
            Ok((index, suboptimal)) => Ok(Self::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::Stale),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented and the swapchain still matches the surface
    Presented,
    /// Presented (or discarded) but the swapchain must be rebuilt
    Stale,
}

impl PresentOutcome {
    /// Classify a raw present result; a pending resize also counts as stale
    pub fn classify(result: Result<bool, vk::Result>, resize_pending: bool) -> VulkanResult<Self> {
        match result {
            Ok(false) if !resize_pending => Ok(Self::Presented),
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => Ok(Self::Stale),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }
}

/// How a frame ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOutcome {
    /// Rendered and presented
    Presented,
    /// Acquire reported staleness; the swapchain was rebuilt and nothing was drawn
    Dropped,
    /// Rendered and presented, then the swapchain was rebuilt
    Recreated,
    /// The window has no area; nothing was submitted
    Skipped,
}

/// What one call to render did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Indexed draws recorded by the geometry pass
    pub geometry_draws: u32,
    /// Fullscreen draws recorded by the lighting pass
    pub light_draws: u32,
    /// Secondary command buffers available to the frame slot after recording
    pub secondary_capacity: u32,
    /// Swapchain image rendered into, if one was acquired
    pub image_index: Option<u32>,
    /// How the frame ended
    pub outcome: FrameOutcome,
}

impl FrameStats {
    /// Stats for a frame that recorded nothing
    pub fn empty(outcome: FrameOutcome) -> Self {
        Self {
            geometry_draws: 0,
            light_draws: 0,
            secondary_capacity: 0,
            image_index: None,
            outcome,
        }
    }

    /// Whether anything reached the screen
    pub fn presented(&self) -> bool {
        matches!(self.outcome, FrameOutcome::Presented | FrameOutcome::Recreated)
    }
}

/// Secondary command buffers of one frame slot. Never shrinks.
#[derive(Debug, Default)]
pub struct SecondaryPool {
    buffers: Vec<vk::CommandBuffer>,
}

impl SecondaryPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers that must be added to hold `required`
    pub fn shortfall(&self, required: usize) -> usize {
        required.saturating_sub(self.buffers.len())
    }

    /// Grow to at least `required` buffers using `allocate(count)`; returns how many were added
    pub fn ensure<F>(&mut self, required: usize, allocate: F) -> VulkanResult<usize>
    where
        F: FnOnce(u32) -> VulkanResult<Vec<vk::CommandBuffer>>,
    {
        let missing = self.shortfall(required);
        if missing == 0 {
            return Ok(0);
        }

        let count = u32::try_from(missing).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("cannot allocate {missing} secondary command buffers"),
        })?;
        let added = allocate(count)?;
        if added.len() != missing {
            return Err(VulkanError::InvalidOperation {
                reason: format!("asked for {missing} secondary command buffers, got {}", added.len()),
            });
        }
        self.buffers.extend(added);
        Ok(missing)
    }

    /// Buffers currently owned
    pub fn buffers(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    /// Number of buffers owned
    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    /// Hand every buffer back so the owner can free it
    pub fn take(&mut self) -> Vec<vk::CommandBuffer> {
        std::mem::take(&mut self.buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fake_buffers(count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        Ok((1..=u64::from(count)).map(vk::CommandBuffer::from_raw).collect())
    }

    #[test]
    fn test_frame_state_full_cycle() {
        let mut state = FrameState::Idle;
        for next in [
            FrameState::Acquiring,
            FrameState::Recording,
            FrameState::Submitted,
            FrameState::Presenting,
            FrameState::Idle,
        ] {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, FrameState::Idle);
    }

    #[test]
    fn test_frame_state_stale_acquire_returns_to_idle() {
        assert!(FrameState::Acquiring.can_transition_to(FrameState::Idle));
        assert!(!FrameState::Recording.can_transition_to(FrameState::Idle));
        assert!(FrameState::Idle.transition(FrameState::Submitted).is_err());
    }

    #[test]
    fn test_failed_frame_does_not_wedge_the_machine() {
        // a recording error used to leave the state at Recording, so every later
        // frame failed its Idle -> Acquiring step
        let state = FrameState::Idle
            .transition(FrameState::Acquiring)
            .and_then(|s| s.transition(FrameState::Recording))
            .unwrap();
        assert!(state.transition(FrameState::Acquiring).is_err());

        let (state, recovery) = state.abort();
        assert_eq!(state, FrameState::Idle);
        assert!(recovery.reset_slot);
        assert!(recovery.release_image);
        assert_eq!(state.transition(FrameState::Acquiring).unwrap(), FrameState::Acquiring);
    }

    #[test]
    fn test_abort_recovery_by_state() {
        let expect = [
            (FrameState::Idle, false, false),
            (FrameState::Acquiring, false, false),
            (FrameState::Recording, true, true),
            (FrameState::Submitted, true, true),
            (FrameState::Presenting, true, false),
        ];
        for (failed, reset_slot, release_image) in expect {
            let (next, recovery) = failed.abort();
            assert_eq!(next, FrameState::Idle, "{failed:?}");
            assert_eq!(recovery.reset_slot, reset_slot, "{failed:?}");
            assert_eq!(recovery.release_image, release_image, "{failed:?}");
            assert!(next.can_transition_to(FrameState::Acquiring));
        }
    }

    #[test]
    fn test_acquire_classification() {
        assert_eq!(
            AcquireOutcome::classify(Ok((2, false))).unwrap(),
            AcquireOutcome::Image { index: 2, suboptimal: false }
        );
        assert_eq!(
            AcquireOutcome::classify(Ok((0, true))).unwrap(),
            AcquireOutcome::Image { index: 0, suboptimal: true }
        );
        assert_eq!(
            AcquireOutcome::classify(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::Stale
        );
        assert!(AcquireOutcome::classify(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_present_classification() {
        assert_eq!(PresentOutcome::classify(Ok(false), false).unwrap(), PresentOutcome::Presented);
        assert_eq!(PresentOutcome::classify(Ok(true), false).unwrap(), PresentOutcome::Stale);
        assert_eq!(PresentOutcome::classify(Ok(false), true).unwrap(), PresentOutcome::Stale);
        assert_eq!(
            PresentOutcome::classify(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), false).unwrap(),
            PresentOutcome::Stale
        );
        let err = PresentOutcome::classify(Err(vk::Result::ERROR_SURFACE_LOST_KHR), false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_secondary_pool_grows_monotonically() {
        let mut pool = SecondaryPool::new();
        assert_eq!(pool.ensure(10, fake_buffers).unwrap(), 10);
        assert_eq!(pool.capacity(), 10);

        // smaller requests keep what is there
        assert_eq!(pool.ensure(3, |_| panic!("no allocation expected")).unwrap(), 0);
        assert_eq!(pool.capacity(), 10);

        assert_eq!(pool.ensure(12, fake_buffers).unwrap(), 2);
        assert_eq!(pool.capacity(), 12);
        assert_eq!(pool.shortfall(12), 0);
    }

    #[test]
    fn test_secondary_pool_rejects_short_allocation() {
        let mut pool = SecondaryPool::new();
        let result = pool.ensure(4, |_| fake_buffers(2));
        assert!(result.is_err());
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn test_secondary_pool_take_empties() {
        let mut pool = SecondaryPool::new();
        pool.ensure(5, fake_buffers).unwrap();
        let taken = pool.take();
        assert_eq!(taken.len(), 5);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.shortfall(5), 5);
    }

    #[test]
    fn test_frame_stats_presented() {
        assert!(!FrameStats::empty(FrameOutcome::Skipped).presented());
        assert!(!FrameStats::empty(FrameOutcome::Dropped).presented());
        let stats = FrameStats {
            outcome: FrameOutcome::Recreated,
            ..FrameStats::empty(FrameOutcome::Presented)
        };
        assert!(stats.presented());
    }
}
