//! Frame pacing and synchronization
//!
//! The renderer keeps `F` frame slots in flight. Each slot owns a fence, two
//! semaphores and a command buffer; slot `i` is reused every `F` frames and
//! its fence must be signaled before any of its resources are touched again.
//!
//! [`FrameScheduler`] drives one frame through the acquire, record, submit
//! and present sequence against a [`FrameBackend`]. The Vulkan backend lives
//! in the renderer; keeping the sequencing here lets it be exercised without
//! a GPU.
//!
//! # Per-frame sequence
//!
//! 1. Skip the frame while the framebuffer has a zero dimension.
//! 2. Take (and clear) the resize flag.
//! 3. Wait on the slot fence.
//! 4. Acquire an image. An out-of-date swapchain is rebuilt and the frame is
//!    dropped without touching the fence or the frame counter.
//! 5. Record, then reset the fence and submit. A failed recording leaves
//!    the fence signaled so the slot can be waited on again.
//! 6. Present. A stale present or a pending resize rebuilds the swapchain
//!    after presenting.
//! 7. Advance the frame counter.

pub mod recording;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::render::vulkan::VulkanResult;

pub use recording::{clear_only, FrameTarget, RecordFn};

/// Resize notification shared between the window layer and the frame loop
///
/// Clones share one flag. Raising is cheap and may happen at any time; the
/// frame loop takes the flag once per frame.
#[derive(Debug, Clone, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    /// New, lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the swapchain as needing a rebuild
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Read and clear the flag
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Read without clearing
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to be rendered into
    Acquired {
        /// Swapchain image index
        image_index: u32,
        /// The swapchain still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain can no longer be used
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented and the swapchain still matches the surface
    Presented,
    /// Presented (or dropped) but the swapchain is out of date or suboptimal
    Stale,
}

/// What happened during one call to [`FrameScheduler::render_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and presented
    Presented,
    /// A frame was presented and the swapchain rebuilt afterwards
    PresentedAndRebuilt,
    /// Acquisition found the swapchain out of date and no frame was drawn
    ///
    /// The swapchain was rebuilt, or the rebuild is pending until the window is restored.
    SwapchainRebuilt,
    /// The framebuffer has a zero dimension; nothing was done
    Minimized,
}

/// GPU-side operations the frame sequence is made of
///
/// `slot` is always in `[0, frames_in_flight)`.
pub trait FrameBackend {
    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the slot's in-flight fence is signaled
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()>;

    /// Acquire the next swapchain image, signaling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome>;

    /// Return the slot's fence to the unsignaled state; only called right before [`submit`](Self::submit)
    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Reset the slot's command buffer and record into it for `image_index`
    fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Submit the slot's command buffer; the fence is signaled on completion
    fn submit(&mut self, slot: usize) -> VulkanResult<()>;

    /// Queue `image_index` for presentation once rendering finished
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome>;

    /// Idle the device, destroy the swapchain and its dependents, build new ones
    fn recreate_swapchain(&mut self) -> VulkanResult<()>;
}

/// Bounded frames-in-flight counter and the per-frame sequence
#[derive(Debug)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    current_frame: usize,
    resize: ResizeFlag,
}

impl FrameScheduler {
    /// Scheduler for `frames_in_flight` slots (at least one), watching `resize`
    pub fn new(frames_in_flight: usize, resize: ResizeFlag) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            resize,
        }
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// The resize flag this scheduler consumes
    pub fn resize_flag(&self) -> &ResizeFlag {
        &self.resize
    }

    /// Run one frame
    pub fn render_frame<B: FrameBackend>(&mut self, backend: &mut B) -> VulkanResult<FrameStatus> {
        let (width, height) = backend.framebuffer_size();
        if width == 0 || height == 0 {
            log::trace!("Framebuffer is {}x{}, skipping frame", width, height);
            return Ok(FrameStatus::Minimized);
        }

        // A resize raised after this point is picked up by the next frame
        let resize_requested = self.resize.take();
        let slot = self.current_frame;

        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    log::debug!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::warn!("Swapchain out of date on acquire, rebuilding");
                self.rebuild(backend)?;
                return Ok(FrameStatus::SwapchainRebuilt);
            }
        };

        // The fence was waited on above, so the command buffer is free to reuse
        backend.record(slot, image_index)?;

        // Reset only once work is about to be submitted, or the next wait on this slot never returns
        backend.reset_slot_fence(slot)?;
        backend.submit(slot)?;

        let outcome = backend.present(slot, image_index)?;
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;

        if outcome == PresentOutcome::Stale || resize_requested {
            if outcome == PresentOutcome::Stale {
                log::warn!("Swapchain stale on present, rebuilding");
            } else {
                log::debug!("Framebuffer resized, rebuilding swapchain");
            }
            if self.rebuild(backend)? {
                return Ok(FrameStatus::PresentedAndRebuilt);
            }
        }

        Ok(FrameStatus::Presented)
    }

    /// Returns false when the rebuild was deferred because the window is minimized
    fn rebuild<B: FrameBackend>(&self, backend: &mut B) -> VulkanResult<bool> {
        let (width, height) = backend.framebuffer_size();
        if width == 0 || height == 0 {
            // Retried once the window has a usable size again
            self.resize.raise();
            return Ok(false);
        }
        backend.recreate_swapchain()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::VulkanError;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        ResetFence(usize),
        Record(usize, u32),
        Submit(usize),
        Present { slot: usize, image: u32, extent: (u32, u32) },
        Recreate { extent: (u32, u32) },
    }

    /// Backend whose GPU finishes every submission instantly
    struct MockBackend {
        calls: Vec<Call>,
        fence_signaled: Vec<bool>,
        waited_since_reset: Vec<bool>,
        window: (u32, u32),
        extent: (u32, u32),
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        on_present: Option<Box<dyn FnMut(&mut (u32, u32))>>,
        fail_submit: bool,
        fail_record: bool,
    }

    impl MockBackend {
        fn new(frames: usize, window: (u32, u32)) -> Self {
            Self {
                calls: Vec::new(),
                fence_signaled: vec![true; frames],
                waited_since_reset: vec![false; frames],
                window,
                extent: window,
                image_count: 3,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                on_present: None,
                fail_submit: false,
                fail_record: false,
            }
        }

        fn recreations(&self) -> usize {
            self.calls.iter().filter(|call| matches!(call, Call::Recreate { .. })).count()
        }

        fn records(&self) -> usize {
            self.calls.iter().filter(|call| matches!(call, Call::Record(..))).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.window
        }

        fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
            assert!(self.fence_signaled[slot], "waiting on slot {slot} would never return");
            self.waited_since_reset[slot] = true;
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired { image_index, suboptimal: false })
        }

        fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
            assert!(self.waited_since_reset[slot], "fence reset without a prior wait");
            self.waited_since_reset[slot] = false;
            self.fence_signaled[slot] = false;
            self.calls.push(Call::ResetFence(slot));
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            assert!(self.waited_since_reset[slot], "command buffer reused before its fence was waited on");
            if self.fail_record {
                return Err(VulkanError::Recording("callback failed".to_string()));
            }
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> VulkanResult<()> {
            if self.fail_submit {
                return Err(VulkanError::SubmitFailed(vk::Result::ERROR_DEVICE_LOST));
            }
            self.fence_signaled[slot] = true;
            self.calls.push(Call::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
            self.calls.push(Call::Present { slot, image: image_index, extent: self.extent });
            if let Some(hook) = self.on_present.as_mut() {
                hook(&mut self.window);
            }
            Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_swapchain(&mut self) -> VulkanResult<()> {
            self.extent = self.window;
            self.next_image = 0;
            self.calls.push(Call::Recreate { extent: self.extent });
            Ok(())
        }
    }

    #[test]
    fn test_counter_cycles_through_slots() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());

        let mut counters = Vec::new();
        for _ in 0..5 {
            assert_eq!(scheduler.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
            counters.push(scheduler.current_frame());
        }

        assert_eq!(counters, vec![1, 0, 1, 0, 1]);
        assert_eq!(backend.records(), 5);
        assert_eq!(backend.recreations(), 0);
    }

    #[test]
    fn test_steady_state_call_order() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());

        scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Record(0, 0),
                Call::ResetFence(0),
                Call::Submit(0),
                Call::Present { slot: 0, image: 0, extent: (800, 600) },
            ]
        );
    }

    #[test]
    fn test_counter_equals_frames_modulo_slots() {
        for frames in 1..=4 {
            let mut backend = MockBackend::new(frames, (640, 480));
            let mut scheduler = FrameScheduler::new(frames, ResizeFlag::new());

            for n in 1..=11 {
                scheduler.render_frame(&mut backend).unwrap();
                assert!(scheduler.current_frame() < frames);
                assert_eq!(scheduler.current_frame(), n % frames);
            }
        }
    }

    #[test]
    fn test_out_of_date_acquire_rebuilds_without_drawing() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());

        backend.window = (1024, 768);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);

        let status = scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::SwapchainRebuilt);
        assert_eq!(backend.records(), 0);
        assert_eq!(backend.extent, (1024, 768));
        assert!(backend.fence_signaled[0], "fence must stay signaled");
        assert_eq!(scheduler.current_frame(), 0);
        assert_eq!(
            backend.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Recreate { extent: (1024, 768) }]
        );
    }

    #[test]
    fn test_frame_after_stale_acquire_reuses_slot() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);

        scheduler.render_frame(&mut backend).unwrap();
        let status = scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(scheduler.current_frame(), 1);
        assert!(backend.calls.contains(&Call::Record(0, 0)));
    }

    #[test]
    fn test_suboptimal_acquire_still_draws() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());
        backend
            .acquire_script
            .push_back(AcquireOutcome::Acquired { image_index: 2, suboptimal: true });

        let status = scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert!(backend.calls.contains(&Call::Record(0, 2)));
    }

    #[test]
    fn test_stale_present_rebuilds_after_presenting() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());
        backend.present_script.push_back(PresentOutcome::Stale);

        let status = scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::PresentedAndRebuilt);
        assert_eq!(scheduler.current_frame(), 1);
        let present_at = backend.calls.iter().position(|c| matches!(c, Call::Present { .. })).unwrap();
        let recreate_at = backend.calls.iter().position(|c| matches!(c, Call::Recreate { .. })).unwrap();
        assert!(present_at < recreate_at);
    }

    #[test]
    fn test_resize_flag_rebuilds_after_present() {
        let resize = ResizeFlag::new();
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, resize.clone());

        backend.window = (1280, 720);
        resize.raise();
        let status = scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::PresentedAndRebuilt);
        assert!(!resize.is_raised());
        assert_eq!(backend.extent, (1280, 720));
        assert_eq!(
            backend.calls.last(),
            Some(&Call::Recreate { extent: (1280, 720) })
        );
    }

    #[test]
    fn test_resize_between_submit_and_present_applies_next_frame() {
        let resize = ResizeFlag::new();
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, resize.clone());

        let window_resize = resize.clone();
        let mut fired = false;
        backend.on_present = Some(Box::new(move |window: &mut (u32, u32)| {
            if !fired {
                fired = true;
                *window = (1024, 768);
                window_resize.raise();
            }
        }));

        let first = scheduler.render_frame(&mut backend).unwrap();
        assert_eq!(first, FrameStatus::Presented);
        assert_eq!(backend.recreations(), 0);
        assert!(backend
            .calls
            .contains(&Call::Present { slot: 0, image: 0, extent: (800, 600) }));

        let second = scheduler.render_frame(&mut backend).unwrap();
        assert_eq!(second, FrameStatus::PresentedAndRebuilt);
        assert_eq!(backend.calls.last(), Some(&Call::Recreate { extent: (1024, 768) }));
    }

    #[test]
    fn test_never_recreates_between_submit_and_present() {
        let resize = ResizeFlag::new();
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, resize.clone());
        backend.present_script.extend([PresentOutcome::Stale, PresentOutcome::Presented, PresentOutcome::Stale]);

        for _ in 0..4 {
            resize.raise();
            scheduler.render_frame(&mut backend).unwrap();
        }

        let mut submitted = false;
        for call in &backend.calls {
            match call {
                Call::Submit(_) => submitted = true,
                Call::Present { .. } => submitted = false,
                Call::Recreate { .. } => assert!(!submitted, "recreated with a submission awaiting present"),
                _ => {}
            }
        }
    }

    #[test]
    fn test_minimized_window_skips_everything() {
        let resize = ResizeFlag::new();
        let mut backend = MockBackend::new(2, (0, 600));
        let mut scheduler = FrameScheduler::new(2, resize.clone());
        resize.raise();

        assert_eq!(scheduler.render_frame(&mut backend).unwrap(), FrameStatus::Minimized);
        assert!(backend.calls.is_empty());
        assert_eq!(scheduler.current_frame(), 0);
        assert!(resize.is_raised(), "pending resize is kept for when the window is restored");

        backend.window = (640, 480);
        assert_eq!(scheduler.render_frame(&mut backend).unwrap(), FrameStatus::PresentedAndRebuilt);
        assert_eq!(backend.extent, (640, 480));
    }

    #[test]
    fn test_rebuild_deferred_while_minimized() {
        let resize = ResizeFlag::new();
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, resize.clone());
        backend.present_script.push_back(PresentOutcome::Stale);
        backend.on_present = Some(Box::new(|window: &mut (u32, u32)| *window = (0, 0)));

        let status = scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(backend.recreations(), 0);
        assert!(resize.is_raised());
    }

    #[test]
    fn test_submit_failure_propagates_without_advancing() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());
        backend.fail_submit = true;

        let result = scheduler.render_frame(&mut backend);

        assert!(matches!(result, Err(VulkanError::SubmitFailed(_))));
        assert_eq!(scheduler.current_frame(), 0);
    }

    #[test]
    fn test_record_failure_keeps_fence_signaled() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());
        backend.fail_record = true;

        let result = scheduler.render_frame(&mut backend);

        assert!(matches!(result, Err(VulkanError::Recording(_))));
        assert!(backend.fence_signaled[0], "fence must not be reset without a submit");
        assert!(!backend.calls.contains(&Call::ResetFence(0)));
        assert_eq!(scheduler.current_frame(), 0);
    }

    #[test]
    fn test_frame_after_record_failure_succeeds() {
        let mut backend = MockBackend::new(2, (800, 600));
        let mut scheduler = FrameScheduler::new(2, ResizeFlag::new());
        backend.fail_record = true;
        assert!(scheduler.render_frame(&mut backend).is_err());

        backend.fail_record = false;
        let status = scheduler.render_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(scheduler.current_frame(), 1);
        assert!(backend.calls.contains(&Call::Submit(0)));
    }

    #[test]
    fn test_fence_reset_directly_precedes_submit() {
        let mut backend = MockBackend::new(3, (800, 600));
        let mut scheduler = FrameScheduler::new(3, ResizeFlag::new());

        for _ in 0..6 {
            scheduler.render_frame(&mut backend).unwrap();
        }

        for (i, call) in backend.calls.iter().enumerate() {
            if let Call::ResetFence(slot) = call {
                assert_eq!(backend.calls.get(i + 1), Some(&Call::Submit(*slot)));
            }
        }
    }

    #[test]
    fn test_zero_frames_clamped_to_one() {
        let scheduler = FrameScheduler::new(0, ResizeFlag::new());
        assert_eq!(scheduler.frames_in_flight(), 1);
    }

    #[test]
    fn test_resize_flag_shared_between_clones() {
        let flag = ResizeFlag::new();
        let other = flag.clone();
        assert!(!flag.is_raised());

        other.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!other.is_raised());
        assert!(!flag.take());
    }
}
