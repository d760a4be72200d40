//! Frame state machine and the per-frame schedule.
//!
//! A frame walks `Idle → FrameRequested → ComputeSubmitted →
//! GraphicsSubmitted → Presented → Idle`. Any failure moves the cycle to
//! `Terminal`, after which every request is refused.
//!
//! [`draw_next_frame`] drives one frame against a [`FrameBackend`]. The
//! renderer implements the backend with real Vulkan calls; tests use a
//! recording mock.
//!
//! # Per-frame order
//!
//! ```text
//! 1. wait on the frame fence (previous frame fully retired)
//! 2. acquire a swapchain image          -> SurfaceGone on failure
//! 3. reset the frame fence
//! 4. re-record compute and graphics command buffers
//! 5. submit compute
//! 6. submit graphics (signals the fence)
//! 7. present                            -> SurfaceGone on failure
//! ```
//!
//! The fence is reset only after a successful acquire, so a frame that fails
//! to acquire leaves the fence signaled and every object untouched.

use tracing::{debug, error, trace, warn};

use crate::error::{RenderError, RenderResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    FrameRequested,
    ComputeSubmitted,
    GraphicsSubmitted,
    Presented,
    Terminal,
}

impl FrameState {
    /// Whether `self → next` is a legal step of the frame cycle.
    pub fn can_transition_to(self, next: FrameState) -> bool {
        use FrameState::*;
        matches!(
            (self, next),
            (Idle, FrameRequested)
                | (FrameRequested, ComputeSubmitted)
                | (ComputeSubmitted, GraphicsSubmitted)
                | (GraphicsSubmitted, Presented)
                | (Presented, Idle)
        ) || (next == Terminal && self != Terminal)
    }
}

/// Bookkeeping for the single frame slot.
#[derive(Debug)]
pub struct FrameCycle {
    /// Current step of the frame.
    state: FrameState,
    /// Set by the fence wait, cleared once the frame is recorded.
    fence_observed: bool,
    /// Frames that reached present.
    frames_presented: u64,
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCycle {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            fence_observed: false,
            frames_presented: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Number of frames that reached `Presented`.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state == FrameState::Terminal
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidTransition`] for an illegal step; the
    /// state is left unchanged.
    pub fn transition(&mut self, next: FrameState) -> RenderResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(RenderError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        trace!("Frame state {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Marks the previous frame's fence as waited on.
    pub fn observe_fence(&mut self) {
        self.fence_observed = true;
    }

    /// Refuses recording until the fence has been observed for this frame.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::RecordBeforeFence`].
    pub fn ensure_recordable(&self) -> RenderResult<()> {
        if self.fence_observed {
            Ok(())
        } else {
            Err(RenderError::RecordBeforeFence)
        }
    }

    /// Closes a presented frame and returns to `Idle`.
    ///
    /// Returns the zero-based number of the frame just completed.
    pub fn complete(&mut self) -> RenderResult<u64> {
        self.transition(FrameState::Idle)?;
        self.fence_observed = false;
        let frame = self.frames_presented;
        self.frames_presented += 1;
        Ok(frame)
    }

    /// Enters `Terminal`. Idempotent.
    pub fn fail(&mut self) {
        if self.state != FrameState::Terminal {
            warn!("Frame scheduler entering Terminal from {:?}", self.state);
            self.state = FrameState::Terminal;
        }
    }
}

/// Result of a successful acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

/// Summary of one presented frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub image_index: u32,
    pub suboptimal: bool,
}

/// The GPU operations of one frame, in the order [`draw_next_frame`] calls them.
pub trait FrameBackend {
    /// Blocks until the previous frame's fence is signaled.
    fn wait_for_previous_frame(&mut self) -> RenderResult<()>;

    /// Acquires the next presentable image. Failure is [`RenderError::SurfaceGone`].
    fn acquire_image(&mut self) -> RenderResult<AcquiredImage>;

    fn reset_frame_fence(&mut self) -> RenderResult<()>;

    /// Re-records the compute and graphics command buffers for `image_index`.
    fn record(&mut self, image_index: u32, frame: u64) -> RenderResult<()>;

    fn submit_compute(&mut self) -> RenderResult<()>;

    /// Submits graphics work; the submission signals the frame fence.
    fn submit_graphics(&mut self) -> RenderResult<()>;

    /// Presents `image_index`. Returns whether the swapchain is suboptimal.
    fn present(&mut self, image_index: u32) -> RenderResult<bool>;
}

/// Draws one frame.
///
/// # Errors
///
/// - [`RenderError::Terminal`] if a previous frame failed
/// - [`RenderError::SurfaceGone`] if acquire or present failed
/// - [`RenderError::Fatal`] for any other GPU failure
///
/// Every error except `Terminal` moves `cycle` to [`FrameState::Terminal`].
pub fn draw_next_frame<B: FrameBackend>(cycle: &mut FrameCycle, backend: &mut B) -> RenderResult<FrameReport> {
    if cycle.is_terminal() {
        return Err(RenderError::Terminal);
    }

    let result = run_frame(cycle, backend);
    if let Err(e) = &result {
        error!("Frame {} failed: {}", cycle.frames_presented(), e);
        cycle.fail();
    }
    result
}

fn run_frame<B: FrameBackend>(cycle: &mut FrameCycle, backend: &mut B) -> RenderResult<FrameReport> {
    cycle.transition(FrameState::FrameRequested)?;

    backend.wait_for_previous_frame()?;
    cycle.observe_fence();

    let acquired = backend.acquire_image()?;
    if acquired.suboptimal {
        debug!("Acquired image {} from a suboptimal swapchain", acquired.index);
    }

    backend.reset_frame_fence()?;

    cycle.ensure_recordable()?;
    backend.record(acquired.index, cycle.frames_presented())?;

    backend.submit_compute()?;
    cycle.transition(FrameState::ComputeSubmitted)?;

    backend.submit_graphics()?;
    cycle.transition(FrameState::GraphicsSubmitted)?;

    let present_suboptimal = backend.present(acquired.index)?;
    cycle.transition(FrameState::Presented)?;

    let frame = cycle.complete()?;
    Ok(FrameReport {
        frame,
        image_index: acquired.index,
        suboptimal: acquired.suboptimal || present_suboptimal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use vkcrt_rhi::RhiError;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        WaitFence,
        Acquire,
        ResetFence,
        Record(u32),
        SubmitCompute,
        SubmitGraphics,
        Present(u32),
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        image_count: u32,
        next_image: u32,
        fail_acquire_at: Option<usize>,
        fail_submit_graphics: bool,
        fail_present: bool,
        acquires: usize,
    }

    impl MockBackend {
        fn with_images(image_count: u32) -> Self {
            Self {
                image_count,
                ..Default::default()
            }
        }

        fn count(&self, call: fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| call(c)).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_previous_frame(&mut self) -> RenderResult<()> {
            self.calls.push(Call::WaitFence);
            Ok(())
        }

        fn acquire_image(&mut self) -> RenderResult<AcquiredImage> {
            self.calls.push(Call::Acquire);
            let attempt = self.acquires;
            self.acquires += 1;
            if self.fail_acquire_at == Some(attempt) {
                return Err(RenderError::SurfaceGone(vk::Result::ERROR_OUT_OF_DATE_KHR));
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquiredImage {
                index,
                suboptimal: false,
            })
        }

        fn reset_frame_fence(&mut self) -> RenderResult<()> {
            self.calls.push(Call::ResetFence);
            Ok(())
        }

        fn record(&mut self, image_index: u32, _frame: u64) -> RenderResult<()> {
            self.calls.push(Call::Record(image_index));
            Ok(())
        }

        fn submit_compute(&mut self) -> RenderResult<()> {
            self.calls.push(Call::SubmitCompute);
            Ok(())
        }

        fn submit_graphics(&mut self) -> RenderResult<()> {
            self.calls.push(Call::SubmitGraphics);
            if self.fail_submit_graphics {
                return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST).into());
            }
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> RenderResult<bool> {
            self.calls.push(Call::Present(image_index));
            if self.fail_present {
                return Err(RenderError::SurfaceGone(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
            Ok(false)
        }
    }

    #[test]
    fn test_transition_table() {
        use FrameState::*;
        assert!(Idle.can_transition_to(FrameRequested));
        assert!(Presented.can_transition_to(Idle));
        assert!(ComputeSubmitted.can_transition_to(Terminal));
        assert!(!Idle.can_transition_to(ComputeSubmitted));
        assert!(!FrameRequested.can_transition_to(GraphicsSubmitted));
        assert!(!Terminal.can_transition_to(Idle));
        assert!(!Terminal.can_transition_to(Terminal));
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut cycle = FrameCycle::new();
        let err = cycle.transition(FrameState::Presented).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidTransition {
                from: FrameState::Idle,
                to: FrameState::Presented
            }
        ));
        assert_eq!(cycle.state(), FrameState::Idle);
    }

    #[test]
    fn test_record_requires_fence_observation() {
        let mut cycle = FrameCycle::new();
        assert!(matches!(cycle.ensure_recordable(), Err(RenderError::RecordBeforeFence)));
        cycle.observe_fence();
        assert!(cycle.ensure_recordable().is_ok());
    }

    #[test]
    fn test_single_frame_call_order() {
        let mut cycle = FrameCycle::new();
        let mut backend = MockBackend::with_images(3);

        let report = draw_next_frame(&mut cycle, &mut backend).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::WaitFence,
                Call::Acquire,
                Call::ResetFence,
                Call::Record(0),
                Call::SubmitCompute,
                Call::SubmitGraphics,
                Call::Present(0),
            ]
        );
        assert_eq!(report.frame, 0);
        assert_eq!(report.image_index, 0);
        assert_eq!(cycle.state(), FrameState::Idle);
        assert_eq!(cycle.frames_presented(), 1);
    }

    #[test]
    fn test_every_record_follows_a_fence_wait() {
        const FRAMES: usize = 50;
        let mut cycle = FrameCycle::new();
        let mut backend = MockBackend::with_images(3);

        for expected in 0..FRAMES as u64 {
            let report = draw_next_frame(&mut cycle, &mut backend).unwrap();
            assert_eq!(report.frame, expected);
        }

        let mut waited = false;
        for call in &backend.calls {
            match call {
                Call::WaitFence => waited = true,
                Call::Record(_) => {
                    assert!(waited, "record without a preceding fence wait");
                    waited = false;
                }
                _ => {}
            }
        }
        assert_eq!(backend.count(|c| matches!(c, Call::Record(_))), FRAMES);
        assert_eq!(backend.count(|c| matches!(c, Call::WaitFence)), FRAMES);
    }

    #[test]
    fn test_images_rotate_and_present_matches_acquire() {
        let mut cycle = FrameCycle::new();
        let mut backend = MockBackend::with_images(2);

        let indices: Vec<u32> = (0..4)
            .map(|_| draw_next_frame(&mut cycle, &mut backend).unwrap().image_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 0, 1]);

        let presented: Vec<u32> = backend
            .calls
            .iter()
            .filter_map(|c| if let Call::Present(i) = c { Some(*i) } else { None })
            .collect();
        assert_eq!(presented, indices);
    }

    #[test]
    fn test_acquire_failure_is_surface_gone_and_touches_nothing() {
        let mut cycle = FrameCycle::new();
        let mut backend = MockBackend {
            fail_acquire_at: Some(0),
            ..MockBackend::with_images(3)
        };

        let err = draw_next_frame(&mut cycle, &mut backend).unwrap_err();
        assert!(err.is_surface_gone());
        assert_eq!(backend.calls, vec![Call::WaitFence, Call::Acquire]);
        assert_eq!(cycle.state(), FrameState::Terminal);
        assert_eq!(cycle.frames_presented(), 0);
    }

    #[test]
    fn test_terminal_refuses_further_frames() {
        let mut cycle = FrameCycle::new();
        let mut backend = MockBackend {
            fail_acquire_at: Some(2),
            ..MockBackend::with_images(3)
        };

        draw_next_frame(&mut cycle, &mut backend).unwrap();
        draw_next_frame(&mut cycle, &mut backend).unwrap();
        assert!(draw_next_frame(&mut cycle, &mut backend).unwrap_err().is_surface_gone());

        let calls_before = backend.calls.len();
        assert!(matches!(
            draw_next_frame(&mut cycle, &mut backend),
            Err(RenderError::Terminal)
        ));
        assert_eq!(backend.calls.len(), calls_before);
        assert_eq!(cycle.frames_presented(), 2);
    }

    #[test]
    fn test_submit_failure_is_fatal() {
        let mut cycle = FrameCycle::new();
        let mut backend = MockBackend {
            fail_submit_graphics: true,
            ..MockBackend::with_images(3)
        };

        let err = draw_next_frame(&mut cycle, &mut backend).unwrap_err();
        assert!(matches!(err, RenderError::Fatal(_)));
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Present(_))));
        assert!(cycle.is_terminal());
    }

    #[test]
    fn test_present_failure_is_surface_gone() {
        let mut cycle = FrameCycle::new();
        let mut backend = MockBackend {
            fail_present: true,
            ..MockBackend::with_images(3)
        };

        let err = draw_next_frame(&mut cycle, &mut backend).unwrap_err();
        assert!(err.is_surface_gone());
        assert!(cycle.is_terminal());
    }
}
