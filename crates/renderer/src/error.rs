//! Renderer error types.

use ash::vk;
use thiserror::Error;

use vkcrt_rhi::RhiError;

use crate::frame::FrameState;

/// Errors from setting up or driving the frame scheduler.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A setup step failed. Everything created before it has been released.
    #[error("Renderer setup failed while creating {stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: RhiError,
    },

    /// Acquire or present reported the surface unusable (out of date, lost).
    #[error("Presentation surface is gone: {0}")]
    SurfaceGone(vk::Result),

    /// A submit, wait or recording call failed.
    #[error("Fatal GPU error: {0}")]
    Fatal(#[from] RhiError),

    /// The scheduler already failed; no further frames are drawn.
    #[error("Frame scheduler is terminal")]
    Terminal,

    #[error("Invalid frame transition from {from:?} to {to:?}")]
    InvalidTransition { from: FrameState, to: FrameState },

    /// Recording was attempted before the previous frame's fence was observed.
    #[error("Command buffers recorded before the frame fence was observed")]
    RecordBeforeFence,
}

/// Coarse kind of failure, for diagnostics and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Out of memory or descriptor pool space; the GPU may work another time.
    ResourceExhaustion,
    /// A required queue, extension or feature is absent on this GPU.
    MissingCapability,
    /// The window surface became unusable.
    SurfaceGone,
    Other,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ResourceExhaustion => "resource exhaustion",
            Self::MissingCapability => "missing capability",
            Self::SurfaceGone => "surface gone",
            Self::Other => "other",
        })
    }
}

impl RenderError {
    /// Wraps a setup failure with the name of the step that failed.
    pub fn setup(stage: &'static str) -> impl FnOnce(RhiError) -> Self {
        move |source| RenderError::Setup { stage, source }
    }

    /// The renderer stopped because the window surface went away, not
    /// because of a GPU failure.
    pub fn is_surface_gone(&self) -> bool {
        matches!(self, RenderError::SurfaceGone(_))
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            RenderError::Setup { source, .. } | RenderError::Fatal(source) => {
                if source.is_resource_exhaustion() {
                    FailureClass::ResourceExhaustion
                } else if source.is_capability_missing() {
                    FailureClass::MissingCapability
                } else {
                    FailureClass::Other
                }
            }
            RenderError::SurfaceGone(_) => FailureClass::SurfaceGone,
            _ => FailureClass::Other,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_names_stage() {
        let err = RenderError::setup("shader modules")(RhiError::ShaderError("missing".into()));
        let msg = err.to_string();
        assert!(msg.contains("shader modules"));
        assert!(msg.contains("missing"));
        assert!(matches!(err, RenderError::Setup { stage: "shader modules", .. }));
    }

    #[test]
    fn test_surface_gone_classification() {
        assert!(RenderError::SurfaceGone(vk::Result::ERROR_OUT_OF_DATE_KHR).is_surface_gone());
        assert!(!RenderError::Fatal(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)).is_surface_gone());
        assert!(!RenderError::Terminal.is_surface_gone());
    }

    #[test]
    fn test_failure_class_of_setup_errors() {
        let err = RenderError::setup("logical device")(RhiError::CapabilityNotSupported("no swapchain".into()));
        assert_eq!(err.failure_class(), FailureClass::MissingCapability);

        let err = RenderError::setup("shared resource")(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(err.failure_class(), FailureClass::ResourceExhaustion);
        assert!(err.to_string().contains("shared resource"));

        let err = RenderError::setup("shader modules")(RhiError::ShaderError("missing".into()));
        assert_eq!(err.failure_class(), FailureClass::Other);

        assert_eq!(
            RenderError::SurfaceGone(vk::Result::ERROR_SURFACE_LOST_KHR).failure_class(),
            FailureClass::SurfaceGone
        );
        assert_eq!(FailureClass::MissingCapability.to_string(), "missing capability");
    }

    #[test]
    fn test_rhi_error_converts_to_fatal() {
        fn submit() -> RenderResult<()> {
            Err::<(), _>(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))?;
            Ok(())
        }
        assert!(matches!(submit(), Err(RenderError::Fatal(_))));
    }
}
