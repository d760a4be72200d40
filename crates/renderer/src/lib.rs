//! Compute-to-graphics frame scheduling.
//!
//! This crate orchestrates one frame in flight:
//! - a compute pass writes a shared buffer or storage image
//! - a graphics pass reads it and draws into the acquired swapchain image
//! - the image is presented
//!
//! [`Renderer`] owns the Vulkan objects; [`frame`] holds the state machine
//! and the per-frame call order.

mod error;
pub mod frame;
pub mod passes;
mod renderer;
pub mod shared;

pub use error::{FailureClass, RenderError, RenderResult};
pub use frame::{FrameBackend, FrameCycle, FrameReport, FrameState};
pub use renderer::Renderer;
