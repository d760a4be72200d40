//! Platform abstraction layer for vkcrt.
//!
//! This crate provides platform-specific functionality:
//! - A fixed-size window via winit
//! - Vulkan surface creation and the instance extensions it needs
//! - Keyboard command mapping

mod input;
mod window;

pub use input::{AppCommand, ElementState, KeyCode, command_for_key};
pub use window::{Surface, Window, get_required_extensions};
