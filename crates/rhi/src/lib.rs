//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance, physical device and logical device creation
//! - Swapchain management
//! - Command buffer recording
//! - Buffer and storage image management
//! - Render pass, descriptor and pipeline creation
//! - Synchronization primitives and access scopes
//! - Live object accounting through [`tracker::ResourceTracker`]

mod error;

pub mod buffer;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod tracker;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
