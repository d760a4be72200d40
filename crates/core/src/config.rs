//! Run configuration.
//!
//! [`RenderConfig`] collects everything the scheduler needs to know before
//! the first GPU object is created. It can be built from defaults, loaded from
//! a TOML file, and then overridden field by field (the `vkcrt` binary applies
//! its command-line flags on top).
//!
//! # Example
//!
//! ```
//! use vkcrt_core::{RenderConfig, SharedResourceKind};
//!
//! let config = RenderConfig::from_toml_str(
//!     r#"
//!     variant = "texture"
//!     frame_limit = 500
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.variant, SharedResourceKind::Texture);
//! assert_eq!((config.width, config.height), (1280, 720));
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Largest accepted width or height, the common `maxImageDimension2D`.
pub const MAX_DIMENSION: u32 = 16_384;

/// How the compute pass hands its output to the graphics pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedResourceKind {
    /// RGBA32F storage buffer, read back as per-pixel vertex data.
    #[default]
    Buffer,
    /// RGBA8 storage image, sampled with `imageLoad` from the fragment stage.
    Texture,
}

impl SharedResourceKind {
    /// File stem of the SPIR-V set used by this variant.
    ///
    /// The loader expects `<stem>.vert.spv`, `<stem>.frag.spv` and `<stem>.comp.spv`.
    pub fn shader_stem(self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Texture => "texture",
        }
    }
}

impl std::fmt::Display for SharedResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Buffer => "buffer",
            Self::Texture => "texture",
        })
    }
}

impl std::str::FromStr for SharedResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buffer" => Ok(Self::Buffer),
            "texture" | "image" => Ok(Self::Texture),
            other => Err(Error::Config(format!(
                "unknown shared resource kind '{other}' (expected 'buffer' or 'texture')"
            ))),
        }
    }
}

/// Settings fixed for the lifetime of one run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Window and render target width in pixels.
    pub width: u32,
    /// Window and render target height in pixels.
    pub height: u32,
    /// Shared resource flavor.
    pub variant: SharedResourceKind,
    /// Directory holding the compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
    /// Enable the Vulkan validation layers when available.
    pub validation: bool,
    /// Put the compute role on a compute-only queue family when one exists.
    pub prefer_dedicated_compute: bool,
    /// Stop after this many presented frames.
    pub frame_limit: Option<u64>,
    /// Frames between throughput log lines.
    pub stats_interval: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            variant: SharedResourceKind::Buffer,
            shader_dir: PathBuf::from("shaders/spirv"),
            validation: cfg!(debug_assertions),
            prefer_dedicated_compute: false,
            frame_limit: None,
            stats_interval: 100,
        }
    }
}

impl RenderConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed TOML, unknown keys, or values
    /// rejected by [`RenderConfig::validate`].
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise the same
    /// errors as [`RenderConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Check that the configuration can drive the compute dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a dimension is zero or above
    /// [`MAX_DIMENSION`], or if the stats interval is zero. Sizes need not
    /// divide into whole workgroups.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "render size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::Config(format!(
                "render size {}x{} exceeds {MAX_DIMENSION} in a dimension",
                self.width, self.height
            )));
        }
        if self.stats_interval == 0 {
            return Err(Error::Config("stats_interval must be at least 1".into()));
        }
        Ok(())
    }

    /// Path of one shader stage for the configured variant, e.g. `buffer.comp.spv`.
    pub fn shader_path(&self, stage_extension: &str) -> PathBuf {
        self.shader_dir
            .join(format!("{}.{stage_extension}.spv", self.variant.shader_stem()))
    }

    /// Whether `frames` presented frames reach the configured limit.
    #[inline]
    pub fn limit_reached(&self, frames: u64) -> bool {
        self.frame_limit.is_some_and(|limit| frames >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RenderConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.stats_interval, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_keeps_defaults() {
        let config = RenderConfig::from_toml_str("").unwrap();
        assert_eq!(config, RenderConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = RenderConfig::from_toml_str(
            r#"
            width = 640
            height = 480
            variant = "texture"
            shader_dir = "/tmp/spv"
            validation = false
            prefer_dedicated_compute = true
            stats_interval = 10
            "#,
        )
        .unwrap();

        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.variant, SharedResourceKind::Texture);
        assert_eq!(config.shader_dir, PathBuf::from("/tmp/spv"));
        assert!(!config.validation);
        assert!(config.prefer_dedicated_compute);
        assert_eq!(config.stats_interval, 10);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RenderConfig::from_toml_str("fullscreen = true").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_size() {
        let config = RenderConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_accepts_partial_workgroup_size() {
        let config = RenderConfig {
            width: 1366,
            height: 768,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = RenderConfig::from_toml_str("width = 17\nheight = 1").unwrap();
        assert_eq!((config.width, config.height), (17, 1));
    }

    #[test]
    fn test_rejects_oversized_dimension() {
        let config = RenderConfig {
            width: MAX_DIMENSION + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = RenderConfig {
            width: MAX_DIMENSION,
            height: MAX_DIMENSION,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_stats_interval() {
        let err = RenderConfig::from_toml_str("stats_interval = 0").unwrap_err();
        assert!(err.to_string().contains("stats_interval"));
    }

    #[test]
    fn test_shader_paths_follow_variant() {
        let mut config = RenderConfig {
            shader_dir: PathBuf::from("spv"),
            ..Default::default()
        };
        assert_eq!(config.shader_path("comp"), PathBuf::from("spv/buffer.comp.spv"));

        config.variant = SharedResourceKind::Texture;
        assert_eq!(config.shader_path("frag"), PathBuf::from("spv/texture.frag.spv"));
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("Buffer".parse::<SharedResourceKind>().unwrap(), SharedResourceKind::Buffer);
        assert_eq!("image".parse::<SharedResourceKind>().unwrap(), SharedResourceKind::Texture);
        assert!("mesh".parse::<SharedResourceKind>().is_err());
    }

    #[test]
    fn test_frame_limit() {
        let mut config = RenderConfig::default();
        assert!(!config.limit_reached(u64::MAX));

        config.frame_limit = Some(3);
        assert!(!config.limit_reached(2));
        assert!(config.limit_reached(3));
    }
}
