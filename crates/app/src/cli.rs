use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use vkcrt_core::{RenderConfig, SharedResourceKind};

#[derive(Parser, Debug)]
#[command(
    name = "vkcrt",
    author,
    version,
    about = "Ray-traces a scene in a compute pass and presents it through a graphics pass"
)]
pub struct Cli {
    /// TOML configuration file; flags below override its values.
    #[arg(long, short, value_name = "FILE", env = "VKCRT_CONFIG")]
    pub config: Option<PathBuf>,

    /// How compute output reaches the graphics pass (`buffer` or `texture`).
    #[arg(long, value_name = "KIND")]
    pub variant: Option<SharedResourceKind>,

    /// Window and render size, e.g. `1280x720` or `1366x768`.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Directory holding `<variant>.{vert,frag,comp}.spv`.
    #[arg(long, value_name = "DIR")]
    pub shader_dir: Option<PathBuf>,

    /// Enable or disable the Vulkan validation layers.
    #[arg(long, value_name = "BOOL")]
    pub validation: Option<bool>,

    /// Put compute on a compute-only queue family when the GPU has one.
    #[arg(long)]
    pub dedicated_compute: bool,

    /// Exit after presenting this many frames.
    #[arg(long, value_name = "N")]
    pub frames: Option<u64>,

    /// Frames between throughput log lines.
    #[arg(long, value_name = "N")]
    pub stats_interval: Option<u64>,
}

impl Cli {
    /// Builds the run configuration: file (or defaults) first, then flags.
    pub fn resolve(&self) -> Result<RenderConfig> {
        let mut config = match &self.config {
            Some(path) => RenderConfig::load(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => RenderConfig::default(),
        };

        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some((width, height)) = self.size {
            config.width = width;
            config.height = height;
        }
        if let Some(dir) = &self.shader_dir {
            config.shader_dir = dir.clone();
        }
        if let Some(validation) = self.validation {
            config.validation = validation;
        }
        if self.dedicated_compute {
            config.prefer_dedicated_compute = true;
        }
        if let Some(frames) = self.frames {
            config.frame_limit = Some(frames);
        }
        if let Some(interval) = self.stats_interval {
            config.stats_interval = interval;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let Some((width, height)) = value.split_once(['x', 'X']) else {
        bail!("expected WIDTHxHEIGHT, got '{value}'");
    };
    let width = width.trim().parse().with_context(|| format!("invalid width in '{value}'"))?;
    let height = height.trim().parse().with_context(|| format!("invalid height in '{value}'"))?;
    Ok((width, height))
}
