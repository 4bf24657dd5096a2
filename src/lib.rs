pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{CopyPath, FramePacket, I420Frame};
pub use display::{Handle, HandleTable, RenderApi, RendererRegistry};
pub use error::{BridgeError, FrameError, HandleError, Result};
pub use pipeline::{FrameBridge, OutputSample, Pull};

/// Environment variables prefixed with this (e.g. `FRAMEBRIDGE__BRIDGE__READY_CAPACITY`)
/// override file settings.
pub const ENV_PREFIX: &str = "FRAMEBRIDGE";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub stats: StatsConfig,
    pub renderer: RendererConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Frames kept for the consumer; older ones are evicted. 1 gives the
    /// lowest latency, more absorbs producer jitter.
    pub ready_capacity: usize,
    /// Output rate used to stamp samples.
    pub nominal_fps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Events per rolling-rate window.
    pub window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Recycled frame buffers kept by the renderer registry.
    pub max_free_frames: usize,
}

/// Synthetic producer/consumer settings for the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub width: u32,
    pub height: u32,
    pub producer_fps: f64,
    pub consumer_fps: f64,
    /// Upper bound of the extra delay added to each produced frame.
    pub jitter_ms: u64,
    pub duration_secs: u64,
    pub report_interval_secs: u64,
    /// Every n-th sample is not signalled back as processed (0 = never skip).
    pub skip_processed_every: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ready_capacity: 1,
            nominal_fps: 30.0,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { window: 100 }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self { max_free_frames: 8 }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            producer_fps: 30.0,
            consumer_fps: 30.0,
            jitter_ms: 12,
            duration_secs: 10,
            report_interval_secs: 2,
            skip_processed_every: 5,
        }
    }
}

impl Config {
    /// Layer an optional TOML file and `FRAMEBRIDGE__*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge.ready_capacity == 0 {
            return Err(BridgeError::InvalidConfig(
                "bridge.ready_capacity must be at least 1".into(),
            ));
        }
        if !(self.bridge.nominal_fps.is_finite() && self.bridge.nominal_fps > 0.0) {
            return Err(BridgeError::InvalidConfig(
                "bridge.nominal_fps must be positive".into(),
            ));
        }
        for (name, fps) in [
            ("demo.producer_fps", self.demo.producer_fps),
            ("demo.consumer_fps", self.demo.consumer_fps),
        ] {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(BridgeError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.stats.window < 2 {
            return Err(BridgeError::InvalidConfig(
                "stats.window must be at least 2".into(),
            ));
        }
        Ok(())
    }
}
