pub mod convert;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod texture;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
pub use frame::{Frame, MemoryLayout, PixelFormat};
pub use pipeline::{
    sink_fn, ConnectionId, Dispatcher, OverloadPolicy, ProcessedResult, ResultSink, SharedDispatcher,
    SubmitOutcome,
};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub texture: TextureConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run conversions on worker threads and complete them on `tick`
    pub deferred_mode: bool,
    pub overload_policy: OverloadPolicy,
    /// Retired textures kept per connection
    pub pool_depth: usize,
    /// Conversion threads, deferred mode only
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Host,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuApi {
    Vulkan,
    Metal,
    Dx12,
    OpenGl,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub backend: BackendKind,
    pub api: GpuApi,
}

/// Synthetic load for the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub connections: usize,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub duration_secs: u64,
    /// Formats each connection cycles through
    pub formats: Vec<PixelFormat>,
    /// Frames between format switches
    pub switch_every: u64,
    /// Tick interval of the host loop
    pub tick_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deferred_mode: false,
            overload_policy: OverloadPolicy::ForceComplete,
            pool_depth: 3,
            worker_threads: 2,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.deferred_mode && self.worker_threads == 0 {
            return Err(Error::InvalidConfig(
                "deferred mode needs at least one worker thread".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Host,
            api: GpuApi::Auto,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            connections: 3,
            fps: 30,
            width: 640,
            height: 360,
            duration_secs: 5,
            formats: vec![PixelFormat::I420, PixelFormat::Bgra, PixelFormat::Nv12, PixelFormat::Rgb24],
            switch_every: 45,
            tick_ms: 16, // 60fps host loop
        }
    }
}

impl Config {
    /// Defaults, then an optional TOML file, then `FRAMEFLOW__SECTION__KEY` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("FRAMEFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.pipeline.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "gpu")]
impl GpuApi {
    pub fn backends(self) -> wgpu::Backends {
        match self {
            GpuApi::Vulkan => wgpu::Backends::VULKAN,
            GpuApi::Metal => wgpu::Backends::METAL,
            GpuApi::Dx12 => wgpu::Backends::DX12,
            GpuApi::OpenGl => wgpu::Backends::GL,
            GpuApi::Auto => wgpu::Backends::all(),
        }
    }
}
