//! WebGPU texture backend

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, instrument};
use wgpu::*;

use super::{OutputTexture, Storage, TextureBackend, TextureDesc, TextureFormat as OutputFormat};
use crate::error::{Error, Result};
use crate::GpuApi;

/// Allocates frame textures on a headless WebGPU device
#[derive(Debug)]
pub struct WgpuBackend {
    device: Device,
    queue: Queue,
    live: AtomicUsize,
}

impl WgpuBackend {
    /// Open a headless device on the requested API
    #[instrument]
    pub fn new(api: GpuApi) -> Result<Self> {
        info!("Initializing WebGPU texture backend");

        let instance = Instance::new(InstanceDescriptor {
            backends: api.backends(),
            ..Default::default()
        });

        // Get adapter - prefer high-performance
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| Error::Backend("No suitable GPU adapter found".into()))?;

        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &DeviceDescriptor {
                label: Some("frameflow texture device"),
                required_features: Features::empty(),
                required_limits: Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| Error::Backend(format!("Failed to create device: {e}")))?;

        Ok(Self::from_device(device, queue))
    }

    /// Share a device the host renderer already owns
    pub fn from_device(device: Device, queue: Queue) -> Self {
        Self {
            device,
            queue,
            live: AtomicUsize::new(0),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl TextureBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create(&self, desc: TextureDesc) -> Result<OutputTexture> {
        let storage = match desc.format {
            OutputFormat::External => Storage::External(None),
            OutputFormat::Rgba8 => {
                let texture = self.device.create_texture(&TextureDescriptor {
                    label: Some("Frame Texture"),
                    size: Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format: TextureFormat::Rgba8UnormSrgb,
                    usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                Storage::Gpu(texture)
            }
        };
        self.live.fetch_add(1, Ordering::Relaxed);
        let texture = OutputTexture::new(desc, storage);
        debug!(texture = %texture.id(), width = desc.width, height = desc.height, "gpu texture created");
        Ok(texture)
    }

    fn write(&self, texture: &mut OutputTexture, rgba: &[u8]) -> Result<()> {
        let desc = texture.desc();
        if rgba.len() != desc.byte_len() {
            return Err(Error::Backend(format!(
                "upload of {} bytes into a {} byte texture",
                rgba.len(),
                desc.byte_len()
            )));
        }
        let Storage::Gpu(gpu_texture) = texture.storage() else {
            return Err(Error::Backend("texture has no GPU storage".into()));
        };

        self.queue.write_texture(
            ImageCopyTexture {
                texture: gpu_texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            rgba,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * desc.width),
                rows_per_image: Some(desc.height),
            },
            Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy(&self, texture: OutputTexture) {
        if let Some(gpu_texture) = texture.gpu_texture() {
            gpu_texture.destroy();
        }
        self.live.fetch_sub(1, Ordering::Relaxed);
        debug!(texture = %texture.id(), "gpu texture destroyed");
    }
}
