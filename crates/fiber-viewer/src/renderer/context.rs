//! Adapter and device setup, shared by the windowed viewer and the headless GPU tests.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use winit::window::Window;

/// Optional features used when the adapter offers them.
const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;

/// Surface, device and queue of the viewer window.
pub struct GfxContext {
    pub surface: wgpu::Surface<'static>,
    pub device:  wgpu::Device,
    pub queue:   wgpu::Queue,
    pub config:  wgpu::SurfaceConfiguration,
    pub size:    winit::dpi::PhysicalSize<u32>,
}

impl GfxContext {
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window)?;

        let adapter = request_adapter(&instance, Some(&surface))
            .await
            .ok_or_else(|| anyhow!("Failed to find a suitable GPU adapter."))?;
        let (device, queue) = request_device(&adapter, "Viewer Device").await?;

        let caps = surface.get_capabilities(&adapter);
        let format = preferred_format(&caps.formats)
            .ok_or_else(|| anyhow!("Surface reports no supported formats."))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!("Surface {:?} at {}x{}", format, config.width, config.height);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
        })
    }

    /// Reconfigures the swap chain; zero-sized (minimised) windows are ignored.
    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
    }

    /// True when the swap chain already encodes sRGB on write.
    pub fn surface_is_srgb(&self) -> bool {
        self.config.format.is_srgb()
    }
}

/// Device and queue without a surface, for compute work and tests.
pub struct HeadlessGpu {
    pub device: wgpu::Device,
    pub queue:  wgpu::Queue,
}

impl HeadlessGpu {
    /// Returns `None` when the machine has no usable adapter.
    pub async fn new() -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = request_adapter(&instance, None).await?;
        match request_device(&adapter, "Headless Device").await {
            Ok((device, queue)) => Some(Self { device, queue }),
            Err(e) => {
                log::warn!("Headless device request failed: {}", e);
                None
            }
        }
    }

    pub fn blocking() -> Option<Self> {
        pollster::block_on(Self::new())
    }
}

async fn request_adapter(instance: &wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Option<wgpu::Adapter> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await?;
    let info = adapter.get_info();
    log::info!("Using adapter {} ({:?})", info.name, info.backend);
    Some(adapter)
}

async fn request_device(adapter: &wgpu::Adapter, label: &str) -> Result<(wgpu::Device, wgpu::Queue)> {
    let features = adapter.features() & OPTIONAL_FEATURES;
    if !features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER) {
        log::debug!("Clamp-to-border sampling unavailable; occlusion lookups mask the volume edge");
    }
    let pair = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: features,
                required_limits: wgpu::Limits::default(),
            },
            None,
        )
        .await?;
    Ok(pair)
}

/// First sRGB format, else whatever the surface lists first.
fn preferred_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| formats.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat as F;

    #[test]
    fn prefers_srgb_surface_formats() {
        assert_eq!(
            preferred_format(&[F::Bgra8Unorm, F::Bgra8UnormSrgb]),
            Some(F::Bgra8UnormSrgb)
        );
        assert_eq!(preferred_format(&[F::Rgba16Float]), Some(F::Rgba16Float));
        assert_eq!(preferred_format(&[]), None);
    }
}
