//! Manages the off-screen render targets: the G-buffer of the deferred path and the
//! accumulation target of the transparent path.

pub struct Targets {
    // Private textures – keep alive for the lifetime of the views.
    _color_tex: wgpu::Texture,
    _normal_tex: wgpu::Texture,
    _depth_tex: wgpu::Texture,
    _accum_tex: wgpu::Texture,
    // read back by `read_position`
    position_tex: wgpu::Texture,

    // Public texture views used by render passes and post‑processing.
    pub color: wgpu::TextureView,
    pub position: wgpu::TextureView,
    pub normal: wgpu::TextureView,
    pub depth: wgpu::TextureView,
    pub accum: wgpu::TextureView,

    pub size: wgpu::Extent3d,
}

impl Targets {
    pub const COLOR_FMT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
    pub const POSITION_FMT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
    pub const NORMAL_FMT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
    pub const DEPTH_FMT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
    pub const ACCUM_FMT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

    pub fn new(device: &wgpu::Device, size: winit::dpi::PhysicalSize<u32>) -> Self {
        // Ensure non‑zero dimensions.
        let tex_size = wgpu::Extent3d {
            width: size.width.max(1),
            height: size.height.max(1),
            depth_or_array_layers: 1,
        };

        let create_tex = |label: &str, format, usage| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: tex_size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let sampled = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;

        let color_tex = create_tex("GBuffer Color", Self::COLOR_FMT, sampled);
        // position is also read back for click-to-focus
        let position_tex = create_tex(
            "GBuffer Position",
            Self::POSITION_FMT,
            sampled | wgpu::TextureUsages::COPY_SRC,
        );
        let normal_tex = create_tex("GBuffer Normal", Self::NORMAL_FMT, sampled);
        let depth_tex = create_tex(
            "Scene Depth Target",
            Self::DEPTH_FMT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        let accum_tex = create_tex("Transparent Accumulation", Self::ACCUM_FMT, sampled);

        let view = |t: &wgpu::Texture| t.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            color: view(&color_tex),
            position: view(&position_tex),
            normal: view(&normal_tex),
            depth: view(&depth_tex),
            accum: view(&accum_tex),
            _color_tex: color_tex,
            _normal_tex: normal_tex,
            _depth_tex: depth_tex,
            _accum_tex: accum_tex,
            position_tex,
            size: tex_size,
        }
    }

    /// Recreates every target at the new window size.
    pub fn resize(&mut self, device: &wgpu::Device, size: winit::dpi::PhysicalSize<u32>) {
        *self = Self::new(device, size);
    }

    /// World position stored in the G-buffer at pixel (`x`, `y`); `None` where no tube was hit.
    pub fn read_position(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        x: u32,
        y: u32,
    ) -> anyhow::Result<Option<[f32; 4]>> {
        if x >= self.size.width || y >= self.size.height {
            return Ok(None);
        }

        // one texel, padded to the required row alignment
        let row = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Position Readback"),
            size: row,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Position Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.position_tex,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row as u32),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        rx.recv()??;

        let view = slice.get_mapped_range();
        let texel: [f32; 4] = bytemuck::pod_read_unaligned(&view[..16]);
        drop(view);
        staging.unmap();

        Ok((texel[3] != 0.0).then_some(texel))
    }
}
