//! GPU resources derived from the dataset. Every `rebuild_*` destroys the old handles
//! before creating new ones; nothing is resized in place.

use crate::data::{ColorSource, PreparedTubes, ScalarField, SceneUniforms, TubeVertexGpu};
use crate::density::{DensityVolume, MipLevel};
use crate::sort::GpuSorter;
use glam::{UVec3, Vec3};
use half::f16;
use wgpu::util::DeviceExt;

/// Texels in the transfer-function lookup.
pub const TRANSFER_WIDTH: u32 = 256;

/// A 3D R16Float texture with its view.
pub struct VolumeTexture {
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub dims: UVec3,
    pub mip_levels: u32,
}

impl VolumeTexture {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

    /// Uploads `levels`, finest first.
    fn new(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, levels: &[MipLevel]) -> Self {
        let dims = levels.first().map_or(UVec3::ONE, |l| l.dims.max(UVec3::ONE));
        let mip_levels = levels.len().max(1) as u32;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: dims.x,
                height: dims.y,
                depth_or_array_layers: dims.z,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (level, mip) in levels.iter().enumerate() {
            let halves: Vec<f16> = mip.data.iter().map(|&v| f16::from_f32(v)).collect();
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: level as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(&halves),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(2 * mip.dims.x),
                    rows_per_image: Some(mip.dims.y),
                },
                wgpu::Extent3d {
                    width: mip.dims.x,
                    height: mip.dims.y,
                    depth_or_array_layers: mip.dims.z,
                },
            );
        }

        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            texture,
            dims,
            mip_levels,
        }
    }

    /// A single zero texel, bound while no real volume exists.
    fn empty(device: &wgpu::Device, queue: &wgpu::Queue, label: &str) -> Self {
        Self::new(
            device,
            queue,
            label,
            &[MipLevel {
                dims: UVec3::ONE,
                data: vec![0.0],
            }],
        )
    }
}

/// Scalar field prepared for volume rendering.
pub struct ScalarVolume {
    pub texture: VolumeTexture,
    /// Render-space box covered by the field.
    pub box_min: Vec3,
    pub box_max: Vec3,
}

/// Owns every buffer and texture the render passes read.
pub struct SceneResources {
    pub scene_buf: wgpu::Buffer,

    /// Two `TubeVertexGpu` per segment.
    pub vertices: wgpu::Buffer,
    /// One colour per vertex, parallel to `vertices`.
    pub colors: wgpu::Buffer,
    /// Vertex-pair indices in draw order, written by the expand pass.
    pub pairs: wgpu::Buffer,
    pub sorter: GpuSorter,
    pub segment_count: u32,

    pub density: VolumeTexture,
    pub scalar: Option<ScalarVolume>,
    placeholder_scalar: VolumeTexture,

    _transfer_tex: wgpu::Texture,
    pub transfer: wgpu::TextureView,
    pub linear_sampler: wgpu::Sampler,
    /// Reads zero outside the density volume where the device allows it.
    pub density_sampler: wgpu::Sampler,
}

impl SceneResources {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let scene_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene UBO"),
            contents: bytemuck::bytes_of(&SceneUniforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let (transfer_tex, transfer) = create_transfer_texture(device, queue);

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volume Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let border = device
            .features()
            .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        let density_sampler = device.create_sampler(&density_sampler_descriptor(border));

        Self {
            scene_buf,
            vertices: storage_placeholder(device, "Tube Vertices"),
            colors: storage_placeholder(device, "Tube Colors"),
            pairs: storage_placeholder(device, "Tube Pair Indices"),
            sorter: GpuSorter::new(device, 0),
            segment_count: 0,
            density: VolumeTexture::empty(device, queue, "Density Volume"),
            scalar: None,
            placeholder_scalar: VolumeTexture::empty(device, queue, "Scalar Volume"),
            _transfer_tex: transfer_tex,
            transfer,
            linear_sampler,
            density_sampler,
        }
    }

    pub fn write_scene(&self, queue: &wgpu::Queue, uniforms: &SceneUniforms) {
        queue.write_buffer(&self.scene_buf, 0, bytemuck::bytes_of(uniforms));
    }

    /// Replaces the tube vertex, colour and index buffers and the sorter.
    pub fn rebuild_geometry(&mut self, device: &wgpu::Device, tubes: &PreparedTubes, source: ColorSource) {
        self.vertices.destroy();
        self.pairs.destroy();

        let vertices = tube_vertices(tubes);
        self.segment_count = tubes.segment_count() as u32;
        self.vertices = if vertices.is_empty() {
            storage_placeholder(device, "Tube Vertices")
        } else {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tube Vertices"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::STORAGE,
            })
        };

        // identity order until the first sort
        let identity: Vec<u32> = (0..vertices.len().max(1) as u32).collect();
        self.pairs = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Tube Pair Indices"),
            contents: bytemuck::cast_slice(&identity),
            usage: wgpu::BufferUsages::STORAGE,
        });

        self.sorter = GpuSorter::new(device, self.segment_count);
        self.rebuild_colors(device, tubes, source);

        log::debug!(
            "Uploaded {} segments ({} bytes of vertices)",
            self.segment_count,
            std::mem::size_of_val(vertices.as_slice())
        );
    }

    pub fn rebuild_colors(&mut self, device: &wgpu::Device, tubes: &PreparedTubes, source: ColorSource) {
        self.colors.destroy();
        let colors = tubes.colors_or_default(source);
        self.colors = if colors.is_empty() {
            storage_placeholder(device, "Tube Colors")
        } else {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tube Colors"),
                contents: bytemuck::cast_slice(colors),
                usage: wgpu::BufferUsages::STORAGE,
            })
        };
    }

    /// Uploads the density volume with its full mip chain.
    pub fn rebuild_density(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, volume: &DensityVolume) {
        self.density.texture.destroy();
        self.density = VolumeTexture::new(device, queue, "Density Volume", &volume.mip_chain());
    }

    pub fn clear_density(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        self.density.texture.destroy();
        self.density = VolumeTexture::empty(device, queue, "Density Volume");
    }

    /// Uploads `field` normalized to [0, 1], spanning [0, `box_max`] in render space.
    pub fn rebuild_scalar_volume(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        field: Option<&ScalarField>,
        box_max: Vec3,
    ) {
        if let Some(old) = self.scalar.take() {
            old.texture.texture.destroy();
        }
        let Some(field) = field else { return };

        let (dims, mut data) = field.render_space();
        let max = field.max();
        if max > 0.0 {
            for v in data.iter_mut() {
                *v /= max;
            }
        }
        let level = MipLevel {
            dims: UVec3::new(dims[0] as u32, dims[1] as u32, dims[2] as u32),
            data,
        };

        self.scalar = Some(ScalarVolume {
            texture: VolumeTexture::new(device, queue, "Scalar Volume", &[level]),
            box_min: Vec3::ZERO,
            box_max,
        });
    }

    /// The scalar volume view, or a single zero texel when none is loaded.
    pub fn scalar_view(&self) -> &wgpu::TextureView {
        match &self.scalar {
            Some(s) => &s.texture.view,
            None => &self.placeholder_scalar.view,
        }
    }
}

/// Tube-space positions with per-vertex radius in w (0 when the dataset has none).
pub fn tube_vertices(tubes: &PreparedTubes) -> Vec<TubeVertexGpu> {
    tubes
        .tube_positions
        .iter()
        .enumerate()
        .map(|(i, p)| TubeVertexGpu {
            pos_radius: [p.x, p.y, p.z, tubes.radii.get(i).copied().unwrap_or(0.0)],
        })
        .collect()
}

/// Trilinear, mipmapped density lookups. With `border` the volume is surrounded by
/// zero density; without it the occlusion shader masks lookups outside the volume.
pub fn density_sampler_descriptor(border: bool) -> wgpu::SamplerDescriptor<'static> {
    let (address_mode, border_color) = if border {
        (
            wgpu::AddressMode::ClampToBorder,
            Some(wgpu::SamplerBorderColor::TransparentBlack),
        )
    } else {
        (wgpu::AddressMode::ClampToEdge, None)
    };
    wgpu::SamplerDescriptor {
        label: Some("Density Sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        border_color,
        ..Default::default()
    }
}

// wgpu rejects zero-sized bindings.
fn storage_placeholder(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: 16,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    })
}

fn create_transfer_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> (wgpu::Texture, wgpu::TextureView) {
    let texels = transfer_function(TRANSFER_WIDTH as usize);
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("Transfer Function"),
            size: wgpu::Extent3d {
                width: TRANSFER_WIDTH,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        bytemuck::cast_slice(&texels),
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// Inferno colours with opacity rising linearly from zero.
pub fn transfer_function(width: usize) -> Vec<[u8; 4]> {
    let mut texels = crate::data::colormap::inferno().to_rgba8(width);
    let last = width.saturating_sub(1).max(1) as f32;
    for (i, t) in texels.iter_mut().enumerate() {
        t[3] = ((i as f32 / last) * 255.0).round() as u8;
    }
    texels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{prepare, TractDataset};

    #[test]
    fn vertices_carry_radius_and_joint_flags() {
        let mut d = TractDataset::test_dataset();
        d.normalize(0.02).unwrap();
        let tubes = prepare(&d, None, Vec3::ONE);
        let verts = tube_vertices(&tubes);

        assert_eq!(verts.len(), tubes.positions.len());
        for (v, p) in verts.iter().zip(&tubes.positions) {
            assert_eq!(v.pos_radius[0].abs(), p.x);
        }
        if d.has_radii() {
            assert!(verts.iter().all(|v| v.pos_radius[3] > 0.0));
        }
        // the first vertex of every tract is an end cap, never a joint
        assert!(verts[0].pos_radius[0] > 0.0);
    }

    #[test]
    fn density_outside_the_volume_reads_zero() {
        let d = density_sampler_descriptor(true);
        assert_eq!(d.address_mode_u, wgpu::AddressMode::ClampToBorder);
        assert_eq!(d.address_mode_w, wgpu::AddressMode::ClampToBorder);
        assert_eq!(d.border_color, Some(wgpu::SamplerBorderColor::TransparentBlack));

        let fallback = density_sampler_descriptor(false);
        assert_eq!(fallback.address_mode_v, wgpu::AddressMode::ClampToEdge);
        assert_eq!(fallback.border_color, None);
        assert!(crate::renderer::pipelines::AO_WGSL.contains("outside_volume"));
    }

    #[test]
    fn transfer_function_ramps_opacity() {
        let tf = transfer_function(256);
        assert_eq!(tf.len(), 256);
        assert_eq!(tf[0][3], 0);
        assert_eq!(tf[255][3], 255);
        assert!(tf.windows(2).all(|w| w[0][3] <= w[1][3]));
    }
}
