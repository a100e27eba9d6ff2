use super::{
    execute_pass, fullscreen_layout, fullscreen_vbo, opaque_target, sampler_entry, scene_layout, shader_module,
    texture_entry, uniform_entry, SCENE_WGSL,
};
use crate::renderer::resources::SceneResources;
use glam::Vec3;
use wgpu::util::DeviceExt;

/// Ray-march steps across the longest box diagonal.
const STEPS_PER_DIAGONAL: f32 = 512.0;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Default, Debug)]
struct VolumeParams {
    box_min: [f32; 4],
    box_max: [f32; 4],
    /// step length, opacity scale, max steps, unused
    march: [f32; 4],
}

impl VolumeParams {
    fn new(box_min: Vec3, box_max: Vec3, opacity_scale: f32) -> Self {
        let diagonal = (box_max - box_min).length().max(1e-6);
        let step = diagonal / STEPS_PER_DIAGONAL;
        Self {
            box_min: box_min.extend(0.0).to_array(),
            box_max: box_max.extend(0.0).to_array(),
            // extinction normalized so a full-opacity ray through the diagonal reaches depth 8
            march: [step, 8.0 * opacity_scale / diagonal, STEPS_PER_DIAGONAL + 1.0, 0.0],
        }
    }
}

/// Direct volume rendering of the loaded scalar field.
pub struct VolumePipeline {
    pipeline: wgpu::RenderPipeline,
    scene_layout: wgpu::BindGroupLayout,
    volume_layout: wgpu::BindGroupLayout,
    fs_vbo: wgpu::Buffer,
}

impl VolumePipeline {
    pub fn new(device: &wgpu::Device, out_fmt: wgpu::TextureFormat) -> Self {
        let scene_layout = scene_layout(device);
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Volume Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                texture_entry(1, wgpu::TextureViewDimension::D3, true),
                texture_entry(2, wgpu::TextureViewDimension::D2, true),
                sampler_entry(3),
            ],
        });

        let shader = shader_module(
            device,
            "shaders/volume.wgsl",
            &[SCENE_WGSL, include_str!("../../../shaders/volume.wgsl")],
        );

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Volume PipelineLayout"),
            bind_group_layouts: &[&scene_layout, &volume_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Volume Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[fullscreen_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[opaque_target(out_fmt)],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        Self {
            pipeline,
            scene_layout,
            volume_layout,
            fs_vbo: fullscreen_vbo(device, "Volume FS VBO"),
        }
    }

    /// Renders the scalar volume over the background; only the background without one.
    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        dst: &wgpu::TextureView,
        res: &SceneResources,
        opacity_scale: f32,
    ) {
        // an empty box makes every ray miss
        let params = match &res.scalar {
            Some(s) => VolumeParams::new(s.box_min, s.box_max, opacity_scale),
            None => VolumeParams::default(),
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Volume Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let scene = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Volume Scene BG"),
            layout: &self.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: res.scene_buf.as_entire_binding(),
            }],
        });
        let volume = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Volume BG"),
            layout: &self.volume_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(res.scalar_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&res.transfer),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&res.linear_sampler),
                },
            ],
        });

        execute_pass(&self.pipeline, encoder, &[&scene, &volume], &self.fs_vbo, dst, "Volume Pass");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn march_covers_the_diagonal() {
        let p = VolumeParams::new(Vec3::ZERO, Vec3::new(3.0, 4.0, 0.0), 1.0);
        let step = p.march[0];
        assert!((step * STEPS_PER_DIAGONAL - 5.0).abs() < 1e-5);
        assert!(p.march[2] * step > 5.0);
        assert!((p.march[1] * 5.0 - 8.0).abs() < 1e-5);
    }
}
