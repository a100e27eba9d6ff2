use super::{
    density_bind_group, density_layout, shader_module, storage_entry, tube_deferred::PROXY_VERTICES,
    uniform_entry, AO_WGSL, SCENE_WGSL, TUBE_CAST_WGSL,
};
use crate::renderer::{resources::SceneResources, targets::Targets};

/// Front-to-back "under" blending: colour accumulates weighted by the remaining
/// transmittance held in destination alpha.
pub const FRONT_TO_BACK: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::DstAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::SrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Sorted, blended tubes without depth testing into the accumulation target.
pub struct TubeTransparentPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    density_layout: wgpu::BindGroupLayout,
}

impl TubeTransparentPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let vf = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Tube Transparent Layout"),
            entries: &[
                uniform_entry(0, vf),
                storage_entry(1, vf, true),
                storage_entry(2, wgpu::ShaderStages::FRAGMENT, true),
                storage_entry(3, wgpu::ShaderStages::VERTEX, true),
            ],
        });
        let density_layout = density_layout(device);

        let shader = shader_module(
            device,
            "shaders/tube_transparent.wgsl",
            &[
                SCENE_WGSL,
                TUBE_CAST_WGSL,
                AO_WGSL,
                include_str!("../../../shaders/tube_transparent.wgsl"),
            ],
        );

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tube Transparent PipelineLayout"),
            bind_group_layouts: &[&layout, &density_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Tube Transparent Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // one fragment per pixel and proxy
                cull_mode: Some(wgpu::Face::Front),
                ..Default::default()
            },
            depth_stencil: None,
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: Targets::ACCUM_FMT,
                    blend: Some(FRONT_TO_BACK),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        Self {
            pipeline,
            layout,
            density_layout,
        }
    }

    /// Clears the accumulation target to zero colour and full transmittance, then draws
    /// every segment in the order stored in `res.pairs`.
    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        targets: &Targets,
        res: &SceneResources,
    ) {
        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tube Transparent BG"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: res.scene_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: res.vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: res.colors.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: res.pairs.as_entire_binding(),
                },
            ],
        });
        let density = density_bind_group(device, &self.density_layout, &res.density.view, &res.density_sampler);

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Tube Transparent Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.accum,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: 0.0,
                        g: 0.0,
                        b: 0.0,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if res.segment_count == 0 {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind, &[]);
        pass.set_bind_group(1, &density, &[]);
        pass.draw(0..PROXY_VERTICES, 0..res.segment_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // host replay of the blend equation over (premultiplied colour, 1 - alpha) outputs
    fn blend(dst: [f32; 4], src: [f32; 4]) -> [f32; 4] {
        let a = dst[3];
        [dst[0] + a * src[0], dst[1] + a * src[1], dst[2] + a * src[2], dst[3] * src[3]]
    }

    fn fragment(rgb: [f32; 3], alpha: f32) -> [f32; 4] {
        [rgb[0] * alpha, rgb[1] * alpha, rgb[2] * alpha, 1.0 - alpha]
    }

    #[test]
    fn front_to_back_matches_back_to_front_over() {
        let near = ([1.0, 0.0, 0.0], 0.5);
        let far = ([0.0, 0.0, 1.0], 0.25);
        let bg = [1.0, 1.0, 1.0];

        let mut acc = [0.0, 0.0, 0.0, 1.0];
        acc = blend(acc, fragment(near.0, near.1));
        acc = blend(acc, fragment(far.0, far.1));
        let front_to_back: Vec<f32> = (0..3).map(|i| acc[i] + acc[3] * bg[i]).collect();

        // classic over operator, farthest first
        let mut c = bg;
        for (rgb, a) in [far, near] {
            for i in 0..3 {
                c[i] = rgb[i] * a + c[i] * (1.0 - a);
            }
        }

        for i in 0..3 {
            assert!((front_to_back[i] - c[i]).abs() < 1e-6);
        }
        assert!((acc[3] - 0.375).abs() < 1e-6);
    }

    #[test]
    fn blend_state_uses_destination_alpha() {
        assert_eq!(FRONT_TO_BACK.color.src_factor, wgpu::BlendFactor::DstAlpha);
        assert_eq!(FRONT_TO_BACK.alpha.dst_factor, wgpu::BlendFactor::SrcAlpha);
    }
}
