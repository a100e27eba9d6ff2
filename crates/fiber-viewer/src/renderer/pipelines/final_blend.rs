use super::{execute_pass, fullscreen_layout, fullscreen_vbo, opaque_target, scene_layout, shader_module, texture_entry, SCENE_WGSL};
use crate::renderer::{resources::SceneResources, targets::Targets};

/// Puts the transparent accumulation over the background colour and encodes gamma.
pub struct FinalBlendPipeline {
    pipeline: wgpu::RenderPipeline,
    scene_layout: wgpu::BindGroupLayout,
    accum_layout: wgpu::BindGroupLayout,
    fs_vbo: wgpu::Buffer,
}

impl FinalBlendPipeline {
    pub fn new(device: &wgpu::Device, out_fmt: wgpu::TextureFormat) -> Self {
        let scene_layout = scene_layout(device);
        let accum_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Final Blend Layout"),
            entries: &[texture_entry(0, wgpu::TextureViewDimension::D2, false)],
        });

        let shader = shader_module(
            device,
            "shaders/final_blend.wgsl",
            &[SCENE_WGSL, include_str!("../../../shaders/final_blend.wgsl")],
        );

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Final Blend PipelineLayout"),
            bind_group_layouts: &[&scene_layout, &accum_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Final Blend Pipeline"),
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
            accum_layout,
            fs_vbo: fullscreen_vbo(device, "Final Blend FS VBO"),
        }
    }

    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        dst: &wgpu::TextureView,
        targets: &Targets,
        res: &SceneResources,
    ) {
        let scene = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Final Blend Scene BG"),
            layout: &self.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: res.scene_buf.as_entire_binding(),
            }],
        });
        let accum = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Final Blend BG"),
            layout: &self.accum_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&targets.accum),
            }],
        });

        execute_pass(&self.pipeline, encoder, &[&scene, &accum], &self.fs_vbo, dst, "Final Blend Pass");
    }
}
