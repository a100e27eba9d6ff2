use super::{
    density_bind_group, density_layout, execute_pass, fullscreen_layout, fullscreen_vbo, opaque_target,
    scene_layout, shader_module, texture_entry, AO_WGSL, SCENE_WGSL,
};
use crate::renderer::{resources::SceneResources, targets::Targets};

/// Full-screen pass turning the G-buffer into lit, ambient-occluded colour.
pub struct DeferredShadingPipeline {
    pipeline: wgpu::RenderPipeline,
    scene_layout: wgpu::BindGroupLayout,
    density_layout: wgpu::BindGroupLayout,
    gbuffer_layout: wgpu::BindGroupLayout,
    fs_vbo: wgpu::Buffer,
}

impl DeferredShadingPipeline {
    pub fn new(device: &wgpu::Device, out_fmt: wgpu::TextureFormat) -> Self {
        let scene_layout = scene_layout(device);
        let density_layout = density_layout(device);
        let gbuffer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBuffer Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2, false),
                texture_entry(1, wgpu::TextureViewDimension::D2, false),
                texture_entry(2, wgpu::TextureViewDimension::D2, false),
            ],
        });

        let shader = shader_module(
            device,
            "shaders/deferred_shading.wgsl",
            &[SCENE_WGSL, AO_WGSL, include_str!("../../../shaders/deferred_shading.wgsl")],
        );

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Deferred Shading PipelineLayout"),
            bind_group_layouts: &[&scene_layout, &density_layout, &gbuffer_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Deferred Shading Pipeline"),
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
            density_layout,
            gbuffer_layout,
            fs_vbo: fullscreen_vbo(device, "Deferred Shading FS VBO"),
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
            label: Some("Deferred Scene BG"),
            layout: &self.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: res.scene_buf.as_entire_binding(),
            }],
        });
        let density = density_bind_group(device, &self.density_layout, &res.density.view, &res.density_sampler);
        let gbuffer = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBuffer BG"),
            layout: &self.gbuffer_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.color),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.position),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&targets.normal),
                },
            ],
        });

        execute_pass(
            &self.pipeline,
            encoder,
            &[&scene, &density, &gbuffer],
            &self.fs_vbo,
            dst,
            "Deferred Shading Pass",
        );
    }
}
