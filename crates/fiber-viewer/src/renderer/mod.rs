//! The main rendering orchestrator. Owns the GPU context, render targets, the scene
//! resources and one pipeline per pass, and dispatches a frame by render mode.

pub mod context;
pub mod pipelines;
pub mod resources;
pub mod targets;

use self::{
    context::GfxContext,
    pipelines::{
        deferred_shading::DeferredShadingPipeline, expand::ExpandPipeline, final_blend::FinalBlendPipeline,
        tube_deferred::TubeDeferredPipeline, tube_transparent::TubeTransparentPipeline, volume::VolumePipeline,
    },
    resources::SceneResources,
    targets::Targets,
};
use crate::data::SceneUniforms;
use glam::Vec3;
use std::sync::Arc;
use winit::window::Window;

/// How tubes reach the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum RenderMode {
    /// Opaque tubes into a G-buffer, then ambient-occluded shading.
    #[default]
    Deferred,
    /// Tubes sorted by eye distance and blended front to back.
    TransparentNaive,
    /// Exact per-pixel ordering in a fixed-size fragment list. Not available; frames
    /// show only the background.
    TransparentAtomicLoop,
    /// Direct volume rendering of the scalar field.
    Volume,
}

impl RenderMode {
    pub const ALL: [RenderMode; 4] = [
        RenderMode::Deferred,
        RenderMode::TransparentNaive,
        RenderMode::TransparentAtomicLoop,
        RenderMode::Volume,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RenderMode::Deferred => "Deferred",
            RenderMode::TransparentNaive => "Transparent (naive)",
            RenderMode::TransparentAtomicLoop => "Transparent (atomic loop)",
            RenderMode::Volume => "Volume",
        }
    }

    pub fn is_available(self) -> bool {
        self != RenderMode::TransparentAtomicLoop
    }

    /// Whether the density volume weights each tube by its opacity.
    pub fn is_transparent(self) -> bool {
        matches!(self, RenderMode::TransparentNaive | RenderMode::TransparentAtomicLoop)
    }
}

/// Per-frame choices that are not part of the scene uniforms.
#[derive(Debug, Clone, Copy)]
pub struct FrameOptions {
    pub mode: RenderMode,
    /// Re-sort before drawing; otherwise the previous order is reused.
    pub sorting: bool,
    pub eye: Vec3,
    pub background: [f32; 4],
    pub volume_opacity: f32,
}

/// Owns all rendering-related state.
pub struct Renderer {
    pub gfx: GfxContext,
    pub targets: Targets,
    pub resources: SceneResources,
    tube_deferred: TubeDeferredPipeline,
    deferred_shading: DeferredShadingPipeline,
    expand: ExpandPipeline,
    tube_transparent: TubeTransparentPipeline,
    final_blend: FinalBlendPipeline,
    volume: VolumePipeline,
    pub egui_renderer: egui_wgpu::Renderer,
    warned_unavailable: bool,
}

impl Renderer {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let gfx = GfxContext::new(window).await?;
        let device = &gfx.device;
        let out_fmt = gfx.config.format;

        let targets = Targets::new(device, gfx.size);
        let resources = SceneResources::new(device, &gfx.queue);
        let tube_deferred = TubeDeferredPipeline::new(device);
        let deferred_shading = DeferredShadingPipeline::new(device, out_fmt);
        let expand = ExpandPipeline::new(device);
        let tube_transparent = TubeTransparentPipeline::new(device);
        let final_blend = FinalBlendPipeline::new(device, out_fmt);
        let volume = VolumePipeline::new(device, out_fmt);

        let egui_renderer = egui_wgpu::Renderer::new(device, out_fmt, None, 1);

        Ok(Self {
            gfx,
            targets,
            resources,
            tube_deferred,
            deferred_shading,
            expand,
            tube_transparent,
            final_blend,
            volume,
            egui_renderer,
            warned_unavailable: false,
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.gfx.resize(new_size);
            self.targets.resize(&self.gfx.device, new_size);
        }
    }

    pub fn render(&mut self, swap_view: &wgpu::TextureView, uniforms: &SceneUniforms, frame: &FrameOptions) {
        let device = &self.gfx.device;
        let queue = &self.gfx.queue;
        self.resources.write_scene(queue, uniforms);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        match frame.mode {
            RenderMode::Deferred => {
                self.tube_deferred.draw(device, &mut encoder, &self.targets, &self.resources);
                self.deferred_shading
                    .draw(device, &mut encoder, swap_view, &self.targets, &self.resources);
            }
            RenderMode::TransparentNaive => {
                let res = &self.resources;
                if frame.sorting {
                    res.sorter.sort(device, queue, &mut encoder, &res.vertices, frame.eye);
                    self.expand.dispatch(device, &mut encoder, &res.sorter, &res.pairs);
                }
                self.tube_transparent.draw(device, &mut encoder, &self.targets, res);
                self.final_blend.draw(device, &mut encoder, swap_view, &self.targets, res);
            }
            RenderMode::TransparentAtomicLoop => {
                if !self.warned_unavailable {
                    log::warn!("{} rendering is not available", frame.mode.label());
                    self.warned_unavailable = true;
                }
                clear_to(&mut encoder, swap_view, frame.background);
            }
            RenderMode::Volume => {
                self.volume
                    .draw(device, &mut encoder, swap_view, &self.resources, frame.volume_opacity);
            }
        }

        queue.submit(std::iter::once(encoder.finish()));
    }

    /// G-buffer world position under a physical pixel, if a tube covers it.
    pub fn pick_position(&self, x: u32, y: u32) -> anyhow::Result<Option<Vec3>> {
        let texel = self
            .targets
            .read_position(&self.gfx.device, &self.gfx.queue, x, y)?;
        Ok(texel.map(|t| Vec3::new(t[0], t[1], t[2])))
    }
}

fn clear_to(encoder: &mut wgpu::CommandEncoder, dst: &wgpu::TextureView, c: [f32; 4]) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Background Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: dst,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color {
                    r: c[0] as f64,
                    g: c[1] as f64,
                    b: c[2] as f64,
                    a: 1.0,
                }),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_atomic_loop_is_unavailable() {
        let unavailable: Vec<_> = RenderMode::ALL.into_iter().filter(|m| !m.is_available()).collect();
        assert_eq!(unavailable, vec![RenderMode::TransparentAtomicLoop]);
        assert_eq!(RenderMode::default(), RenderMode::Deferred);
        assert!(RenderMode::TransparentNaive.is_transparent());
        assert!(!RenderMode::Volume.is_transparent());
    }
}
