use super::{storage_entry, uniform_entry};
use crate::sort::{GpuSorter, WORKGROUP_SIZE};
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Default)]
struct ExpandParams {
    count: u32,
    padded: u32,
    _pad: [u32; 2],
}

/// Compute pass writing the sorted segment order as vertex-pair indices.
pub struct ExpandPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl ExpandPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Expand Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                storage_entry(1, wgpu::ShaderStages::COMPUTE, true),
                storage_entry(2, wgpu::ShaderStages::COMPUTE, false),
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shaders/expand.wgsl"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/expand.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Expand PipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Expand Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Self { pipeline, layout }
    }

    /// Reads the sorter's current order and fills `pairs` with `2 * count` vertex indices.
    pub fn dispatch(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        sorter: &GpuSorter,
        pairs: &wgpu::Buffer,
    ) {
        let plan = sorter.plan();
        if plan.is_empty() {
            return;
        }

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Expand Params"),
            contents: bytemuck::bytes_of(&ExpandParams {
                count: plan.count,
                padded: plan.padded(),
                ..Default::default()
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Expand BG"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sorter.sorted_indices().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: pairs.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Expand Indices Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind, &[]);
        pass.dispatch_workgroups(plan.count.div_ceil(WORKGROUP_SIZE), 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::context::HeadlessGpu;
    use crate::sort::read_u32s;

    #[test]
    fn expands_sorted_segments_into_vertex_pairs() {
        let Some(gpu) = HeadlessGpu::blocking() else {
            eprintln!("no GPU adapter available; skipping");
            return;
        };
        let (device, queue) = (&gpu.device, &gpu.queue);

        let sorter = GpuSorter::new(device, 3);
        sorter.upload_keys(queue, &[30, 10, 20]).unwrap();
        let pairs = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("test pairs"),
            size: 4 * 6,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let expand = ExpandPipeline::new(device);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        sorter.encode_sort(&mut encoder);
        expand.dispatch(device, &mut encoder, &sorter, &pairs);
        queue.submit(std::iter::once(encoder.finish()));

        let out = read_u32s(device, queue, &pairs, 6).unwrap();
        assert_eq!(out, vec![2, 3, 4, 5, 0, 1]);
    }
}
