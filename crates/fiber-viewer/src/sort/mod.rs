//! GPU radix sort of segment indices by squared eye distance.
//!
//! Every iteration consumes two key bits in three compute passes (block-local scan, global
//! scan over the block counters, scatter). Keys and values ping-pong between buffers A and
//! B; after the even number of iterations the result is back in A.

pub mod plan;

pub use plan::{sort_host, SortPlan, BLOCK_SIZE, ITERATIONS, RADIX_BITS, SENTINEL_KEY, WORKGROUP_SIZE};

use anyhow::{anyhow, Result};
use glam::Vec3;
use wgpu::util::DeviceExt;

/// Distance between per-iteration `bit` uniforms (the portable dynamic offset alignment).
const BIT_STRIDE: u64 = 256;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Default)]
struct SortParams {
    eye_pos: [f32; 4],
    count: u32,
    padded: u32,
    num_blocks: u32,
    block_sum_count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Default)]
struct BitUniform {
    bit: u32,
    _pad: [u32; 3],
}

pub struct GpuSorter {
    plan: SortPlan,

    distance_pipeline: wgpu::ComputePipeline,
    local_pipeline: wgpu::ComputePipeline,
    global_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
    distance_layout: wgpu::BindGroupLayout,

    params_buf: wgpu::Buffer,
    keys: [wgpu::Buffer; 2],
    values: [wgpu::Buffer; 2],
    /// Bind groups reading from A (even iterations) and from B (odd iterations).
    sort_groups: [wgpu::BindGroup; 2],
    // Bound through `sort_groups`; kept alive here.
    _bit_buf: wgpu::Buffer,
    _local_rank: wgpu::Buffer,
    _block_sums: wgpu::Buffer,
}

impl GpuSorter {
    /// Allocates buffers for `count` keys. Recreate the sorter when the count changes.
    pub fn new(device: &wgpu::Device, count: u32) -> Self {
        let plan = SortPlan::new(count);

        let entry = |binding: u32, ty: wgpu::BufferBindingType, dynamic: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: dynamic,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform = wgpu::BufferBindingType::Uniform;
        let ro = wgpu::BufferBindingType::Storage { read_only: true };
        let rw = wgpu::BufferBindingType::Storage { read_only: false };

        // params, segment vertices, keys A, values A
        let distance_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sort Distance Layout"),
            entries: &[
                entry(0, uniform, false),
                entry(1, ro, false),
                entry(2, rw, false),
                entry(3, rw, false),
            ],
        });

        // params, bit, keys in, values in, keys out, values out, local rank, block sums
        let sort_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Radix Sort Layout"),
            entries: &[
                entry(0, uniform, false),
                entry(1, uniform, true),
                entry(2, ro, false),
                entry(3, ro, false),
                entry(4, rw, false),
                entry(5, rw, false),
                entry(6, rw, false),
                entry(7, rw, false),
            ],
        });

        let make_pipeline = |label: &str, source: &str, layout: &wgpu::BindGroupLayout| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };

        let distance_pipeline = make_pipeline(
            "shaders/sort_distance.wgsl",
            include_str!("../../shaders/sort_distance.wgsl"),
            &distance_layout,
        );
        let local_pipeline = make_pipeline(
            "shaders/radix_local.wgsl",
            include_str!("../../shaders/radix_local.wgsl"),
            &sort_layout,
        );
        let global_pipeline = make_pipeline(
            "shaders/radix_global.wgsl",
            include_str!("../../shaders/radix_global.wgsl"),
            &sort_layout,
        );
        let scatter_pipeline = make_pipeline(
            "shaders/radix_scatter.wgsl",
            include_str!("../../shaders/radix_scatter.wgsl"),
            &sort_layout,
        );

        let params = SortParams {
            eye_pos: [0.0; 4],
            count: plan.count,
            padded: plan.padded(),
            num_blocks: plan.num_blocks,
            block_sum_count: plan.block_sum_count(),
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sort Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let mut bits = vec![0u8; (BIT_STRIDE * ITERATIONS as u64) as usize];
        for it in 0..ITERATIONS {
            let u = BitUniform {
                bit: it * RADIX_BITS,
                ..Default::default()
            };
            let at = (BIT_STRIDE * it as u64) as usize;
            bits[at..at + std::mem::size_of::<BitUniform>()].copy_from_slice(bytemuck::bytes_of(&u));
        }
        let bit_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sort Bit Offsets"),
            contents: &bits,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        // wgpu rejects zero-sized bindings; an empty sort keeps 4-byte placeholders.
        let storage = |label: &str, words: u32| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: 4 * words.max(1) as u64,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let keys = [
            storage("Sort Keys A", plan.padded()),
            storage("Sort Keys B", plan.padded()),
        ];
        // Values A start as the identity so a skipped sort still yields a valid order.
        let identity: Vec<u32> = (0..plan.padded().max(1)).collect();
        let values = [
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Sort Values A"),
                contents: bytemuck::cast_slice(&identity),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            }),
            storage("Sort Values B", plan.padded()),
        ];
        let local_rank = storage("Sort Local Rank", plan.padded());
        let block_sums = storage("Sort Block Sums", plan.block_sum_count());

        let make_group = |label: &str, src: usize| {
            let dst = 1 - src;
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &sort_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &bit_buf,
                            offset: 0,
                            size: wgpu::BufferSize::new(std::mem::size_of::<BitUniform>() as u64),
                        }),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: keys[src].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: values[src].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: keys[dst].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: values[dst].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: local_rank.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: block_sums.as_entire_binding(),
                    },
                ],
            })
        };
        let sort_groups = [make_group("Radix Sort A->B", 0), make_group("Radix Sort B->A", 1)];

        log::debug!(
            "Sorter for {} keys: {} blocks, {} padding",
            plan.count,
            plan.num_blocks,
            plan.padding
        );

        Self {
            plan,
            distance_pipeline,
            local_pipeline,
            global_pipeline,
            scatter_pipeline,
            distance_layout,
            params_buf,
            keys,
            values,
            sort_groups,
            _bit_buf: bit_buf,
            _local_rank: local_rank,
            _block_sums: block_sums,
        }
    }

    #[inline]
    pub fn plan(&self) -> &SortPlan {
        &self.plan
    }

    /// Sorted values; the first `count` entries are the real indices.
    pub fn sorted_indices(&self) -> &wgpu::Buffer {
        &self.values[0]
    }

    pub fn sorted_keys(&self) -> &wgpu::Buffer {
        &self.keys[0]
    }

    /// Fills keys A with squared eye distances of segment midpoints and values A with
    /// the identity. `vertices` holds two `vec4` endpoints per segment.
    pub fn encode_distances(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        vertices: &wgpu::Buffer,
        eye: Vec3,
    ) {
        if self.plan.is_empty() {
            return;
        }
        let params = SortParams {
            eye_pos: eye.extend(1.0).to_array(),
            count: self.plan.count,
            padded: self.plan.padded(),
            num_blocks: self.plan.num_blocks,
            block_sum_count: self.plan.block_sum_count(),
        };
        queue.write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&params));

        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sort Distance BG"),
            layout: &self.distance_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.keys[0].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.values[0].as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Sort Distance Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.distance_pipeline);
        pass.set_bind_group(0, &bind, &[]);
        pass.dispatch_workgroups(self.plan.padded().div_ceil(WORKGROUP_SIZE), 1, 1);
    }

    /// Uploads arbitrary keys into buffer A, padded with sentinels, with identity values.
    pub fn upload_keys(&self, queue: &wgpu::Queue, keys: &[u32]) -> Result<()> {
        if keys.len() != self.plan.count as usize {
            return Err(anyhow!(
                "sorter was built for {} keys, got {}",
                self.plan.count,
                keys.len()
            ));
        }
        if self.plan.is_empty() {
            return Ok(());
        }
        let mut padded = keys.to_vec();
        padded.resize(self.plan.padded() as usize, SENTINEL_KEY);
        let identity: Vec<u32> = (0..self.plan.padded()).collect();
        queue.write_buffer(&self.keys[0], 0, bytemuck::cast_slice(&padded));
        queue.write_buffer(&self.values[0], 0, bytemuck::cast_slice(&identity));
        Ok(())
    }

    /// Records all sort iterations. Each pass is its own compute pass, so every dispatch
    /// sees the writes of the one before it.
    pub fn encode_sort(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.plan.is_empty() {
            return;
        }
        let blocks = self.plan.num_blocks;

        for it in 0..ITERATIONS {
            let group = &self.sort_groups[(it % 2) as usize];
            let offset = [(BIT_STRIDE * it as u64) as u32];

            for (label, pipeline, groups) in [
                ("Radix Local Scan", &self.local_pipeline, blocks),
                ("Radix Global Scan", &self.global_pipeline, 1),
                ("Radix Scatter", &self.scatter_pipeline, blocks),
            ] {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, group, &offset);
                pass.dispatch_workgroups(groups, 1, 1);
            }
        }
    }

    /// Distance pass followed by the sort.
    pub fn sort(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        vertices: &wgpu::Buffer,
        eye: Vec3,
    ) {
        self.encode_distances(device, queue, encoder, vertices, eye);
        self.encode_sort(encoder);
    }
}

/// Copies the first `words` u32 values of `src` back to the host. Blocks until done.
pub fn read_u32s(device: &wgpu::Device, queue: &wgpu::Queue, src: &wgpu::Buffer, words: u32) -> Result<Vec<u32>> {
    if words == 0 {
        return Ok(Vec::new());
    }
    let size = 4 * words as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Sort Readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Sort Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);
    rx.recv()??;

    let view = slice.get_mapped_range();
    let out = bytemuck::cast_slice::<u8, u32>(&view).to_vec();
    drop(view);
    staging.unmap();
    Ok(out)
}

/// Sorts host keys on the GPU and returns the ordering permutation.
pub fn sort_keys(device: &wgpu::Device, queue: &wgpu::Queue, keys: &[u32]) -> Result<Vec<u32>> {
    let sorter = GpuSorter::new(device, keys.len() as u32);
    if sorter.plan().is_empty() {
        return Ok(Vec::new());
    }
    sorter.upload_keys(queue, keys)?;

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Sort Keys Encoder"),
    });
    sorter.encode_sort(&mut encoder);
    queue.submit(std::iter::once(encoder.finish()));

    read_u32s(device, queue, sorter.sorted_indices(), keys.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TubeVertexGpu;
    use crate::renderer::context::HeadlessGpu;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn gpu() -> Option<HeadlessGpu> {
        let gpu = HeadlessGpu::blocking();
        if gpu.is_none() {
            eprintln!("no GPU adapter available; skipping");
        }
        gpu
    }

    fn is_sorted_permutation(keys: &[u32], perm: &[u32]) -> bool {
        let mut seen = vec![false; keys.len()];
        for &p in perm {
            if p as usize >= keys.len() || seen[p as usize] {
                return false;
            }
            seen[p as usize] = true;
        }
        perm.len() == keys.len() && perm.windows(2).all(|w| keys[w[0] as usize] <= keys[w[1] as usize])
    }

    #[test]
    fn gpu_sort_matches_property_sizes() {
        let Some(gpu) = gpu() else { return };
        let mut rng = StdRng::seed_from_u64(99);
        for n in [0usize, 1, 63, 64, 1000, 100_000] {
            let keys: Vec<u32> = (0..n).map(|_| rng.gen()).collect();
            let perm = sort_keys(&gpu.device, &gpu.queue, &keys).unwrap();
            assert!(is_sorted_permutation(&keys, &perm), "n = {}", n);
            assert_eq!(perm, sort_host(&keys), "n = {}", n);
        }
    }

    #[test]
    fn gpu_sort_presorted_is_identity() {
        let Some(gpu) = gpu() else { return };
        let keys: Vec<u32> = (0..5000u32).collect();
        let perm = sort_keys(&gpu.device, &gpu.queue, &keys).unwrap();
        assert_eq!(perm, keys);
    }

    #[test]
    fn distance_pass_orders_segments_by_eye_distance() {
        let Some(gpu) = gpu() else { return };
        let (device, queue) = (&gpu.device, &gpu.queue);

        // three segments along x, the joint flag in the sign of x must be ignored
        let verts = [
            [5.0, 0.0, 0.0, 0.0],
            [-6.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0, 0.0],
            [-3.0, 0.0, 0.0, 0.0],
            [4.0, 0.0, 0.0, 0.0],
        ]
        .map(|pos_radius| TubeVertexGpu { pos_radius });
        let vbuf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("test vertices"),
            contents: bytemuck::cast_slice(&verts),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let sorter = GpuSorter::new(device, 3);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        sorter.sort(device, queue, &mut encoder, &vbuf, Vec3::ZERO);
        queue.submit(std::iter::once(encoder.finish()));

        let order = read_u32s(device, queue, sorter.sorted_indices(), 3).unwrap();
        assert_eq!(order, vec![1, 2, 0]);
    }
}
